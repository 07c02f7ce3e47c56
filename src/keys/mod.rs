//! Key records, key files and the per-zone key store.

pub mod file;
pub mod record;
pub mod store;

pub use record::{KeyRecord, KeyStatus};
pub use store::KeyStore;

#[cfg(test)]
pub(crate) mod testutil {
    use std::path::Path;

    use crate::keys::record::{FLAG_REVOKE, FLAG_SEP, FLAG_ZONE};
    use crate::util;

    /// A syntactically valid base64 blob standing in for key material.
    pub const PUBKEY: &str = "AwEAAcvQW7bC";

    /// Fabricate the on-disk files of a key and return its base name.
    ///
    /// `status_ext` is the private-side extension (`".private"`,
    /// `".published"`, `".depreciated"`) or `None` for a bare SEP key.
    pub fn create_key(
        dir: &Path,
        zone: &str,
        alg: u8,
        tag: u16,
        ksk: bool,
        revoked: bool,
        status_ext: Option<&str>,
        mtime: u32,
        meta: &str,
    ) -> String {
        let base = format!("K{zone}+{alg:03}+{tag:05}");
        let mut flags = FLAG_ZONE;
        if ksk {
            flags |= FLAG_SEP;
        }
        if revoked {
            flags |= FLAG_REVOKE;
        }
        let body = format!("{meta}{zone} IN DNSKEY  {flags} 3 {alg} {PUBKEY}\n");
        let key_path = dir.join(format!("{base}.key"));
        std::fs::write(&key_path, body).unwrap();
        if let Some(ext) = status_ext {
            std::fs::write(dir.join(format!("{base}{ext}")), "Private-key-format: v1.3\n")
                .unwrap();
        }
        util::touch(&key_path, mtime).unwrap();
        base
    }
}
