//! The in-memory representation of one DNSSEC key.

use std::fmt;
use std::path::{Path, PathBuf};

use domain::base::iana::SecAlg;

use crate::error::KeyError;
use crate::parse::format_timestamp;
use crate::util;

//------------ DNSKEY flag bits ----------------------------------------------

/// Zone key flag. Every key we manage must carry it.
pub const FLAG_ZONE: u16 = 0x0100;

/// Secure entry point flag. Set on key signing keys.
pub const FLAG_SEP: u16 = 0x0001;

/// Revoke flag (RFC 5011).
pub const FLAG_REVOKE: u16 = 0x0080;

//------------ Status extensions ---------------------------------------------

/// The public key file, always present.
pub const EXT_KEY: &str = ".key";

/// The private key of an active key.
pub const EXT_ACTIVE: &str = ".private";

/// The private key of a pre-published (standby) key.
pub const EXT_PUBLISHED: &str = ".published";

/// The private key of a deprecated key. The spelling is historical and must
/// not be fixed: existing installations carry these files.
pub const EXT_DEPRECATED: &str = ".depreciated";

//------------ KeyStatus -----------------------------------------------------

/// The lifecycle status of a key.
///
/// All statuses except `Revoked` are encoded on disk by which private-side
/// sibling of the `.key` file exists. Revocation is orthogonal: it is a flag
/// bit in the public key record and leaves the sibling routing untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyStatus {
    /// A bare `.key` file without any private-side sibling.
    Sep,
    /// Pre-published; for a KSK this is presented as "standby".
    Published,
    Active,
    Deprecated,
    Revoked,
}

impl KeyStatus {
    /// The private-side extension encoding this status, if any.
    fn extension(self) -> Option<&'static str> {
        match self {
            KeyStatus::Sep => None,
            KeyStatus::Published => Some(EXT_PUBLISHED),
            KeyStatus::Active | KeyStatus::Revoked => Some(EXT_ACTIVE),
            KeyStatus::Deprecated => Some(EXT_DEPRECATED),
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyStatus::Sep => "sep",
            KeyStatus::Published => "published",
            KeyStatus::Active => "active",
            KeyStatus::Deprecated => "depreciated",
            KeyStatus::Revoked => "revoked",
        })
    }
}

//------------ KeyRecord -----------------------------------------------------

/// One DNSSEC key of a zone, backed by its files in the zone directory.
#[derive(Clone, Debug)]
pub struct KeyRecord {
    /// Canonical zone name: lower case, trailing dot.
    name: String,
    algorithm: SecAlg,
    tag: u16,
    /// DNSKEY flags field.
    flags: u16,
    /// DNSKEY protocol field; always 3 in practice.
    protocol: u8,
    /// Base64 public key material, whitespace-stripped.
    pubkey: String,
    /// Status as routed by the private-side file extension. Revocation is
    /// tracked in `flags`, not here.
    status: KeyStatus,
    /// Modification time of the `.key` file, used as the creation proxy for
    /// all age computations.
    file_time: u32,
    /// Set once at the first lifetime assignment, never changed.
    generation_time: u32,
    /// Proposed validity span assigned at generation time; 0 = unset.
    lifetime: u32,
    /// Explicit expiration; 0 = unset.
    expiration_time: u32,
    /// The directory holding the backing files.
    directory: PathBuf,
}

impl KeyRecord {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        algorithm: SecAlg,
        tag: u16,
        flags: u16,
        protocol: u8,
        pubkey: String,
        status: KeyStatus,
        file_time: u32,
        directory: PathBuf,
    ) -> Self {
        KeyRecord {
            name,
            algorithm,
            tag,
            flags,
            protocol,
            pubkey,
            status,
            file_time,
            generation_time: 0,
            lifetime: 0,
            expiration_time: 0,
            directory,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn algorithm(&self) -> SecAlg {
        self.algorithm
    }

    pub fn tag(&self) -> u16 {
        self.tag
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    pub fn pubkey(&self) -> &str {
        &self.pubkey
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn file_time(&self) -> u32 {
        self.file_time
    }

    pub fn generation_time(&self) -> u32 {
        self.generation_time
    }

    pub fn lifetime(&self) -> u32 {
        self.lifetime
    }

    pub fn expiration_time(&self) -> u32 {
        self.expiration_time
    }

    pub fn is_ksk(&self) -> bool {
        self.flags & FLAG_SEP != 0
    }

    pub fn is_revoked(&self) -> bool {
        self.flags & FLAG_REVOKE != 0
    }

    /// The effective status: the extension-routed status, except that a set
    /// revoke bit presents as `Revoked`.
    pub fn status(&self) -> KeyStatus {
        if self.is_revoked() {
            KeyStatus::Revoked
        } else {
            self.status
        }
    }

    /// The status as routed by the file extension, ignoring revocation.
    pub fn ext_status(&self) -> KeyStatus {
        self.status
    }

    /// Age relative to the given time, based on the `.key` file time.
    pub fn age(&self, now: u32) -> u32 {
        now.saturating_sub(self.file_time)
    }

    /// The effective expiration time: the explicit one if set, otherwise
    /// generation time plus the key's own lifetime, otherwise generation
    /// time plus the given default lifetime.
    pub fn effective_expiration(&self, default_lifetime: u32) -> u32 {
        if self.expiration_time != 0 {
            self.expiration_time
        } else if self.lifetime != 0 {
            self.generation_time.saturating_add(self.lifetime)
        } else {
            self.generation_time.saturating_add(default_lifetime)
        }
    }

    /// The base of all file names of this key:
    /// `K<zone>+<algorithm:3>+<tag:5>`.
    pub fn base_name(&self) -> String {
        format!(
            "K{}+{:03}+{:05}",
            self.name,
            self.algorithm.to_int(),
            self.tag
        )
    }

    /// The path of the public `.key` file.
    pub fn key_path(&self) -> PathBuf {
        self.directory.join(format!("{}{}", self.base_name(), EXT_KEY))
    }

    /// The path of the private-side file for the given status, if that
    /// status has one.
    pub fn status_path(&self, status: KeyStatus) -> Option<PathBuf> {
        status
            .extension()
            .map(|ext| self.directory.join(format!("{}{}", self.base_name(), ext)))
    }

    /// All backing files that currently exist on disk.
    pub fn existing_paths(&self) -> Vec<PathBuf> {
        let base = self.base_name();
        [EXT_KEY, EXT_ACTIVE, EXT_PUBLISHED, EXT_DEPRECATED]
            .iter()
            .map(|ext| self.directory.join(format!("{base}{ext}")))
            .filter(|p| p.exists())
            .collect()
    }

    /// The DNSKEY resource record as a single zone-file line, without a
    /// trailing newline.
    pub fn dnskey_line(&self, ttl: Option<u32>) -> String {
        match ttl {
            Some(ttl) => format!(
                "{} {} IN DNSKEY  {} {} {} {}",
                self.name,
                ttl,
                self.flags,
                self.protocol,
                self.algorithm.to_int(),
                self.pubkey
            ),
            None => format!(
                "{} IN DNSKEY  {} {} {} {}",
                self.name,
                self.flags,
                self.protocol,
                self.algorithm.to_int(),
                self.pubkey
            ),
        }
    }

    /// The canonical contents of the `.key` file: the meta-comment block
    /// followed by the DNSKEY record.
    pub fn key_file_contents(&self) -> String {
        let mut out = String::new();
        if self.generation_time != 0 {
            out.push_str(&format!(
                ";%\tgenerationtime={}\n",
                format_timestamp(self.generation_time)
            ));
        }
        if self.lifetime != 0 {
            out.push_str(&format!(";%\tlifetime={}d\n", self.lifetime / 86400));
        }
        if self.expiration_time != 0 {
            out.push_str(&format!(
                ";%\texpirationtime={}\n",
                format_timestamp(self.expiration_time)
            ));
        }
        out.push_str(&self.dnskey_line(None));
        out.push('\n');
        out
    }

    /// Rewrite the `.key` file in place from the in-memory record, keeping
    /// the current file time.
    pub(crate) fn rewrite_key_file(&self) -> Result<(), KeyError> {
        util::write_file(self.key_path(), &self.key_file_contents())?;
        util::touch(self.key_path(), self.file_time)
    }

    /// Assign the proposed lifetime, stamping the generation time on first
    /// assignment, and persist the meta block.
    pub fn set_lifetime(&mut self, lifetime: u32, now: u32) -> Result<(), KeyError> {
        if self.generation_time == 0 {
            self.generation_time = now;
        }
        self.lifetime = lifetime;
        self.rewrite_key_file()
    }

    /// Set the explicit expiration time and persist the meta block.
    pub fn set_expiration(&mut self, expiration: u32) -> Result<(), KeyError> {
        self.expiration_time = expiration;
        self.rewrite_key_file()
    }

    /// Toggle the revoke flag, rewriting the public key file in place. The
    /// private-side extension routing is unaffected.
    pub(crate) fn set_revoked(&mut self, revoked: bool, file_time: u32) -> Result<(), KeyError> {
        if revoked {
            self.flags |= FLAG_REVOKE;
        } else {
            self.flags &= !FLAG_REVOKE;
        }
        self.file_time = file_time;
        self.rewrite_key_file()
    }

    pub(crate) fn set_ext_status(&mut self, status: KeyStatus) {
        self.status = status;
    }

    pub(crate) fn set_file_time(&mut self, file_time: u32) {
        self.file_time = file_time;
    }

    pub(crate) fn set_meta(&mut self, generation_time: u32, lifetime: u32, expiration_time: u32) {
        self.generation_time = generation_time;
        self.lifetime = lifetime;
        self.expiration_time = expiration_time;
    }

    /// The composite sort key ordering a key store: zone name first, KSKs
    /// before ZSKs, then creation time, then tag as the tie break.
    pub(crate) fn sort_key(&self) -> (String, bool, u32, u16) {
        (self.name.clone(), !self.is_ksk(), self.file_time, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(flags: u16) -> KeyRecord {
        KeyRecord::new(
            "example.net.".into(),
            SecAlg::RSASHA256,
            12345,
            flags,
            3,
            "AwEAAcvQW7bC".into(),
            KeyStatus::Active,
            1_600_000_000,
            PathBuf::from("/tmp/does-not-exist"),
        )
    }

    #[test]
    fn flag_bits() {
        let ksk = record(FLAG_ZONE | FLAG_SEP);
        assert!(ksk.is_ksk());
        assert!(!ksk.is_revoked());
        assert_eq!(ksk.status(), KeyStatus::Active);

        let revoked = record(FLAG_ZONE | FLAG_SEP | FLAG_REVOKE);
        assert!(revoked.is_revoked());
        assert_eq!(revoked.status(), KeyStatus::Revoked);
        // Revocation does not reroute the backing file.
        assert_eq!(revoked.ext_status(), KeyStatus::Active);
    }

    #[test]
    fn base_name_is_zero_padded() {
        let mut rec = record(FLAG_ZONE);
        assert_eq!(rec.base_name(), "Kexample.net.+008+12345");
        rec.tag = 7;
        rec.algorithm = SecAlg::RSASHA1;
        assert_eq!(rec.base_name(), "Kexample.net.+005+00007");
    }

    #[test]
    fn effective_expiration_prefers_explicit() {
        let mut rec = record(FLAG_ZONE | FLAG_SEP);
        rec.set_meta(1_000, 0, 0);
        assert_eq!(rec.effective_expiration(500), 1_500);
        rec.set_meta(1_000, 200, 0);
        assert_eq!(rec.effective_expiration(500), 1_200);
        rec.set_meta(1_000, 200, 9_999);
        assert_eq!(rec.effective_expiration(500), 9_999);
    }

    #[test]
    fn meta_block_only_lists_set_fields() {
        let mut rec = record(FLAG_ZONE);
        let contents = rec.key_file_contents();
        assert!(!contents.contains(";%"));
        assert!(contents.starts_with("example.net. IN DNSKEY  256 3 8 "));

        rec.set_meta(1_600_000_000, 30 * 86400, 0);
        let contents = rec.key_file_contents();
        assert!(contents.contains(";%\tgenerationtime=20200913"));
        assert!(contents.contains(";%\tlifetime=30d\n"));
        assert!(!contents.contains("expirationtime"));
    }
}
