//! Listing the keys found below a directory.

use std::path::PathBuf;

use crate::env::Env;
use crate::error::{Context, Error};
use crate::keys::{KeyStatus, KeyStore};

#[derive(Clone, Debug, clap::Args)]
pub struct List {
    /// The directory to scan
    #[arg(short = 'd', long = "directory", default_value = ".")]
    dir: PathBuf,

    /// Also descend into subdirectories
    #[arg(short = 'r', long = "recursive")]
    recursive: bool,
}

impl List {
    pub fn execute(self, env: impl Env) -> Result<(), Error> {
        let dir = env.in_cwd(&self.dir);
        let store = KeyStore::load(&dir, self.recursive)
            .map_err(|err| Error::from(err.to_string()))
            .with_context(|| format!("scanning '{}'", dir.display()))?;

        let mut out = env.stdout();
        for record in store.iter() {
            let role = if record.is_ksk() { "KSK" } else { "ZSK" };
            // A published KSK is a standby trust anchor in waiting.
            let status = if record.is_ksk() && record.status() == KeyStatus::Published {
                "standby".into()
            } else {
                record.status().to_string()
            };
            writeln!(
                out,
                "{:<30} {:>3} {} {:>5}  {:<11} {}",
                record.name(),
                record.algorithm().to_int(),
                role,
                record.tag(),
                status,
                format_time(record.file_time()),
            );
        }
        Ok(())
    }
}

fn format_time(seconds: u32) -> String {
    chrono::DateTime::from_timestamp(seconds.into(), 0)
        .map(|dt| dt.format("%b %d %Y %H:%M:%S").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use crate::env::fake::FakeCmd;
    use crate::keys::record::{EXT_ACTIVE, EXT_PUBLISHED};
    use crate::keys::testutil::create_key;

    #[test]
    fn keys_are_listed_in_store_order() {
        let dir = tempfile::tempdir().unwrap();
        create_key(
            dir.path(),
            "example.net.",
            8,
            1100,
            false,
            false,
            Some(EXT_ACTIVE),
            2_000,
            "",
        );
        create_key(
            dir.path(),
            "example.net.",
            8,
            1101,
            true,
            false,
            Some(EXT_PUBLISHED),
            1_000,
            "",
        );

        let res = FakeCmd::new(["keyroll", "list", "-d"])
            .args([dir.path().as_os_str().to_os_string()])
            .run();
        assert_eq!(res.exit_code, 0, "{}", res.stderr);

        let lines: Vec<_> = res.stdout.lines().collect();
        assert_eq!(lines.len(), 2);
        // KSK first; its published status reads as standby.
        assert!(lines[0].contains("KSK"));
        assert!(lines[0].contains("standby"));
        assert!(lines[1].contains("ZSK"));
        assert!(lines[1].contains("active"));
    }

    #[test]
    fn empty_directory_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let res = FakeCmd::new(["keyroll", "list", "-d"])
            .args([dir.path().as_os_str().to_os_string()])
            .run();
        assert_eq!(res.exit_code, 0);
        assert!(res.stdout.is_empty());
    }
}
