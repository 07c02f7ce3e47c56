//! Manual key management for a single zone directory.

use std::path::PathBuf;

use crate::config::ZoneConfig;
use crate::env::Env;
use crate::error::{Context, Error};
use crate::generate::{generate_key, CommandKeyGenerator};
use crate::keys::{KeyStatus, KeyStore};
use crate::parse::{parse_duration, parse_zone_name};

#[derive(Clone, Debug, clap::Args)]
pub struct Key {
    /// The zone directory
    #[arg(short = 'd', long = "directory", default_value = ".")]
    dir: PathBuf,

    /// Key generation program
    #[arg(long = "keygen", value_name = "PATH", default_value = "dnssec-keygen")]
    keygen: PathBuf,

    #[command(flatten)]
    config: super::ConfigArgs,

    #[command(subcommand)]
    action: Action,
}

#[derive(Clone, Debug, clap::Subcommand)]
pub enum Action {
    /// Create a new key for a zone
    ///
    /// The key is active unless --published is given. The base name of the
    /// created files is printed on success.
    Create {
        /// The zone to create the key for
        zone: String,

        /// Create a key signing key instead of a zone signing key
        #[arg(short = 'k', long = "ksk")]
        ksk: bool,

        /// Pre-publish the key instead of activating it
        #[arg(short = 'p', long = "published")]
        published: bool,
    },

    /// Activate a key; clears the revoke flag of a revoked key
    ///
    /// The key's file time is set to now, as with publish and depreciate.
    Activate(Selector),

    /// Pre-publish a key
    Publish(Selector),

    /// Depreciate a key
    Depreciate(Selector),

    /// Set the revoke flag of a key (RFC 5011)
    ///
    /// Unlike the other transitions this keeps the key's file time, so its
    /// age stays meaningful for the RFC 5011 hold-down timers.
    Revoke(Selector),

    /// Retire a key: its files are kept under a lower-cased name that
    /// scans ignore
    Remove(Selector),

    /// Delete a key and all its files for good
    Destroy(Selector),

    /// Assign a new proposed lifetime to a key
    SetLifetime {
        #[command(flatten)]
        selector: Selector,

        /// The new lifetime, in seconds or with a s/m/h/d/w suffix
        lifetime: String,
    },
}

/// Addresses one key by tag and/or zone name.
///
/// A bare tag must match exactly one key; matching several is a hard error
/// rather than a silent pick.
#[derive(Clone, Debug, clap::Args)]
pub struct Selector {
    /// The key tag
    #[arg(short = 't', long = "tag", default_value_t = 0)]
    tag: u16,

    /// The zone the key belongs to
    #[arg(short = 'z', long = "zone")]
    zone: Option<String>,
}

impl Key {
    pub fn execute(self, env: impl Env) -> Result<(), Error> {
        let mut conf = ZoneConfig::default();
        self.config.apply(&mut conf)?;
        let dir = env.in_cwd(&self.dir).into_owned();
        let now = env.seconds_since_epoch();

        if let Action::Create {
            zone,
            ksk,
            published,
        } = &self.action
        {
            let zone = parse_zone_name(zone)?;
            let generator = CommandKeyGenerator::new(&self.keygen);
            let record = generate_key(&generator, &dir, &zone, &conf, conf.algorithm, *ksk, now)
                .map_err(|err| Error::from(err.to_string()))
                .with_context(|| format!("creating a key for {zone}"))?;
            let base = record.base_name();
            if *published {
                let mut store = KeyStore::new();
                store.insert(record);
                store
                    .set_status(0, KeyStatus::Published, false, now)
                    .map_err(|err| Error::from(err.to_string()))?;
            }
            writeln!(env.stdout(), "{base}");
            return Ok(());
        }

        let mut store = KeyStore::load(&dir, false)
            .map_err(|err| Error::from(err.to_string()))
            .with_context(|| format!("scanning '{}'", dir.display()))?;

        let (selector, transition, lifetime) = match &self.action {
            Action::Create { .. } => unreachable!("handled above"),
            Action::Activate(s) => (s, Some(KeyStatus::Active), None),
            Action::Publish(s) => (s, Some(KeyStatus::Published), None),
            Action::Depreciate(s) => (s, Some(KeyStatus::Deprecated), None),
            Action::Revoke(s) => (s, Some(KeyStatus::Revoked), None),
            Action::Remove(s) => (s, None, None),
            Action::Destroy(s) => (s, None, None),
            Action::SetLifetime { selector, lifetime } => {
                (selector, None, Some(parse_duration(lifetime)?))
            }
        };

        let zone = selector
            .zone
            .as_deref()
            .map(parse_zone_name)
            .transpose()?;
        let index = store
            .find_by_tag_or_name(selector.tag, zone.as_deref())
            .map_err(|err| Error::from(err.to_string()))?;
        let base = store
            .get(index)
            .map(|r| r.base_name())
            .unwrap_or_default();

        match &self.action {
            Action::Remove(_) => {
                store
                    .remove(index)
                    .map_err(|err| Error::from(err.to_string()))?;
                writeln!(env.stdout(), "{base} retired");
            }
            Action::Destroy(_) => {
                store
                    .destroy(index)
                    .map_err(|err| Error::from(err.to_string()))?;
                writeln!(env.stdout(), "{base} destroyed");
            }
            Action::SetLifetime { .. } => {
                if let (Some(record), Some(lifetime)) = (store.get_mut(index), lifetime) {
                    record
                        .set_lifetime(lifetime, now)
                        .map_err(|err| Error::from(err.to_string()))?;
                    writeln!(env.stdout(), "{base} lifetime set");
                }
            }
            _ => {
                if let Some(target) = transition {
                    // Revocation keeps the original file time so that age
                    // computations stay meaningful.
                    let preserve = target == KeyStatus::Revoked;
                    store
                        .set_status(index, target, preserve, now)
                        .map_err(|err| Error::from(err.to_string()))?;
                    let status = store
                        .get(index)
                        .map(|r| r.status().to_string())
                        .unwrap_or_default();
                    writeln!(env.stdout(), "{base} {status}");
                }
            }
        }
        Ok(())
    }
}
