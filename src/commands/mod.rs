//! The commands of _keyroll_.

pub mod key;
pub mod list;
pub mod run;

use domain::base::iana::SecAlg;

use crate::config::ZoneConfig;
use crate::env::Env;
use crate::error::Error;
use crate::parse::parse_duration;

#[derive(Clone, Debug, clap::Subcommand)]
pub enum Command {
    /// Check all zones below a directory and roll, re-sign and distribute
    /// as needed
    ///
    /// A directory is treated as a zone when it contains the signed zone
    /// file. One pass per zone: trust-anchor maintenance, KSK and ZSK
    /// rollover checks, then the signing decision. Failures in one zone do
    /// not stop the run; they are counted and reflected in the exit status.
    #[command(name = "run")]
    Run(self::run::Run),

    /// Manage the keys of a single zone directory by hand
    #[command(name = "key")]
    Key(self::key::Key),

    /// List the keys found below a directory
    #[command(name = "list")]
    List(self::list::List),
}

impl Command {
    pub fn execute(self, env: impl Env) -> Result<(), Error> {
        match self {
            Self::Run(run) => run.execute(env),
            Self::Key(key) => key.execute(env),
            Self::List(list) => list.execute(env),
        }
    }
}

//------------ ConfigArgs ----------------------------------------------------

/// Configuration overrides shared by the commands that run the engines.
///
/// Durations take a number of seconds or a `s`, `m`, `h`, `d` or `w`
/// suffix.
#[derive(Clone, Debug, Default, clap::Args)]
pub struct ConfigArgs {
    /// Lifetime of key signing keys; 0 disables KSK management
    #[arg(long = "ksk-lifetime", value_name = "DURATION")]
    ksk_lifetime: Option<String>,

    /// Lifetime of zone signing keys; 0 disables ZSK generation
    #[arg(long = "zsk-lifetime", value_name = "DURATION")]
    zsk_lifetime: Option<String>,

    /// Signing algorithm number
    #[arg(long = "algorithm", value_name = "NUMBER")]
    algorithm: Option<u8>,

    /// Additional algorithm carried concurrently, e.g. during an
    /// algorithm rollover
    #[arg(long = "second-algorithm", value_name = "NUMBER")]
    second_algorithm: Option<u8>,

    /// Maximum time between signings of a zone
    #[arg(long = "resign-interval", value_name = "DURATION")]
    resign_interval: Option<String>,

    /// TTL of the DNSKEY records
    #[arg(long = "key-ttl", value_name = "DURATION")]
    key_ttl: Option<String>,

    /// Assumed propagation delay to all secondaries and resolvers
    #[arg(long = "propagation", value_name = "DURATION")]
    propagation: Option<String>,

    /// Assumed propagation delay on the parent side of a hierarchical
    /// KSK rollover
    #[arg(long = "parent-propagation", value_name = "DURATION")]
    parent_propagation: Option<String>,

    /// Randomness source handed to the key generator
    #[arg(long = "random-device", value_name = "PATH")]
    random_device: Option<String>,

    /// Command run after a zone was signed, with the zone name and the
    /// signed file as arguments
    #[arg(long = "dist-cmd", value_name = "COMMAND")]
    dist_cmd: Option<String>,

    /// Name of the unsigned zone file within each zone directory
    #[arg(long = "zone-file", value_name = "NAME")]
    zone_file: Option<String>,

    /// Name of the signed zone file within each zone directory
    #[arg(long = "signed-file", value_name = "NAME")]
    signed_file: Option<String>,
}

impl ConfigArgs {
    pub fn apply(&self, conf: &mut ZoneConfig) -> Result<(), Error> {
        if let Some(v) = self.ksk_lifetime.as_deref() {
            conf.ksk_lifetime = parse_duration(v)?;
        }
        if let Some(v) = self.zsk_lifetime.as_deref() {
            conf.zsk_lifetime = parse_duration(v)?;
        }
        if let Some(v) = self.algorithm {
            conf.algorithm = SecAlg::from_int(v);
        }
        if let Some(v) = self.second_algorithm {
            conf.second_algorithm = Some(SecAlg::from_int(v));
        }
        if let Some(v) = self.resign_interval.as_deref() {
            conf.resign_interval = parse_duration(v)?;
        }
        if let Some(v) = self.key_ttl.as_deref() {
            conf.key_ttl = parse_duration(v)?;
        }
        if let Some(v) = self.propagation.as_deref() {
            conf.propagation = parse_duration(v)?;
        }
        if let Some(v) = self.parent_propagation.as_deref() {
            conf.parent_propagation = parse_duration(v)?;
        }
        if self.random_device.is_some() {
            conf.random_device.clone_from(&self.random_device);
        }
        if self.dist_cmd.is_some() {
            conf.dist_cmd.clone_from(&self.dist_cmd);
        }
        if let Some(v) = &self.zone_file {
            conf.zone_file.clone_from(v);
        }
        if let Some(v) = &self.signed_file {
            conf.signed_file.clone_from(v);
        }
        Ok(())
    }
}
