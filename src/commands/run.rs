//! The batch run over all zones.

use std::path::PathBuf;

use crate::anchor;
use crate::config::ZoneConfig;
use crate::env::Env;
use crate::error::Error;
use crate::generate::CommandKeyGenerator;
use crate::log::RunContext;
use crate::rollover;
use crate::signing::{self, CommandZoneSigner};
use crate::zone::ZoneStore;

#[derive(Clone, Debug, clap::Args)]
pub struct Run {
    /// Directory holding the zone directories
    #[arg(short = 'd', long = "directory", default_value = ".")]
    dir: PathBuf,

    /// Also descend into nested zone directories
    #[arg(short = 'r', long = "recursive")]
    recursive: bool,

    /// Re-sign every zone regardless of need
    #[arg(short = 'f', long = "force")]
    force: bool,

    /// Only report what would be done; do not generate, transition or
    /// sign anything
    #[arg(short = 'n', long = "dry-run")]
    dry_run: bool,

    /// Print progress information
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Treat the zones as a hierarchy: hand each zone's keyset to the
    /// zone one directory up
    #[arg(long = "hierarchical")]
    hierarchical: bool,

    /// Key generation program
    #[arg(long = "keygen", value_name = "PATH", default_value = "dnssec-keygen")]
    keygen: PathBuf,

    /// Zone signing program
    #[arg(long = "signer", value_name = "PATH", default_value = "dnssec-signzone")]
    signer: PathBuf,

    #[command(flatten)]
    config: super::ConfigArgs,
}

impl Run {
    pub fn execute(self, env: impl Env) -> Result<(), Error> {
        let mut conf = ZoneConfig::default();
        if self.hierarchical {
            conf.keyset_dir = Some("..".into());
        }
        self.config.apply(&mut conf)?;

        let dir = env.in_cwd(&self.dir);
        let mut zones = ZoneStore::new();
        zones
            .discover(&dir, self.recursive, &conf)
            .map_err(|err| Error::from(err.to_string()))?;
        if zones.is_empty() {
            return Err(format!(
                "no signed zones found below '{}' (missing '{}' files?)",
                dir.display(),
                conf.signed_file
            )
            .into());
        }

        let generator = CommandKeyGenerator::new(&self.keygen);
        let signer = CommandZoneSigner::new(&self.signer);
        let mut ctx = RunContext::new(self.verbose);

        for index in 0..zones.len() {
            // Each zone is processed in isolation; one zone's failure must
            // not stop the batch.
            let parent_signed = zones
                .get(index)
                .map(|z| z.parent_is_signed())
                .unwrap_or(false);
            let Some(zone) = zones.get_mut(index) else {
                continue;
            };
            ctx.info(&env, format_args!("processing zone \"{}\"", zone.name));
            for path in zone.keys.skipped() {
                ctx.warning(
                    &env,
                    format_args!("\"{}\": skipping malformed key file '{path}'", zone.name),
                );
            }

            let mut key_change = false;
            if !self.dry_run {
                let anchor = anchor::ksk_5011_status(zone, &env, &generator, &mut ctx);
                key_change |= anchor.resign;
                if !anchor.is_rfc5011 {
                    key_change |=
                        rollover::ksk_status(zone, parent_signed, &env, &generator, &mut ctx);
                }
                key_change |= rollover::zsk_status(zone, &env, &generator, &mut ctx);
            }
            signing::process_zone(
                zone,
                key_change,
                self.force,
                self.dry_run,
                &env,
                &signer,
                &mut ctx,
            );
        }

        if ctx.error_count() > 0 {
            return Err(format!("{} error(s) during the run", ctx.error_count()).into());
        }
        Ok(())
    }
}
