//! The external key generation capability.
//!
//! Actual key material is never produced in-process; a [`KeyGenerator`]
//! implementation is injected into the engines. The production
//! implementation shells out to `dnssec-keygen`; tests use an in-memory
//! fake that fabricates key files directly.

use std::path::{Path, PathBuf};
use std::process::Command;

use domain::base::iana::SecAlg;

use crate::config::ZoneConfig;
use crate::error::KeyError;
use crate::keys::file::parse_key_file;
use crate::keys::record::EXT_KEY;
use crate::keys::KeyRecord;

/// The parameters of one key generation request.
#[derive(Debug)]
pub struct GenerateRequest<'a> {
    /// Canonical zone name.
    pub zone: &'a str,
    /// Directory the key files must end up in.
    pub directory: &'a Path,
    pub algorithm: SecAlg,
    pub bits: u32,
    pub ksk: bool,
    pub random_device: Option<&'a str>,
}

/// Produces a new key for a zone.
///
/// A generated key arrives with its `.key` and `.private` files in place,
/// which makes it active by the file naming convention; callers transition
/// it to another status as needed.
pub trait KeyGenerator {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<KeyRecord, KeyError>;
}

/// Generate a key per the zone configuration and assign its lifetime.
///
/// This is the common path all engines use: build the request from the
/// config, run the generator and stamp the generation time and proposed
/// lifetime into the new key's meta block.
pub fn generate_key(
    generator: &impl KeyGenerator,
    directory: &Path,
    zone: &str,
    conf: &ZoneConfig,
    algorithm: SecAlg,
    ksk: bool,
    now: u32,
) -> Result<KeyRecord, KeyError> {
    let request = GenerateRequest {
        zone,
        directory,
        algorithm,
        bits: if ksk { conf.ksk_bits } else { conf.zsk_bits },
        ksk,
        random_device: conf.random_device.as_deref(),
    };
    let mut record = generator.generate(&request)?;
    let lifetime = if ksk {
        conf.ksk_lifetime
    } else {
        conf.zsk_lifetime
    };
    record.set_lifetime(lifetime, now)?;
    Ok(record)
}

//------------ CommandKeyGenerator -------------------------------------------

/// Shells out to `dnssec-keygen` (or a compatible program).
///
/// The call is synchronous with captured stdout; the last output line is the
/// base name of the generated files.
pub struct CommandKeyGenerator {
    program: PathBuf,
}

impl CommandKeyGenerator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        CommandKeyGenerator {
            program: program.into(),
        }
    }
}

impl Default for CommandKeyGenerator {
    fn default() -> Self {
        Self::new("dnssec-keygen")
    }
}

impl KeyGenerator for CommandKeyGenerator {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<KeyRecord, KeyError> {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(request.directory)
            .arg("-a")
            .arg(request.algorithm.to_int().to_string())
            .arg("-b")
            .arg(request.bits.to_string())
            .arg("-n")
            .arg("ZONE");
        if let Some(device) = request.random_device {
            cmd.arg("-r").arg(device);
        }
        if request.ksk {
            cmd.arg("-f").arg("KSK");
        }
        cmd.arg(request.zone);

        let output = cmd.output().map_err(|err| {
            KeyError::Generation(format!(
                "cannot run '{}' for {}: {err}",
                self.program.display(),
                request.zone
            ))
        })?;
        if !output.status.success() {
            return Err(KeyError::Generation(format!(
                "'{}' failed for {} ({}): {}",
                self.program.display(),
                request.zone,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let base = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| {
                KeyError::Generation(format!(
                    "'{}' produced no output for {}",
                    self.program.display(),
                    request.zone
                ))
            })?;

        parse_key_file(request.directory, &format!("{base}{EXT_KEY}")).map_err(|err| {
            KeyError::Generation(format!(
                "cannot read back generated key '{base}' for {}: {err}",
                request.zone
            ))
        })
    }
}

//------------ FakeKeyGenerator ----------------------------------------------
