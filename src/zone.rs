//! Zones and the set of zones of one run.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ZoneConfig;
use crate::error::{FileOp, KeyError};
use crate::keys::KeyStore;

//------------ ZoneRecord ----------------------------------------------------

/// One zone: its directory, configuration snapshot and keys.
#[derive(Debug)]
pub struct ZoneRecord {
    /// Canonical zone name: lower case, trailing dot.
    pub name: String,
    pub directory: PathBuf,
    pub conf: ZoneConfig,
    pub keys: KeyStore,
}

impl ZoneRecord {
    pub fn load(name: String, directory: PathBuf, conf: ZoneConfig) -> Result<Self, KeyError> {
        let keys = KeyStore::load(&directory, false)?;
        Ok(ZoneRecord {
            name,
            directory,
            conf,
            keys,
        })
    }

    /// The unsigned zone file.
    pub fn zone_file_path(&self) -> PathBuf {
        self.directory.join(&self.conf.zone_file)
    }

    /// The signed zone file; its mtime is the time of the last signing.
    pub fn signed_file_path(&self) -> PathBuf {
        self.directory.join(&self.conf.signed_file)
    }

    /// The aggregated DNSKEY file written before signing.
    pub fn keydb_path(&self) -> PathBuf {
        self.directory.join("dnskey.db")
    }

    /// The keyset file produced by the signer for this zone.
    pub fn keyset_file_name(&self) -> String {
        format!("keyset-{}", self.name)
    }

    /// The parent file coordinating a hierarchical KSK rollover.
    pub fn parent_file_name(&self) -> String {
        format!("parent-{}", self.name)
    }

    pub fn parent_file_path(&self) -> PathBuf {
        self.directory.join(self.parent_file_name())
    }

    /// The directory of the parent zone in hierarchical operation.
    pub fn parent_directory(&self) -> Option<PathBuf> {
        self.directory.parent().map(Path::to_path_buf)
    }

    /// Whether the zone one directory up is itself signed; hierarchical
    /// rollovers only make sense below a signed parent.
    pub fn parent_is_signed(&self) -> bool {
        self.parent_directory()
            .map(|dir| dir.join(&self.conf.signed_file).exists())
            .unwrap_or(false)
    }
}

//------------ ZoneStore -----------------------------------------------------

/// The zones of one batch run, ordered by name.
#[derive(Debug, Default)]
pub struct ZoneStore {
    zones: Vec<ZoneRecord>,
}

impl ZoneStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover zones under a directory.
    ///
    /// A directory is a zone when it contains the signed-zone artifact.
    /// With `recursive`, nested zone directories are discovered as well,
    /// which is the usual layout for hierarchical operation.
    pub fn discover(
        &mut self,
        dir: &Path,
        recursive: bool,
        conf: &ZoneConfig,
    ) -> Result<(), KeyError> {
        if dir.join(&conf.signed_file).exists() {
            let name = zone_name_from_dir(dir).ok_or_else(|| {
                KeyError::Parse(format!(
                    "cannot derive a zone name from '{}'",
                    dir.display()
                ))
            })?;
            debug!("found zone {name} in '{}'", dir.display());
            self.zones
                .push(ZoneRecord::load(name, dir.to_path_buf(), conf.clone())?);
        }

        if recursive {
            let entries =
                std::fs::read_dir(dir).map_err(|err| KeyError::io(FileOp::Scan, dir, err))?;
            let mut subdirs: Vec<_> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.is_dir()
                        && !p
                            .file_name()
                            .map(|n| n.to_string_lossy().starts_with('.'))
                            .unwrap_or(true)
                })
                .collect();
            subdirs.sort();
            for sub in subdirs {
                self.discover(&sub, recursive, conf)?;
            }
        }

        self.zones.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ZoneRecord> {
        self.zones.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ZoneRecord> {
        self.zones.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ZoneRecord> {
        self.zones.iter()
    }
}

/// Derive the canonical zone name from the directory name.
fn zone_name_from_dir(dir: &Path) -> Option<String> {
    let name = dir.file_name()?.to_str()?;
    if name.is_empty() {
        return None;
    }
    let mut name = name.to_lowercase();
    if !name.ends_with('.') {
        name.push('.');
    }
    Some(name)
}
