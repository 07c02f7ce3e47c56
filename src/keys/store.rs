//! The ordered collection of a zone's keys.

use std::path::Path;

use domain::base::iana::SecAlg;
use tracing::warn;

use crate::error::{FileOp, KeyError};
use crate::keys::file::{is_key_file_name, parse_key_file};
use crate::keys::record::{KeyRecord, KeyStatus};
use crate::util;

//------------ KeyStore ------------------------------------------------------

/// An insertion-ordered arena of [`KeyRecord`]s.
///
/// Records are kept in a total order: zone name first, then KSKs before
/// ZSKs, then creation time with the key tag as the tie break. Several
/// algorithms rely on this, notably the trust-anchor walk which must see
/// all KSKs before the first ZSK. Records are addressed by index; removal
/// shifts later indices down, so "the next record after a removal" is the
/// removal index itself.
#[derive(Debug, Default)]
pub struct KeyStore {
    records: Vec<KeyRecord>,
    skipped: Vec<String>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan a directory for public key files.
    ///
    /// Dot files and retired keys (lower-case leading `k`) are skipped.
    /// Malformed key files are skipped and recorded in [`Self::skipped`];
    /// the scan continues.
    pub fn load(dir: &Path, recursive: bool) -> Result<Self, KeyError> {
        let mut store = KeyStore::new();
        store.scan(dir, recursive)?;
        Ok(store)
    }

    fn scan(&mut self, dir: &Path, recursive: bool) -> Result<(), KeyError> {
        let entries =
            std::fs::read_dir(dir).map_err(|err| KeyError::io(FileOp::Scan, dir, err))?;
        let mut names: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();

        for name in names {
            if name.starts_with('.') {
                continue;
            }
            let path = dir.join(&name);
            if path.is_dir() {
                if recursive {
                    self.scan(&path, recursive)?;
                }
                continue;
            }
            if !is_key_file_name(&name) {
                continue;
            }
            match parse_key_file(dir, &name) {
                Ok(record) => self.insert(record),
                Err(err) => {
                    warn!("skipping '{}': {err}", path.display());
                    self.skipped.push(path.display().to_string());
                }
            }
        }
        Ok(())
    }

    /// Insert a record, maintaining the sort order.
    pub fn insert(&mut self, record: KeyRecord) {
        let key = record.sort_key();
        let pos = self
            .records
            .partition_point(|r| r.sort_key() <= key);
        self.records.insert(pos, record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&KeyRecord> {
        self.records.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut KeyRecord> {
        self.records.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyRecord> {
        self.records.iter()
    }

    /// Paths of key files the scan could not parse.
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Look a key up by tag and/or name.
    ///
    /// With a nonzero tag and no name, more than one match is an
    /// [`KeyError::Ambiguous`] outcome rather than a silent pick: tags are
    /// only unique per zone, and the caller asked across all of them. With
    /// a name given, the first record matching both wins.
    pub fn find_by_tag_or_name(
        &self,
        tag: u16,
        name: Option<&str>,
    ) -> Result<usize, KeyError> {
        if tag != 0 {
            match name {
                Some(name) => self
                    .records
                    .iter()
                    .position(|r| r.tag() == tag && r.name().eq_ignore_ascii_case(name))
                    .ok_or(KeyError::NotFound),
                None => {
                    let mut matches = self
                        .records
                        .iter()
                        .enumerate()
                        .filter(|(_, r)| r.tag() == tag);
                    let first = matches.next().ok_or(KeyError::NotFound)?;
                    if matches.next().is_some() {
                        return Err(KeyError::Ambiguous);
                    }
                    Ok(first.0)
                }
            }
        } else {
            let name = name.ok_or(KeyError::NotFound)?;
            self.records
                .iter()
                .position(|r| r.name().eq_ignore_ascii_case(name))
                .ok_or(KeyError::NotFound)
        }
    }

    /// The n-th (1-based, in store order) record matching role and status.
    pub fn nth_of(&self, ksk: bool, status: KeyStatus, n: usize) -> Option<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_ksk() == ksk && r.status() == status)
            .nth(n.checked_sub(1)?)
            .map(|(i, _)| i)
    }

    /// As [`Self::nth_of`] with an additional algorithm filter. Needed when
    /// a zone carries two algorithms concurrently.
    pub fn nth_of_algorithm(
        &self,
        ksk: bool,
        algorithm: SecAlg,
        status: KeyStatus,
        n: usize,
    ) -> Option<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                r.is_ksk() == ksk && r.algorithm() == algorithm && r.status() == status
            })
            .nth(n.checked_sub(1)?)
            .map(|(i, _)| i)
    }

    /// Retire a key: rename its backing files with a lower-case leading `k`
    /// so that future scans ignore them, and drop the record.
    ///
    /// The record formerly following the removed one now lives at the same
    /// index.
    pub fn remove(&mut self, index: usize) -> Result<(), KeyError> {
        let record = &self.records[index];
        for path in record.existing_paths() {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let mut retired = String::with_capacity(name.len());
            let mut chars = name.chars();
            if let Some(first) = chars.next() {
                retired.extend(first.to_lowercase());
            }
            retired.push_str(chars.as_str());
            util::rename(&path, path.with_file_name(retired))?;
        }
        self.records.remove(index);
        Ok(())
    }

    /// Delete all backing files of a key outright and drop the record.
    /// Irrecoverable.
    pub fn destroy(&mut self, index: usize) -> Result<(), KeyError> {
        let record = &self.records[index];
        for path in record.existing_paths() {
            util::unlink(&path)?;
        }
        self.records.remove(index);
        Ok(())
    }

    /// Perform a status transition.
    ///
    /// Requesting the current status is a no-op. Revocation (and
    /// re-activation of a revoked key) only toggles the revoke flag and
    /// rewrites the public key file; the private-side extension routing is
    /// untouched. All other transitions hard-link the private-side file to
    /// its new extension, unlink the old one and touch the `.key` file to
    /// either the preserved original time or `now`.
    ///
    /// The sequence is best-effort, not transactional: on failure the
    /// in-memory status is left unchanged and the error names the step
    /// that failed. A rescan converges, since status is derived from which
    /// files exist.
    pub fn set_status(
        &mut self,
        index: usize,
        target: KeyStatus,
        preserve_mtime: bool,
        now: u32,
    ) -> Result<(), KeyError> {
        let record = &mut self.records[index];
        let stamp = if preserve_mtime {
            record.file_time()
        } else {
            now
        };

        if target == KeyStatus::Revoked {
            if record.is_revoked() {
                return Ok(());
            }
            return record.set_revoked(true, stamp);
        }
        if record.is_revoked() && target == KeyStatus::Active {
            return record.set_revoked(false, stamp);
        }

        let current = record.ext_status();
        if current == target {
            return Ok(());
        }
        let Some(dest) = record.status_path(target) else {
            return Err(KeyError::CorruptState(format!(
                "key {} cannot transition to '{target}'",
                record.base_name()
            )));
        };

        // A SEP key has no private-side file yet; the `.key` file serves as
        // the link source and must stay in place.
        let (src, unlink_src) = match record.status_path(current) {
            Some(src) => (src, true),
            None => (record.key_path(), false),
        };

        util::hard_link(&src, &dest)?;
        if unlink_src {
            util::unlink(&src)?;
        }
        record.set_ext_status(target);
        util::touch(record.key_path(), stamp)?;
        record.set_file_time(stamp);
        Ok(())
    }
}
