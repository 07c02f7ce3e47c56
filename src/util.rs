//! A utility module for common file-system operations.
//!
//! All helpers tag failures with the [`FileOp`] step that failed so that
//! multi-step mutations can report exactly how far they got.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::error::{FileOp, KeyError};

/// The modification time of a file in seconds since the epoch, if the file
/// exists.
pub fn file_mtime(path: impl AsRef<Path>) -> Option<u32> {
    let meta = fs::metadata(path.as_ref()).ok()?;
    let mtime = meta.modified().ok()?;
    mtime
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .ok()
}

/// Set the modification time of a file to the given epoch time.
pub fn touch(path: impl AsRef<Path>, seconds: u32) -> Result<(), KeyError> {
    let path = path.as_ref();
    let file = fs::File::options()
        .append(true)
        .open(path)
        .map_err(|err| KeyError::io(FileOp::Touch, path, err))?;
    let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(seconds.into());
    file.set_modified(mtime)
        .map_err(|err| KeyError::io(FileOp::Touch, path, err))
}

/// Create a hard link.
pub fn hard_link(from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<(), KeyError> {
    let (from, to) = (from.as_ref(), to.as_ref());
    fs::hard_link(from, to).map_err(|err| KeyError::io(FileOp::Link, to, err))
}

/// Remove a file.
pub fn unlink(path: impl AsRef<Path>) -> Result<(), KeyError> {
    let path = path.as_ref();
    fs::remove_file(path).map_err(|err| KeyError::io(FileOp::Unlink, path, err))
}

/// Rename a file.
pub fn rename(old: impl AsRef<Path>, new: impl AsRef<Path>) -> Result<(), KeyError> {
    let (old, new) = (old.as_ref(), new.as_ref());
    fs::rename(old, new).map_err(|err| KeyError::io(FileOp::Rename, old, err))
}

/// Write a file in full, creating or truncating it.
pub fn write_file(path: impl AsRef<Path>, contents: &str) -> Result<(), KeyError> {
    let path = path.as_ref();
    fs::write(path, contents).map_err(|err| KeyError::io(FileOp::Write, path, err))
}

/// Read a file in full.
pub fn read_file(path: impl AsRef<Path>) -> Result<String, KeyError> {
    let path = path.as_ref();
    fs::read_to_string(path).map_err(|err| KeyError::io(FileOp::Read, path, err))
}

/// Copy `from` over `to` unless `to` already has identical contents.
///
/// Returns whether a copy took place.
pub fn copy_if_changed(from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<bool, KeyError> {
    let (from, to) = (from.as_ref(), to.as_ref());
    let src = fs::read(from).map_err(|err| KeyError::io(FileOp::Read, from, err))?;
    if let Ok(dst) = fs::read(to) {
        if src == dst {
            return Ok(false);
        }
    }
    fs::write(to, &src).map_err(|err| KeyError::io(FileOp::Copy, to, err))?;
    Ok(true)
}
