//! Local filesystem primitives used by the file-ops executor and the
//! transfer planner. All functions are synchronous; queueing and
//! prioritization happen in the caller.

use std::fs;
use std::io;
use std::path::Path;

use log::{debug, warn};
use serde::Serialize;

use crate::errors::Result;

const EXDEV: i32 = 18;

/// Copy a file or directory. An existing target is replaced when
/// `overwrite` is set and kept untouched otherwise.
pub fn copy_path(src: &Path, tgt: &Path, overwrite: bool) -> Result<()> {
    if src == tgt {
        return Ok(());
    }
    if tgt.exists() && !overwrite {
        debug!("target {:?} exists, copy skipped", tgt);
        return Ok(());
    }
    if let Some(parent) = tgt.parent() {
        fs::create_dir_all(parent)?;
    }
    if src.is_dir() {
        copy_dir(src, tgt)?;
    } else {
        fs::copy(src, tgt)?;
    }
    Ok(())
}

fn copy_dir(src: &Path, tgt: &Path) -> io::Result<()> {
    fs::create_dir_all(tgt)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let dest = tgt.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), dest)?;
        }
    }
    Ok(())
}

/// Move a file or directory, replacing an existing target.
///
/// An atomic rename is attempted first. When the rename crosses a
/// filesystem boundary the move degrades to copy-and-unlink, and a file
/// move that turns out to target a directory degrades to a directory move.
pub fn move_path(src: &Path, tgt: &Path) -> Result<()> {
    if src == tgt {
        return Ok(());
    }
    if let Some(parent) = tgt.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(src, tgt) {
        Ok(()) => Ok(()),
        Err(ref e) if e.raw_os_error() == Some(EXDEV) => {
            warn!(
                "atomic move of {:?} not supported, falling back to plain move",
                src
            );
            plain_move(src, tgt)
        }
        Err(e) => Err(e.into()),
    }
}

/// Non-atomic move: copy then unlink the source.
pub fn plain_move(src: &Path, tgt: &Path) -> Result<()> {
    if src.is_dir() {
        warn!("moving a directory as a file, degrading to directory move");
        copy_dir(src, tgt)?;
        fs::remove_dir_all(src)?;
    } else {
        if tgt.is_dir() {
            fs::remove_dir_all(tgt)?;
        }
        fs::copy(src, tgt)?;
        fs::remove_file(src)?;
    }
    Ok(())
}

/// Delete a path. Directories that report non-empty are walked
/// recursively.
pub fn delete_path(path: &Path) -> Result<()> {
    if !path.exists() {
        debug!("path {:?} not deleted, does not exist", path);
        return Ok(());
    }
    if path.is_dir() {
        match fs::remove_dir(path) {
            Ok(()) => Ok(()),
            Err(_) => {
                // non-empty directories must be removed recursively
                fs::remove_dir_all(path)?;
                Ok(())
            }
        }
    } else {
        fs::remove_file(path)?;
        Ok(())
    }
}

/// Write a serializable object to a file as JSON.
pub fn serialize_to_file<T: Serialize>(value: &T, tgt: &Path) -> Result<()> {
    if let Some(parent) = tgt.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(tgt)?;
    ::serde_json::to_writer(file, value)?;
    Ok(())
}
