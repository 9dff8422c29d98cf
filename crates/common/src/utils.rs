//! Filesystem helpers for QC Vision
//!
//! Small utilities shared by the version registry and the training
//! orchestrator, which both move artifact directories around.

use std::fs;
use std::path::Path;

use crate::error::Result;

/// Recursively copies a directory tree.
///
/// The destination is created if missing; existing files are overwritten.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// Removes a directory tree if it exists; missing directories are not errors.
///
/// Also removes a dangling or live symlink at the path.
pub fn remove_dir_if_exists(path: &Path) -> Result<()> {
    // symlink_metadata so a link to a directory is unlinked, not traversed
    match fs::symlink_metadata(path) {
        Ok(meta) => {
            if meta.file_type().is_symlink() {
                remove_symlink(path)?;
            } else if meta.is_dir() {
                fs::remove_dir_all(path)?;
            } else {
                fs::remove_file(path)?;
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn remove_symlink(path: &Path) -> Result<()> {
    fs::remove_file(path)?;
    Ok(())
}

#[cfg(windows)]
fn remove_symlink(path: &Path) -> Result<()> {
    // Directory symlinks on Windows are removed as directories
    fs::remove_dir(path).or_else(|_| fs::remove_file(path))?;
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn remove_symlink(path: &Path) -> Result<()> {
    fs::remove_file(path)?;
    Ok(())
}

/// Moves a directory into place, falling back to copy-and-delete when the
/// rename crosses filesystems.
pub fn move_dir(src: &Path, dst: &Path) -> Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_dir_all(src, dst)?;
            fs::remove_dir_all(src)?;
            Ok(())
        }
    }
}
