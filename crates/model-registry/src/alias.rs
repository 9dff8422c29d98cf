//! Alias strategy for the rollback pointer
//!
//! The `latest` alias points at the bundle a rollback selected. Platforms
//! differ in whether an unprivileged process may create symlinks, so the
//! strategy is probed once at startup: a true symlink where permitted,
//! directory copy-and-replace everywhere else.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use common::utils::{copy_dir_all, remove_dir_if_exists};
use common::Result;

/// How the active alias is materialized on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasStrategy {
    /// Alias is a directory symlink to the target bundle
    Symlink,

    /// Alias is a full copy of the target bundle
    Copy,
}

impl AliasStrategy {
    /// Probes whether symlinks can be created under the given root.
    ///
    /// Called once at startup; the result is carried for the process
    /// lifetime instead of re-probing (or shimming global primitives) on
    /// every alias operation.
    pub fn probe(root: &Path) -> AliasStrategy {
        if fs::create_dir_all(root).is_err() {
            return AliasStrategy::Copy;
        }

        let target = root.join(".alias-probe-target");
        let link = root.join(".alias-probe-link");
        let _ = remove_dir_if_exists(&target);
        let _ = remove_dir_if_exists(&link);

        let supported = fs::create_dir(&target).is_ok() && symlink_dir(&target, &link).is_ok();

        let _ = remove_dir_if_exists(&link);
        let _ = remove_dir_if_exists(&target);

        if supported {
            debug!("Symlink probe succeeded, aliases will be symlinks");
            AliasStrategy::Symlink
        } else {
            warn!("Symlink probe failed, aliases will be directory copies");
            AliasStrategy::Copy
        }
    }

    /// Replaces the alias so it resolves to the target bundle.
    ///
    /// The target itself is never modified; replacing the alias is the only
    /// destructive operation and it only destroys the previous alias.
    pub fn replace(&self, target: &Path, alias: &Path) -> Result<()> {
        remove_dir_if_exists(alias)?;
        match self {
            AliasStrategy::Symlink => {
                let absolute = fs::canonicalize(target)?;
                symlink_dir(&absolute, alias)?;
            }
            AliasStrategy::Copy => {
                copy_dir_all(target, alias)?;
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(not(any(unix, windows)))]
fn symlink_dir(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks not supported on this platform",
    ))
}
