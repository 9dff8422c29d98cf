//! Durable model version registry for QC Vision
//!
//! Maps `(ModelType, Version)` to artifact bundles under the models root:
//!
//! ```text
//! models/<Display>/cable/v<N>/model.ckpt      version history (append-only)
//! models/<Display>/cable/latest/…             rollback alias
//! models/openvino/model.xml, metadata.json    global optimized pair
//! ```
//!
//! Versions are never overwritten or renumbered; the alias and the global
//! optimized pair are the only entries the registry ever replaces.

mod alias;

pub use alias::AliasStrategy;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{info, warn};
use walkdir::WalkDir;

use common::utils::{copy_dir_all, move_dir, remove_dir_if_exists};
use common::{Error, ModelType, Result, Version, VersionEntry};
use model_backend::{
    CHECKPOINT_EXTENSION, OPTIMIZED_DIR_NAME, OPTIMIZED_METADATA_FILE, OPTIMIZED_MODEL_FILE,
};

/// Dataset namespace segment between the model directory and its versions
pub const DATASET_DIR_NAME: &str = "cable";

/// Name of the rollback alias directory
pub const ACTIVE_ALIAS: &str = "latest";

/// Returns true if a directory holds a structurally complete optimized pair.
pub fn optimized_pair_complete(dir: &Path) -> bool {
    dir.join(OPTIMIZED_MODEL_FILE).is_file() && dir.join(OPTIMIZED_METADATA_FILE).is_file()
}

/// Registry over the durable model namespace
pub struct VersionRegistry {
    models_root: PathBuf,
    alias: AliasStrategy,
}

impl VersionRegistry {
    /// Opens (creating if needed) the registry at the given models root.
    pub fn new(models_root: impl Into<PathBuf>, alias: AliasStrategy) -> Result<Self> {
        let models_root = models_root.into();
        fs::create_dir_all(&models_root)?;
        Ok(Self { models_root, alias })
    }

    /// Root of the durable namespace
    pub fn models_root(&self) -> &Path {
        &self.models_root
    }

    /// Alias strategy selected at startup
    pub fn alias_strategy(&self) -> AliasStrategy {
        self.alias
    }

    /// Namespace directory for one model type
    pub fn model_dir(&self, model_type: ModelType) -> PathBuf {
        self.models_root.join(model_type.namespace())
    }

    /// Directory holding the numbered versions and the alias
    pub fn dataset_dir(&self, model_type: ModelType) -> PathBuf {
        self.model_dir(model_type).join(DATASET_DIR_NAME)
    }

    /// Directory of one version
    pub fn version_dir(&self, model_type: ModelType, version: Version) -> PathBuf {
        self.dataset_dir(model_type).join(version.dir_name())
    }

    /// The rollback alias directory
    pub fn alias_dir(&self, model_type: ModelType) -> PathBuf {
        self.dataset_dir(model_type).join(ACTIVE_ALIAS)
    }

    /// Global publish location of the optimized pair
    pub fn optimized_dir(&self) -> PathBuf {
        self.models_root.join(OPTIMIZED_DIR_NAME)
    }

    /// True when the global optimized pair is structurally complete
    pub fn optimized_available(&self) -> bool {
        optimized_pair_complete(&self.optimized_dir())
    }

    fn version_dirs(&self, model_type: ModelType) -> Result<Vec<(Version, PathBuf)>> {
        let dataset = self.dataset_dir(model_type);
        if !dataset.is_dir() {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        for entry in fs::read_dir(&dataset)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            // malformed or foreign entries (including the alias) are
            // ignored, not errors
            if let Some(version) = name.to_str().and_then(Version::parse_dir_name) {
                versions.push((version, entry.path()));
            }
        }
        versions.sort_by_key(|(version, _)| *version);
        Ok(versions)
    }

    /// Highest existing version for a model type, or `None` if no versions
    /// exist yet.
    pub fn current_version(&self, model_type: ModelType) -> Result<Option<Version>> {
        Ok(self
            .version_dirs(model_type)?
            .last()
            .map(|(version, _)| *version))
    }

    /// Version number the next training run will commit as.
    pub fn next_version(&self, model_type: ModelType) -> Result<Version> {
        Ok(self
            .current_version(model_type)?
            .map(|v| v.next())
            .unwrap_or(Version(1)))
    }

    /// All version entries for a model type, ascending.
    pub fn list_versions(&self, model_type: ModelType) -> Result<Vec<VersionEntry>> {
        let entries = self
            .version_dirs(model_type)?
            .into_iter()
            .map(|(version, path)| VersionEntry {
                version,
                has_checkpoint: find_checkpoint(&path).is_some(),
                path,
            })
            .collect();
        Ok(entries)
    }

    /// Checkpoint the reference loader should use for a model type.
    ///
    /// Prefers the rollback alias when present (so a rollback takes effect
    /// deterministically under either alias strategy), otherwise falls back
    /// to the most recently modified checkpoint in the namespace.
    pub fn preferred_checkpoint(&self, model_type: ModelType) -> Option<PathBuf> {
        let alias = self.alias_dir(model_type);
        if alias.exists() {
            if let Some(checkpoint) = find_checkpoint(&alias) {
                return Some(checkpoint);
            }
        }
        find_checkpoint(&self.model_dir(model_type))
    }

    /// True if any checkpoint exists anywhere under the model's namespace.
    pub fn has_any_checkpoint(&self, model_type: ModelType) -> bool {
        find_checkpoint(&self.model_dir(model_type)).is_some()
    }

    /// Commits a staged bundle as a new version, append-only.
    ///
    /// The bundle directory is moved into place; a bundle carrying a
    /// complete optimized pair also refreshes the global publish location.
    /// Returns the committed version directory.
    pub fn commit(
        &self,
        model_type: ModelType,
        version: Version,
        bundle: &Path,
    ) -> Result<PathBuf> {
        let dataset = self.dataset_dir(model_type);
        fs::create_dir_all(&dataset)?;

        let dest = dataset.join(version.dir_name());
        if dest.exists() {
            return Err(Error::Internal(format!(
                "version {} already exists for {}, refusing to overwrite",
                version, model_type
            )));
        }

        move_dir(bundle, &dest)?;

        let bundle_optimized = dest.join(OPTIMIZED_DIR_NAME);
        if optimized_pair_complete(&bundle_optimized) {
            self.publish_optimized(&bundle_optimized)?;
        }

        info!("Committed {} {} at {}", model_type, version, dest.display());
        Ok(dest)
    }

    /// Rolls the active alias back to an existing version.
    ///
    /// Fails with `VersionNotFound` when the version directory is missing
    /// or holds no checkpoint; the alias is untouched in that case. The
    /// global optimized pair is synchronized with the target bundle so both
    /// backends serve the rolled-back version.
    pub fn rollback(&self, model_type: ModelType, version: Version) -> Result<()> {
        let version_dir = self.version_dir(model_type, version);
        if !version_dir.is_dir() {
            return Err(Error::VersionNotFound {
                model_type,
                version,
            });
        }
        if find_checkpoint(&version_dir).is_none() {
            warn!(
                "Rollback target {} {} has no checkpoint",
                model_type, version
            );
            return Err(Error::VersionNotFound {
                model_type,
                version,
            });
        }

        self.alias.replace(&version_dir, &self.alias_dir(model_type))?;

        let bundle_optimized = version_dir.join(OPTIMIZED_DIR_NAME);
        if optimized_pair_complete(&bundle_optimized) {
            self.publish_optimized(&bundle_optimized)?;
        } else {
            remove_dir_if_exists(&self.optimized_dir())?;
        }

        info!("Rolled back {} to {}", model_type, version);
        Ok(())
    }

    fn publish_optimized(&self, source: &Path) -> Result<()> {
        let dest = self.optimized_dir();
        remove_dir_if_exists(&dest)?;
        copy_dir_all(source, &dest)?;
        Ok(())
    }
}

/// Most recently modified checkpoint file under a directory, if any.
fn find_checkpoint(dir: &Path) -> Option<PathBuf> {
    if !dir.exists() {
        return None;
    }

    WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case(CHECKPOINT_EXTENSION))
                .unwrap_or(false)
        })
        .filter_map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|meta| meta.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, entry.into_path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn registry(tmp: &tempfile::TempDir) -> VersionRegistry {
        VersionRegistry::new(tmp.path().join("models"), AliasStrategy::Copy).unwrap()
    }

    fn make_version(reg: &VersionRegistry, model_type: ModelType, n: u32, with_ckpt: bool) {
        let dir = reg.version_dir(model_type, Version(n));
        fs::create_dir_all(&dir).unwrap();
        if with_ckpt {
            fs::write(dir.join("model.ckpt"), format!("ckpt-v{}", n)).unwrap();
        }
    }

    #[test]
    fn test_empty_namespace() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(&tmp);

        assert_eq!(reg.current_version(ModelType::Patchcore).unwrap(), None);
        assert_eq!(reg.next_version(ModelType::Patchcore).unwrap(), Version(1));
        assert!(reg.list_versions(ModelType::Patchcore).unwrap().is_empty());
        assert!(!reg.has_any_checkpoint(ModelType::Patchcore));
        assert!(reg.preferred_checkpoint(ModelType::Patchcore).is_none());
    }

    #[test]
    fn test_scan_ignores_malformed_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(&tmp);
        make_version(&reg, ModelType::Patchcore, 1, true);
        make_version(&reg, ModelType::Patchcore, 3, false);

        let dataset = reg.dataset_dir(ModelType::Patchcore);
        for junk in ["latest", "v03", "vx", "scratch"] {
            fs::create_dir_all(dataset.join(junk)).unwrap();
        }
        fs::write(dataset.join("v9"), b"a file, not a directory").unwrap();

        assert_eq!(
            reg.current_version(ModelType::Patchcore).unwrap(),
            Some(Version(3))
        );
        assert_eq!(reg.next_version(ModelType::Patchcore).unwrap(), Version(4));

        let versions = reg.list_versions(ModelType::Patchcore).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version, Version(1));
        assert!(versions[0].has_checkpoint);
        assert_eq!(versions[1].version, Version(3));
        assert!(!versions[1].has_checkpoint);
    }

    #[test]
    fn test_namespaces_are_partitioned_by_model_type() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(&tmp);
        make_version(&reg, ModelType::Patchcore, 2, true);

        assert_eq!(reg.current_version(ModelType::Padim).unwrap(), None);
        assert!(!reg.has_any_checkpoint(ModelType::Padim));
        assert!(reg.has_any_checkpoint(ModelType::Patchcore));
    }

    #[test]
    fn test_commit_moves_bundle_and_publishes_optimized() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(&tmp);

        let bundle = tmp.path().join("staging/bundle");
        fs::create_dir_all(bundle.join(OPTIMIZED_DIR_NAME)).unwrap();
        fs::write(bundle.join("model.ckpt"), b"ckpt").unwrap();
        fs::write(bundle.join(OPTIMIZED_DIR_NAME).join(OPTIMIZED_MODEL_FILE), b"<net/>").unwrap();
        fs::write(bundle.join(OPTIMIZED_DIR_NAME).join(OPTIMIZED_METADATA_FILE), b"{}").unwrap();

        let dest = reg.commit(ModelType::Patchcore, Version(1), &bundle).unwrap();

        assert!(!bundle.exists());
        assert!(dest.join("model.ckpt").exists());
        assert_eq!(
            reg.current_version(ModelType::Patchcore).unwrap(),
            Some(Version(1))
        );
        assert!(reg.optimized_available());
    }

    #[test]
    fn test_commit_refuses_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(&tmp);
        make_version(&reg, ModelType::Patchcore, 1, true);

        let bundle = tmp.path().join("bundle");
        fs::create_dir_all(&bundle).unwrap();
        fs::write(bundle.join("model.ckpt"), b"ckpt").unwrap();

        let err = reg
            .commit(ModelType::Patchcore, Version(1), &bundle)
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        // bundle untouched, history untouched
        assert!(bundle.exists());
        assert_eq!(
            fs::read(reg.version_dir(ModelType::Patchcore, Version(1)).join("model.ckpt")).unwrap(),
            b"ckpt-v1"
        );
    }

    #[test]
    fn test_rollback_missing_version() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(&tmp);
        make_version(&reg, ModelType::Patchcore, 1, true);

        let err = reg.rollback(ModelType::Patchcore, Version(9)).unwrap_err();
        assert!(err.is_version_not_found());
        assert!(!reg.alias_dir(ModelType::Patchcore).exists());
    }

    #[test]
    fn test_rollback_checkpointless_version() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(&tmp);
        make_version(&reg, ModelType::Patchcore, 1, false);

        let err = reg.rollback(ModelType::Patchcore, Version(1)).unwrap_err();
        assert!(err.is_version_not_found());
        assert!(!reg.alias_dir(ModelType::Patchcore).exists());
    }

    #[test]
    fn test_rollback_selects_target_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(&tmp);
        make_version(&reg, ModelType::Patchcore, 1, true);
        thread::sleep(Duration::from_millis(20));
        make_version(&reg, ModelType::Patchcore, 2, true);

        // without an alias, the newest checkpoint wins
        let preferred = reg.preferred_checkpoint(ModelType::Patchcore).unwrap();
        assert_eq!(fs::read(&preferred).unwrap(), b"ckpt-v2");

        reg.rollback(ModelType::Patchcore, Version(1)).unwrap();

        let preferred = reg.preferred_checkpoint(ModelType::Patchcore).unwrap();
        assert_eq!(fs::read(&preferred).unwrap(), b"ckpt-v1");

        // the original version entry is untouched, so rollback is repeatable
        assert!(reg.version_dir(ModelType::Patchcore, Version(1)).join("model.ckpt").exists());
        reg.rollback(ModelType::Patchcore, Version(2)).unwrap();
        let preferred = reg.preferred_checkpoint(ModelType::Patchcore).unwrap();
        assert_eq!(fs::read(&preferred).unwrap(), b"ckpt-v2");
    }

    #[test]
    fn test_rollback_synchronizes_optimized_pair() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(&tmp);

        // v1 with an optimized pair, committed through the registry
        let bundle = tmp.path().join("bundle1");
        fs::create_dir_all(bundle.join(OPTIMIZED_DIR_NAME)).unwrap();
        fs::write(bundle.join("model.ckpt"), b"ckpt-1").unwrap();
        fs::write(bundle.join(OPTIMIZED_DIR_NAME).join(OPTIMIZED_MODEL_FILE), b"<net v1/>").unwrap();
        fs::write(bundle.join(OPTIMIZED_DIR_NAME).join(OPTIMIZED_METADATA_FILE), b"{\"v\":1}").unwrap();
        reg.commit(ModelType::Patchcore, Version(1), &bundle).unwrap();

        // v2 without one
        make_version(&reg, ModelType::Patchcore, 2, true);

        assert!(reg.optimized_available());

        // rolling back to the export-less version removes the stale pair
        reg.rollback(ModelType::Patchcore, Version(2)).unwrap();
        assert!(!reg.optimized_available());

        // and rolling forward restores it from the bundle
        reg.rollback(ModelType::Patchcore, Version(1)).unwrap();
        assert!(reg.optimized_available());
        assert_eq!(
            fs::read(reg.optimized_dir().join(OPTIMIZED_METADATA_FILE)).unwrap(),
            b"{\"v\":1}"
        );
    }
}
