//! Training orchestration for QC Vision
//!
//! Drives one training run end-to-end: precondition check, guard
//! acquisition, workspace staging, fit, best-effort optimized export,
//! registry commit, and guaranteed cleanup. The staging workspace and the
//! guard permit are both RAII values, so no failure path can leak either.

mod guard;

pub use guard::{TrainingGuard, TrainingPermit};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use common::utils::remove_dir_if_exists;
use common::{Error, ExportStatus, ModelType, Result, TrainingReport};
use config::training_defaults;
use corpus_store::CorpusAccessor;
use model_backend::{
    capability_for, default_exporter, FitOptions, CHECKPOINT_FILE_NAME, OPTIMIZED_DIR_NAME,
};
use model_registry::VersionRegistry;

/// Staging workspace exclusively owned by one in-flight training run
///
/// Removed on drop, so every exit path (success, fit failure, panic)
/// leaves no workspace behind.
struct StagingWorkspace {
    root: PathBuf,
}

impl StagingWorkspace {
    fn create(root: &Path) -> Result<Self> {
        // a leftover workspace from an interrupted process is stale state
        remove_dir_if_exists(root)?;
        fs::create_dir_all(root.join("good"))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn good_dir(&self) -> PathBuf {
        self.root.join("good")
    }

    fn bundle_dir(&self) -> PathBuf {
        self.root.join("bundle")
    }
}

impl Drop for StagingWorkspace {
    fn drop(&mut self) {
        if let Err(e) = remove_dir_if_exists(&self.root) {
            warn!(
                "Failed to remove staging workspace {}: {}",
                self.root.display(),
                e
            );
        }
    }
}

/// A training run whose preconditions passed and whose permit is held
///
/// Produced by [`TrainingOrchestrator::begin`]; the permit is released when
/// the prepared run is executed or dropped.
pub struct PreparedTraining {
    model_type: ModelType,
    samples: Vec<PathBuf>,
    permit: TrainingPermit,
}

impl PreparedTraining {
    /// Model type this run will train
    pub fn model_type(&self) -> ModelType {
        self.model_type
    }
}

/// Orchestrates training runs over the corpus, capability, and registry
pub struct TrainingOrchestrator {
    corpus: Arc<dyn CorpusAccessor>,
    registry: Arc<VersionRegistry>,
    guard: TrainingGuard,
    staging_root: PathBuf,
}

impl TrainingOrchestrator {
    /// Creates a new orchestrator.
    pub fn new(
        corpus: Arc<dyn CorpusAccessor>,
        registry: Arc<VersionRegistry>,
        guard: TrainingGuard,
        staging_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            corpus,
            registry,
            guard,
            staging_root: staging_root.into(),
        }
    }

    /// The guard this orchestrator consults
    pub fn guard(&self) -> &TrainingGuard {
        &self.guard
    }

    /// Checks preconditions and acquires the training permit.
    ///
    /// Fails with `InsufficientSamples` or `TrainingInProgress` without
    /// touching any resources, so the API layer can report both
    /// synchronously before handing the run to a worker.
    pub fn begin(&self, model_type: ModelType) -> Result<PreparedTraining> {
        let defaults = training_defaults(model_type);
        let samples = self.corpus.normal_samples()?;
        if samples.len() < defaults.min_normal_samples {
            return Err(Error::InsufficientSamples {
                required: defaults.min_normal_samples,
                found: samples.len(),
            });
        }

        let permit = self.guard.try_begin().ok_or(Error::TrainingInProgress)?;

        Ok(PreparedTraining {
            model_type,
            samples,
            permit,
        })
    }

    /// Runs a prepared training to completion.
    ///
    /// Long-running; call from a blocking context. The permit is released
    /// whatever the outcome.
    pub fn execute(&self, prepared: PreparedTraining) -> Result<TrainingReport> {
        let PreparedTraining {
            model_type,
            samples,
            permit,
        } = prepared;

        let result = self.run(model_type, &samples);
        drop(permit);
        result
    }

    /// Convenience wrapper: `begin` + `execute` in one call.
    pub fn train(&self, model_type: ModelType) -> Result<TrainingReport> {
        let prepared = self.begin(model_type)?;
        self.execute(prepared)
    }

    fn run(&self, model_type: ModelType, samples: &[PathBuf]) -> Result<TrainingReport> {
        let defaults = training_defaults(model_type);
        info!(
            "Starting {} training on {} normal samples",
            model_type,
            samples.len()
        );

        let staging = StagingWorkspace::create(&self.staging_root)?;
        let staged = stage_samples(samples, &staging.good_dir())?;

        let options = FitOptions {
            backbone: defaults.backbone.map(str::to_string),
            image_size: defaults.image_size,
            patch_size: defaults.patch_size,
            sampling_ratio: defaults.sampling_ratio,
        };

        let checkpoint = staging.bundle_dir().join(CHECKPOINT_FILE_NAME);
        capability_for(model_type)
            .fit(&staged, &options, &checkpoint)
            .map_err(|e| match e {
                Error::TrainingFailed(_) => e,
                other => Error::TrainingFailed(other.to_string()),
            })?;

        // Best-effort acceleration; a failed export never fails the run.
        let optimized_out = staging.bundle_dir().join(OPTIMIZED_DIR_NAME);
        let export = match default_exporter().export(&checkpoint, &optimized_out) {
            Ok(()) => ExportStatus::Exported,
            Err(e) => {
                warn!("Optimized export failed: {}", e);
                // a partial pair must not be committed as complete
                let _ = remove_dir_if_exists(&optimized_out);
                ExportStatus::Failed {
                    reason: e.to_string(),
                }
            }
        };

        let version = self.registry.next_version(model_type)?;
        self.registry.commit(model_type, version, &staging.bundle_dir())?;
        drop(staging);

        info!("Completed {} training as {}", model_type, version);

        Ok(TrainingReport {
            model_type,
            version,
            samples_used: samples.len(),
            export,
        })
    }
}

/// Copies the normal set into the staging directory.
///
/// Training reads copies, never the corpus originals. Staged names carry an
/// index prefix so same-named files from different corpus partitions cannot
/// collide.
fn stage_samples(samples: &[PathBuf], dest: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dest)?;

    let mut staged = Vec::with_capacity(samples.len());
    for (i, path) in samples.iter().enumerate() {
        let name = path
            .file_name()
            .ok_or_else(|| Error::Internal(format!("sample has no file name: {}", path.display())))?;
        let target = dest.join(format!("{:04}_{}", i, name.to_string_lossy()));
        fs::copy(path, &target)?;
        staged.push(target);
    }
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpus_store::FsCorpus;
    use image::RgbImage;
    use model_registry::AliasStrategy;

    struct Fixture {
        _tmp: tempfile::TempDir,
        ok_dir: PathBuf,
        staging_root: PathBuf,
        orchestrator: TrainingOrchestrator,
        registry: Arc<VersionRegistry>,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let ok_dir = tmp.path().join("data/ok");
        let staging_root = tmp.path().join("data/train_temp");
        fs::create_dir_all(&ok_dir).unwrap();

        let registry = Arc::new(
            VersionRegistry::new(tmp.path().join("models"), AliasStrategy::Copy).unwrap(),
        );
        let corpus = Arc::new(FsCorpus::new(&ok_dir));
        let orchestrator = TrainingOrchestrator::new(
            corpus,
            registry.clone(),
            TrainingGuard::new(),
            &staging_root,
        );

        Fixture {
            _tmp: tmp,
            ok_dir,
            staging_root,
            orchestrator,
            registry,
        }
    }

    fn write_ok_images(dir: &Path, count: u32) {
        fs::create_dir_all(dir).unwrap();
        for i in 0..count {
            let img = RgbImage::from_fn(64, 64, |x, y| {
                let v = 120 + ((x * 7 + y * 13 + i * 31) % 17) as u8;
                image::Rgb([v, v, v])
            });
            img.save(dir.join(format!("ok_{:03}.png", i))).unwrap();
        }
    }

    #[test]
    fn test_insufficient_samples_touches_nothing() {
        let fx = fixture();
        write_ok_images(&fx.ok_dir, 3);

        let err = fx.orchestrator.train(ModelType::Patchcore).unwrap_err();
        match err {
            Error::InsufficientSamples { required, found } => {
                assert_eq!(required, 10);
                assert_eq!(found, 3);
            }
            other => panic!("unexpected error: {}", other),
        }

        assert_eq!(fx.registry.current_version(ModelType::Patchcore).unwrap(), None);
        assert!(!fx.staging_root.exists());
        assert!(!fx.orchestrator.guard().is_active());
    }

    #[test]
    fn test_successful_training_commits_and_cleans_up() {
        let fx = fixture();
        write_ok_images(&fx.ok_dir, 12);

        let report = fx.orchestrator.train(ModelType::Patchcore).unwrap();
        assert_eq!(report.version, common::Version(1));
        assert_eq!(report.samples_used, 12);
        assert!(report.export.is_exported());

        let versions = fx.registry.list_versions(ModelType::Patchcore).unwrap();
        assert_eq!(versions.len(), 1);
        assert!(versions[0].has_checkpoint);
        assert!(fx.registry.optimized_available());

        // workspace cleanup invariant
        assert!(!fx.staging_root.exists());
        assert!(!fx.orchestrator.guard().is_active());

        // the next run is strictly version + 1
        let report = fx.orchestrator.train(ModelType::Patchcore).unwrap();
        assert_eq!(report.version, common::Version(2));
    }

    #[test]
    fn test_fit_failure_cleans_up_and_commits_nothing() {
        let fx = fixture();
        write_ok_images(&fx.ok_dir, 11);
        // one unreadable sample makes the fit fail
        fs::write(fx.ok_dir.join("zz_broken.jpg"), b"not an image").unwrap();

        let err = fx.orchestrator.train(ModelType::Patchcore).unwrap_err();
        assert!(matches!(err, Error::TrainingFailed(_)));

        assert_eq!(fx.registry.current_version(ModelType::Patchcore).unwrap(), None);
        assert!(!fx.staging_root.exists());
        assert!(!fx.orchestrator.guard().is_active());
    }

    #[test]
    fn test_guard_contention_fails_fast() {
        let fx = fixture();
        write_ok_images(&fx.ok_dir, 12);

        let first = fx.orchestrator.begin(ModelType::Patchcore).unwrap();
        assert_eq!(first.model_type(), ModelType::Patchcore);

        // a second attempt while the permit is held is refused with no side
        // effects
        let err = fx.orchestrator.begin(ModelType::Padim).unwrap_err();
        assert!(err.is_training_in_progress());
        assert_eq!(fx.registry.current_version(ModelType::Padim).unwrap(), None);

        // the first run still completes normally
        let report = fx.orchestrator.execute(first).unwrap();
        assert_eq!(report.version, common::Version(1));
        assert!(!fx.orchestrator.guard().is_active());
    }

    #[test]
    fn test_training_does_not_mutate_corpus() {
        let fx = fixture();
        write_ok_images(&fx.ok_dir, 10);
        let before: Vec<_> = fs::read_dir(&fx.ok_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();

        fx.orchestrator.train(ModelType::Padim).unwrap();

        let after: Vec<_> = fs::read_dir(&fx.ok_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(before.len(), after.len());
    }
}
