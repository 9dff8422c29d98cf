//! Per-patch Gaussian feature statistics
//!
//! The built-in trainable capability. `fit` models the normal set as a
//! per-cell Gaussian over a patch grid of normalized images and calibrates
//! a score scale from the worst training deviation, so unseen normal images
//! land at or below the fixed 0.5 decision threshold. `score` reports the
//! worst cell deviation plus the full cell map.

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::{Error, ModelType, Result};

use crate::{AnomalyMap, FitOptions, LoadedModel, ModelCapability, ModelOutput};

/// On-disk checkpoint format revision
const CHECKPOINT_FORMAT: u32 = 1;

/// Color channels per cell
const CHANNELS: usize = 3;

/// Floor applied to per-cell standard deviations
const MIN_STD: f32 = 1e-3;

/// Serialized checkpoint artifact of one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointFile {
    /// Checkpoint format revision
    pub format: u32,

    /// Architecture that produced this checkpoint
    pub model_type: ModelType,

    /// Backbone hint the run was configured with
    pub backbone: Option<String>,

    /// Normalized image side length
    pub image_size: u32,

    /// Statistics patch side length
    pub patch_size: u32,

    /// Grid width in cells
    pub grid_width: u32,

    /// Grid height in cells
    pub grid_height: u32,

    /// Per-cell per-channel feature means, row-major
    pub mean: Vec<f32>,

    /// Per-cell per-channel feature standard deviations, row-major
    pub std: Vec<f32>,

    /// Deviation value mapped to score 1.0
    pub score_scale: f32,
}

impl CheckpointFile {
    fn cell_count(&self) -> usize {
        (self.grid_width * self.grid_height) as usize
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.format != CHECKPOINT_FORMAT {
            return Err(Error::Internal(format!(
                "unsupported checkpoint format {}",
                self.format
            )));
        }
        let expected = self.cell_count() * CHANNELS;
        if self.mean.len() != expected || self.std.len() != expected {
            return Err(Error::Internal(format!(
                "checkpoint statistics are malformed: expected {} values, found {}/{}",
                expected,
                self.mean.len(),
                self.std.len()
            )));
        }
        if self.score_scale <= 0.0 {
            return Err(Error::Internal(
                "checkpoint score scale must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Feature-statistics capability for one architecture
pub struct FeatureStatsCapability {
    model_type: ModelType,
}

impl FeatureStatsCapability {
    /// Creates the capability for a model type.
    pub const fn new(model_type: ModelType) -> Self {
        Self { model_type }
    }
}

impl ModelCapability for FeatureStatsCapability {
    fn fit(&self, samples: &[PathBuf], options: &FitOptions, checkpoint_out: &Path) -> Result<()> {
        if samples.is_empty() {
            return Err(Error::TrainingFailed(
                "no samples were staged for training".to_string(),
            ));
        }
        if options.patch_size == 0 || options.image_size % options.patch_size != 0 {
            return Err(Error::TrainingFailed(format!(
                "patch size {} does not tile image size {}",
                options.patch_size, options.image_size
            )));
        }

        let grid = (options.image_size / options.patch_size) as usize;
        let dims = grid * grid * CHANNELS;

        let mut features = Vec::with_capacity(samples.len());
        for path in samples {
            let img = image::open(path).map_err(|e| {
                Error::TrainingFailed(format!("failed to read sample {}: {}", path.display(), e))
            })?;
            features.push(cell_features(&img, options.image_size, options.patch_size));
        }
        let n = features.len() as f32;

        let mut mean = vec![0f32; dims];
        for feature in &features {
            for (slot, value) in mean.iter_mut().zip(feature.iter()) {
                *slot += value;
            }
        }
        for slot in mean.iter_mut() {
            *slot /= n;
        }

        let mut var = vec![0f32; dims];
        for feature in &features {
            for ((slot, value), center) in var.iter_mut().zip(feature.iter()).zip(mean.iter()) {
                let d = value - center;
                *slot += d * d;
            }
        }
        for slot in var.iter_mut() {
            *slot /= n;
        }

        // Shrink per-cell variance toward the global variance; with few
        // samples per cell the raw estimate collapses to zero.
        let global_var = var.iter().sum::<f32>() / dims as f32;
        let shrink = options.sampling_ratio as f32;
        let std: Vec<f32> = var
            .iter()
            .map(|v| ((1.0 - shrink) * v + shrink * global_var).sqrt().max(MIN_STD))
            .collect();

        // Calibrate so the worst training sample lands exactly on the 0.5
        // decision threshold.
        let mut worst = 0f32;
        for feature in &features {
            let deviations = cell_deviations(feature, &mean, &std, grid * grid);
            worst = worst.max(max_deviation(&deviations));
        }
        let score_scale = (worst * 2.0).max(MIN_STD);

        let checkpoint = CheckpointFile {
            format: CHECKPOINT_FORMAT,
            model_type: self.model_type,
            backbone: options.backbone.clone(),
            image_size: options.image_size,
            patch_size: options.patch_size,
            grid_width: grid as u32,
            grid_height: grid as u32,
            mean,
            std,
            score_scale,
        };

        if let Some(parent) = checkpoint_out.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(checkpoint_out, serde_json::to_vec(&checkpoint)?)?;

        info!(
            "Fitted {} statistics over {} samples ({}x{} grid), checkpoint at {}",
            self.model_type,
            samples.len(),
            grid,
            grid,
            checkpoint_out.display()
        );

        Ok(())
    }

    fn load(&self, checkpoint: &Path) -> Result<Box<dyn LoadedModel>> {
        let model = FeatureStatsModel::from_file(checkpoint)?;
        if model.checkpoint.model_type != self.model_type {
            return Err(Error::Internal(format!(
                "checkpoint at {} was trained for {}, not {}",
                checkpoint.display(),
                model.checkpoint.model_type,
                self.model_type
            )));
        }
        debug!("Loaded reference checkpoint {}", checkpoint.display());
        Ok(Box::new(model))
    }
}

/// A loaded reference model backed by checkpoint statistics
pub struct FeatureStatsModel {
    checkpoint: CheckpointFile,
}

impl FeatureStatsModel {
    /// Reads and validates a checkpoint file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read(path)?;
        let checkpoint: CheckpointFile = serde_json::from_slice(&raw)?;
        checkpoint.validate()?;
        Ok(Self { checkpoint })
    }

    /// The checkpoint this model was loaded from
    pub fn checkpoint(&self) -> &CheckpointFile {
        &self.checkpoint
    }
}

impl LoadedModel for FeatureStatsModel {
    fn score(&self, image: &DynamicImage) -> Result<ModelOutput> {
        let ckpt = &self.checkpoint;
        let feature = cell_features(image, ckpt.image_size, ckpt.patch_size);
        let deviations = cell_deviations(&feature, &ckpt.mean, &ckpt.std, ckpt.cell_count());
        let raw = max_deviation(&deviations);
        let score = (raw / ckpt.score_scale).clamp(0.0, 1.0) as f64;

        Ok(ModelOutput {
            score: Some(score),
            anomaly_map: Some(AnomalyMap {
                width: ckpt.grid_width,
                height: ckpt.grid_height,
                values: deviations,
            }),
        })
    }
}

/// Mean pixel value per patch cell per channel, normalized to `[0, 1]`.
pub(crate) fn cell_features(img: &DynamicImage, image_size: u32, patch_size: u32) -> Vec<f32> {
    let rgb = img
        .resize_exact(image_size, image_size, FilterType::Triangle)
        .to_rgb8();
    let grid = (image_size / patch_size) as usize;
    let mut sums = vec![0f32; grid * grid * CHANNELS];

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let cell = (y / patch_size) as usize * grid + (x / patch_size) as usize;
        let base = cell * CHANNELS;
        sums[base] += pixel[0] as f32;
        sums[base + 1] += pixel[1] as f32;
        sums[base + 2] += pixel[2] as f32;
    }

    let area = (patch_size * patch_size) as f32 * 255.0;
    for sum in sums.iter_mut() {
        *sum /= area;
    }
    sums
}

/// Mean absolute z-score per cell, averaged over channels.
pub(crate) fn cell_deviations(
    feature: &[f32],
    mean: &[f32],
    std: &[f32],
    cells: usize,
) -> Vec<f32> {
    let mut deviations = Vec::with_capacity(cells);
    for cell in 0..cells {
        let base = cell * CHANNELS;
        let mut z = 0f32;
        for c in 0..CHANNELS {
            z += (feature[base + c] - mean[base + c]).abs() / std[base + c];
        }
        deviations.push(z / CHANNELS as f32);
    }
    deviations
}

pub(crate) fn max_deviation(deviations: &[f32]) -> f32 {
    deviations.iter().copied().fold(0f32, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{anomalous_image, noisy_image, write_samples};
    use crate::{capability_for, CHECKPOINT_FILE_NAME};

    fn fit_options() -> FitOptions {
        FitOptions {
            backbone: Some("resnet18".to_string()),
            image_size: 64,
            patch_size: 8,
            sampling_ratio: 0.1,
        }
    }

    #[test]
    fn test_fit_load_score() {
        let tmp = tempfile::tempdir().unwrap();
        let samples = write_samples(&tmp.path().join("good"), 12);
        let ckpt_path = tmp.path().join(CHECKPOINT_FILE_NAME);

        let capability = capability_for(ModelType::Patchcore);
        capability.fit(&samples, &fit_options(), &ckpt_path).unwrap();
        assert!(ckpt_path.exists());

        let model = capability.load(&ckpt_path).unwrap();

        let normal = model.score(&noisy_image(64, 3)).unwrap();
        let normal_score = normal.score.unwrap();
        assert!(normal_score <= 0.5, "normal score was {}", normal_score);

        let anomalous = model.score(&anomalous_image(64)).unwrap();
        let anomalous_score = anomalous.score.unwrap();
        assert!(
            anomalous_score > 0.5,
            "anomalous score was {}",
            anomalous_score
        );
        assert!(anomalous_score <= 1.0);

        let map = anomalous.anomaly_map.unwrap();
        assert_eq!(map.width, 8);
        assert_eq!(map.height, 8);
        assert_eq!(map.values.len(), 64);
    }

    #[test]
    fn test_fit_rejects_empty_sample_set() {
        let tmp = tempfile::tempdir().unwrap();
        let capability = capability_for(ModelType::Padim);
        let err = capability
            .fit(&[], &fit_options(), &tmp.path().join("model.ckpt"))
            .unwrap_err();
        assert!(matches!(err, Error::TrainingFailed(_)));
    }

    #[test]
    fn test_fit_rejects_unreadable_sample() {
        let tmp = tempfile::tempdir().unwrap();
        let bogus = tmp.path().join("not_an_image.jpg");
        fs::write(&bogus, b"definitely not a jpeg").unwrap();

        let capability = capability_for(ModelType::Patchcore);
        let err = capability
            .fit(&[bogus], &fit_options(), &tmp.path().join("model.ckpt"))
            .unwrap_err();
        assert!(matches!(err, Error::TrainingFailed(_)));
    }

    #[test]
    fn test_load_rejects_corrupt_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("model.ckpt");
        fs::write(&path, b"{not json").unwrap();

        let capability = capability_for(ModelType::Patchcore);
        assert!(capability.load(&path).is_err());
    }

    #[test]
    fn test_load_rejects_model_type_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let samples = write_samples(&tmp.path().join("good"), 10);
        let ckpt_path = tmp.path().join("model.ckpt");

        capability_for(ModelType::Patchcore)
            .fit(&samples, &fit_options(), &ckpt_path)
            .unwrap();
        assert!(capability_for(ModelType::Padim).load(&ckpt_path).is_err());
    }
}
