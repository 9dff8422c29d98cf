//! Trainable model capability for QC Vision
//!
//! This crate defines the seam between the lifecycle engine and the
//! anomaly-detection capability: `fit` produces a checkpoint artifact,
//! `load` turns a checkpoint back into a scoreable model, and the optimized
//! exporter derives an accelerated artifact from a checkpoint. The engine
//! treats everything behind these traits as a black box.
//!
//! The built-in capability models the per-patch feature statistics of the
//! normal set (mean and variance over a patch grid of normalized images).
//! Each supported architecture runs the same machinery with its own static
//! configuration; the capability table is closed and keyed by [`ModelType`].

mod optimized;
mod statistics;

pub use optimized::{load_optimized, OptimizedMetadata, QuantizedExporter, QuantizedModel};
pub use statistics::{CheckpointFile, FeatureStatsCapability, FeatureStatsModel};

use std::path::{Path, PathBuf};

use image::DynamicImage;

use common::{ModelType, Result};

/// File name of the reference checkpoint inside an artifact bundle
pub const CHECKPOINT_FILE_NAME: &str = "model.ckpt";

/// File extension the registry scans for when looking for checkpoints
pub const CHECKPOINT_EXTENSION: &str = "ckpt";

/// Directory name of the optimized export inside a bundle and at the
/// global publish location
pub const OPTIMIZED_DIR_NAME: &str = "openvino";

/// Model definition file of the optimized pair
pub const OPTIMIZED_MODEL_FILE: &str = "model.xml";

/// Weights file of the optimized export
pub const OPTIMIZED_WEIGHTS_FILE: &str = "model.bin";

/// Metadata sidecar of the optimized pair
pub const OPTIMIZED_METADATA_FILE: &str = "metadata.json";

/// Training options resolved from the static defaults table
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Feature-extractor backbone hint, recorded in the artifact
    pub backbone: Option<String>,

    /// Side length images are normalized to
    pub image_size: u32,

    /// Side length of the square statistics patch
    pub patch_size: u32,

    /// Variance shrinkage factor (blend toward the global variance)
    pub sampling_ratio: f64,
}

/// Per-cell anomaly values on the model's patch grid
///
/// Values are non-negative and uncalibrated; consumers normalize before
/// visualizing.
#[derive(Debug, Clone)]
pub struct AnomalyMap {
    /// Grid width in cells
    pub width: u32,

    /// Grid height in cells
    pub height: u32,

    /// Row-major cell values
    pub values: Vec<f32>,
}

/// Raw output of scoring one image
///
/// `score` is `None` when the backend produced output it could not reduce
/// to a scalar; the router turns that into a hard inference error instead
/// of guessing.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// Image-level anomaly score in `[0, 1]`, if interpretable
    pub score: Option<f64>,

    /// Per-cell anomaly map, when the backend produces one
    pub anomaly_map: Option<AnomalyMap>,
}

/// A loaded, ready-to-score representation of one model version
pub trait LoadedModel: Send + Sync {
    /// Scores a decoded image.
    fn score(&self, image: &DynamicImage) -> Result<ModelOutput>;
}

/// One architecture's train/load capability
pub trait ModelCapability: Send + Sync {
    /// Fits the model on the staged normal samples and writes the
    /// checkpoint artifact to `checkpoint_out`.
    fn fit(&self, samples: &[PathBuf], options: &FitOptions, checkpoint_out: &Path) -> Result<()>;

    /// Loads a checkpoint produced by [`ModelCapability::fit`].
    fn load(&self, checkpoint: &Path) -> Result<Box<dyn LoadedModel>>;
}

/// Best-effort derivation of an accelerated artifact from a checkpoint
pub trait OptimizedExporter: Send + Sync {
    /// Writes the optimized pair (`model.xml`, `model.bin`,
    /// `metadata.json`) into `out_dir`.
    fn export(&self, checkpoint: &Path, out_dir: &Path) -> Result<()>;
}

static PATCHCORE: FeatureStatsCapability = FeatureStatsCapability::new(ModelType::Patchcore);
static PADIM: FeatureStatsCapability = FeatureStatsCapability::new(ModelType::Padim);
static EFFICIENT_AD: FeatureStatsCapability = FeatureStatsCapability::new(ModelType::EfficientAd);

static EXPORTER: QuantizedExporter = QuantizedExporter;

/// Resolves the capability implementation for a model type.
///
/// The table is closed: every [`ModelType`] variant has an entry, so
/// resolution cannot fail at runtime.
pub fn capability_for(model_type: ModelType) -> &'static dyn ModelCapability {
    match model_type {
        ModelType::Patchcore => &PATCHCORE,
        ModelType::Padim => &PADIM,
        ModelType::EfficientAd => &EFFICIENT_AD,
    }
}

/// The exporter used for the best-effort optimized export step.
pub fn default_exporter() -> &'static dyn OptimizedExporter {
    &EXPORTER
}

#[cfg(test)]
pub(crate) mod testutil {
    use image::{DynamicImage, RgbImage};
    use std::path::{Path, PathBuf};

    /// Deterministic gray image with mild pseudo-noise
    pub fn noisy_image(side: u32, seed: u32) -> DynamicImage {
        let img = RgbImage::from_fn(side, side, |x, y| {
            let v = 120 + ((x * 7 + y * 13 + seed * 31) % 17) as u8;
            image::Rgb([v, v, v])
        });
        DynamicImage::ImageRgb8(img)
    }

    /// Uniform bright image, far outside the noisy-gray distribution
    pub fn anomalous_image(side: u32) -> DynamicImage {
        let img = RgbImage::from_fn(side, side, |_, _| image::Rgb([250, 250, 250]));
        DynamicImage::ImageRgb8(img)
    }

    /// Writes `count` noisy sample images into `dir`, returning their paths
    pub fn write_samples(dir: &Path, count: u32) -> Vec<PathBuf> {
        std::fs::create_dir_all(dir).unwrap();
        (0..count)
            .map(|i| {
                let path = dir.join(format!("sample_{:03}.png", i));
                noisy_image(64, i).save(&path).unwrap();
                path
            })
            .collect()
    }
}
