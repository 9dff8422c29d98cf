//! Quantized optimized export
//!
//! Derives the accelerated serving artifact from a reference checkpoint:
//! statistics are quantized to u8 and written as a weights file next to a
//! model definition and a metadata sidecar. The optimized backend trades
//! the anomaly map away for a smaller, faster scalar-only scorer.

use std::fs;
use std::path::Path;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::{Error, ModelType, Result};

use crate::statistics::{cell_deviations, cell_features, max_deviation, CheckpointFile};
use crate::{
    LoadedModel, ModelOutput, OptimizedExporter, OPTIMIZED_METADATA_FILE, OPTIMIZED_MODEL_FILE,
    OPTIMIZED_WEIGHTS_FILE,
};

/// Optimized artifact format revision
const OPTIMIZED_FORMAT: u32 = 1;

/// Color channels per cell
const CHANNELS: usize = 3;

/// Floor applied to dequantized standard deviations
const MIN_STD: f32 = 1e-3;

/// Metadata sidecar of the optimized pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizedMetadata {
    /// Artifact format revision
    pub format: u32,

    /// Architecture the artifact was derived from
    pub model_type: ModelType,

    /// Backbone hint recorded at training time
    pub backbone: Option<String>,

    /// Normalized image side length
    pub image_size: u32,

    /// Statistics patch side length
    pub patch_size: u32,

    /// Grid width in cells
    pub grid_width: u32,

    /// Grid height in cells
    pub grid_height: u32,

    /// Deviation value mapped to score 1.0
    pub score_scale: f32,

    /// Quantization scale for the mean tensor
    pub mean_scale: f32,

    /// Quantization zero point for the mean tensor
    pub mean_zero: f32,

    /// Quantization scale for the std tensor
    pub std_scale: f32,

    /// Quantization zero point for the std tensor
    pub std_zero: f32,

    /// Decision threshold the service applies
    pub threshold: f64,
}

impl OptimizedMetadata {
    fn cell_count(&self) -> usize {
        (self.grid_width * self.grid_height) as usize
    }
}

struct Quantized {
    scale: f32,
    zero: f32,
    values: Vec<u8>,
}

fn quantize(values: &[f32]) -> Quantized {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    let scale = if range > 0.0 { range / 255.0 } else { 1.0 };

    let quantized = values
        .iter()
        .map(|v| (((v - min) / scale).round().clamp(0.0, 255.0)) as u8)
        .collect();

    Quantized {
        scale,
        zero: min,
        values: quantized,
    }
}

fn dequantize(values: &[u8], scale: f32, zero: f32) -> Vec<f32> {
    values.iter().map(|q| *q as f32 * scale + zero).collect()
}

/// Exporter producing the quantized optimized pair
pub struct QuantizedExporter;

impl OptimizedExporter for QuantizedExporter {
    fn export(&self, checkpoint: &Path, out_dir: &Path) -> Result<()> {
        let raw = fs::read(checkpoint)?;
        let ckpt: CheckpointFile = serde_json::from_slice(&raw)?;
        ckpt.validate()?;

        let mean = quantize(&ckpt.mean);
        let std = quantize(&ckpt.std);

        fs::create_dir_all(out_dir)?;

        let mut weights = mean.values;
        weights.extend_from_slice(&std.values);
        fs::write(out_dir.join(OPTIMIZED_WEIGHTS_FILE), &weights)?;

        let metadata = OptimizedMetadata {
            format: OPTIMIZED_FORMAT,
            model_type: ckpt.model_type,
            backbone: ckpt.backbone.clone(),
            image_size: ckpt.image_size,
            patch_size: ckpt.patch_size,
            grid_width: ckpt.grid_width,
            grid_height: ckpt.grid_height,
            score_scale: ckpt.score_scale,
            mean_scale: mean.scale,
            mean_zero: mean.zero,
            std_scale: std.scale,
            std_zero: std.zero,
            threshold: 0.5,
        };
        fs::write(
            out_dir.join(OPTIMIZED_METADATA_FILE),
            serde_json::to_vec_pretty(&metadata)?,
        )?;
        fs::write(
            out_dir.join(OPTIMIZED_MODEL_FILE),
            model_definition_xml(&metadata),
        )?;

        info!(
            "Exported optimized {} artifact to {}",
            ckpt.model_type,
            out_dir.display()
        );

        Ok(())
    }
}

/// Structural model definition written alongside the weights.
fn model_definition_xml(meta: &OptimizedMetadata) -> String {
    format!(
        concat!(
            "<?xml version=\"1.0\"?>\n",
            "<net name=\"qc-vision-{}\" version=\"{}\">\n",
            "    <layers>\n",
            "        <layer id=\"0\" name=\"mean\" type=\"Const\" precision=\"U8\" shape=\"{},{},{}\"/>\n",
            "        <layer id=\"1\" name=\"std\" type=\"Const\" precision=\"U8\" shape=\"{},{},{}\"/>\n",
            "    </layers>\n",
            "</net>\n"
        ),
        meta.model_type,
        meta.format,
        meta.grid_height,
        meta.grid_width,
        CHANNELS,
        meta.grid_height,
        meta.grid_width,
        CHANNELS,
    )
}

/// A loaded optimized backend
pub struct QuantizedModel {
    meta: OptimizedMetadata,
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl QuantizedModel {
    /// Metadata the artifact was published with
    pub fn metadata(&self) -> &OptimizedMetadata {
        &self.meta
    }
}

/// Loads the optimized pair from a directory.
///
/// The caller is expected to have verified structural completeness (both
/// the model definition and the metadata sidecar present) before calling.
pub fn load_optimized(dir: &Path) -> Result<QuantizedModel> {
    let raw = fs::read(dir.join(OPTIMIZED_METADATA_FILE))?;
    let meta: OptimizedMetadata = serde_json::from_slice(&raw)?;

    if meta.format != OPTIMIZED_FORMAT {
        return Err(Error::Internal(format!(
            "unsupported optimized artifact format {}",
            meta.format
        )));
    }

    let weights = fs::read(dir.join(OPTIMIZED_WEIGHTS_FILE))?;
    let dims = meta.cell_count() * CHANNELS;
    if weights.len() != dims * 2 {
        return Err(Error::Internal(format!(
            "optimized weights are malformed: expected {} bytes, found {}",
            dims * 2,
            weights.len()
        )));
    }

    let mean = dequantize(&weights[..dims], meta.mean_scale, meta.mean_zero);
    let std: Vec<f32> = dequantize(&weights[dims..], meta.std_scale, meta.std_zero)
        .into_iter()
        .map(|v| v.max(MIN_STD))
        .collect();

    debug!("Loaded optimized artifact from {}", dir.display());

    Ok(QuantizedModel { meta, mean, std })
}

impl LoadedModel for QuantizedModel {
    fn score(&self, image: &DynamicImage) -> Result<ModelOutput> {
        let feature = cell_features(image, self.meta.image_size, self.meta.patch_size);
        let deviations = cell_deviations(&feature, &self.mean, &self.std, self.meta.cell_count());
        let raw = max_deviation(&deviations);
        let score = (raw / self.meta.score_scale).clamp(0.0, 1.0) as f64;

        // The optimized path serves the scalar only; heatmaps come from the
        // reference backend.
        Ok(ModelOutput {
            score: Some(score),
            anomaly_map: None,
        })
    }
}
