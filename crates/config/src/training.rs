//! Static per-model-type training defaults
//!
//! Each supported architecture trains with a fixed default configuration.
//! This is a compile-time table, not runtime configuration: the set of
//! supported model types is closed, and their hyperparameters are part of
//! the build.

use common::ModelType;

/// Default training hyperparameters for one model type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingDefaults {
    /// Minimum number of normal samples required before training starts
    pub min_normal_samples: usize,

    /// Feature-extractor backbone hint passed to the capability, if any
    pub backbone: Option<&'static str>,

    /// Side length images are normalized to before fitting
    pub image_size: u32,

    /// Side length of the square statistics patch, in pixels
    pub patch_size: u32,

    /// Fraction of patch cells sampled for score calibration
    pub sampling_ratio: f64,
}

/// Looks up the static training defaults for a model type.
pub fn training_defaults(model_type: ModelType) -> TrainingDefaults {
    match model_type {
        ModelType::Patchcore => TrainingDefaults {
            min_normal_samples: 10,
            backbone: Some("resnet18"),
            image_size: 256,
            patch_size: 8,
            sampling_ratio: 0.1,
        },
        ModelType::Padim => TrainingDefaults {
            min_normal_samples: 10,
            backbone: Some("resnet18"),
            image_size: 256,
            patch_size: 4,
            sampling_ratio: 0.1,
        },
        ModelType::EfficientAd => TrainingDefaults {
            min_normal_samples: 10,
            backbone: None,
            image_size: 256,
            patch_size: 2,
            sampling_ratio: 0.1,
        },
    }
}
