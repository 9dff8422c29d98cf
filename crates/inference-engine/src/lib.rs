//! Inference routing for QC Vision
//!
//! Holds the currently loaded backend for the active model type and
//! resolves predict requests against it. Backend selection happens at load
//! time (process start, after every training, after every rollback) and is
//! cached until the next reload:
//!
//! 1. a structurally complete optimized pair at the global publish location,
//! 2. otherwise the preferred reference checkpoint for the model type,
//! 3. otherwise no backend; predict fails with `ModelNotLoaded`.
//!
//! Reload is a full replace: the new backend is built completely before it
//! is swapped in, and in-flight predicts keep scoring against the backend
//! they resolved.

mod heatmap;

pub use heatmap::overlay_data_url;

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use common::{
    Error, InferenceMethod, Label, ModelAvailability, ModelType, Prediction, Result,
};
use model_backend::{capability_for, load_optimized, LoadedModel};
use model_registry::VersionRegistry;

struct ActiveBackend {
    method: InferenceMethod,
    model: Box<dyn LoadedModel>,
}

struct RouterState {
    model_type: ModelType,
    backend: Option<Arc<ActiveBackend>>,
}

/// Routes predict requests to the loaded backend
pub struct InferenceRouter {
    registry: Arc<VersionRegistry>,
    state: RwLock<RouterState>,
}

impl InferenceRouter {
    /// Creates a router and attempts an initial load for the default model
    /// type. A missing model is not an error at startup; the router simply
    /// reports `ModelNotLoaded` until a training run completes.
    pub fn new(registry: Arc<VersionRegistry>, default_model_type: ModelType) -> Self {
        let router = Self {
            registry,
            state: RwLock::new(RouterState {
                model_type: default_model_type,
                backend: None,
            }),
        };
        if let Err(e) = router.reload(default_model_type) {
            warn!("No inference backend loaded at startup: {}", e);
        }
        router
    }

    /// Rebuilds the backend for a model type and swaps it in.
    ///
    /// The replacement is built fully before the swap, so a concurrent
    /// predict never observes a half-initialized backend.
    pub fn reload(&self, model_type: ModelType) -> Result<()> {
        let backend = self.build_backend(model_type)?;
        let loaded = backend.is_some();

        *self.state.write() = RouterState {
            model_type,
            backend: backend.map(Arc::new),
        };

        if loaded {
            info!("Inference backend ready for {}", model_type);
        } else {
            info!("No {} model found. Training required.", model_type);
        }
        Ok(())
    }

    fn build_backend(&self, model_type: ModelType) -> Result<Option<ActiveBackend>> {
        if self.registry.optimized_available() {
            debug!("Loading optimized backend");
            let model = load_optimized(&self.registry.optimized_dir())?;
            return Ok(Some(ActiveBackend {
                method: InferenceMethod::Optimized,
                model: Box::new(model),
            }));
        }

        if let Some(checkpoint) = self.registry.preferred_checkpoint(model_type) {
            debug!("Loading checkpoint {}", checkpoint.display());
            let model = capability_for(model_type).load(&checkpoint)?;
            return Ok(Some(ActiveBackend {
                method: InferenceMethod::Reference,
                model,
            }));
        }

        Ok(None)
    }

    /// Model type the router currently serves
    pub fn active_model_type(&self) -> ModelType {
        self.state.read().model_type
    }

    /// Whether any backend is loaded
    pub fn is_loaded(&self) -> bool {
        self.state.read().backend.is_some()
    }

    /// Method of the loaded backend, if any
    pub fn active_method(&self) -> Option<InferenceMethod> {
        self.state.read().backend.as_ref().map(|b| b.method)
    }

    /// Scores an image file against the loaded backend.
    pub fn predict(&self, image_path: &Path) -> Result<Prediction> {
        let backend = self
            .state
            .read()
            .backend
            .clone()
            .ok_or(Error::ModelNotLoaded)?;

        let image = image::open(image_path).map_err(|e| {
            Error::Inference(format!(
                "failed to load image {}: {}",
                image_path.display(),
                e
            ))
        })?;

        let output = backend.model.score(&image)?;
        let score = output.score.ok_or_else(|| {
            Error::Inference("model output did not contain an interpretable score".to_string())
        })?;
        let score = round4(score);
        let label = Label::from_score(score);

        // the overlay is operator visualization only; a rendering failure
        // drops the heatmap, never the prediction
        let heatmap = match (backend.method, output.anomaly_map) {
            (InferenceMethod::Reference, Some(map)) => {
                match heatmap::overlay_data_url(&image, &map) {
                    Ok(url) => Some(url),
                    Err(e) => {
                        warn!("Heatmap generation failed: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(Prediction {
            score,
            label,
            method: backend.method,
            heatmap,
        })
    }

    /// Availability summary for every supported model type.
    pub fn available_models(&self) -> Vec<ModelAvailability> {
        let active = self.active_model_type();
        ModelType::ALL
            .iter()
            .map(|model_type| ModelAvailability {
                model_type: *model_type,
                name: model_type.display_name().to_string(),
                trained: self.registry.has_any_checkpoint(*model_type),
                active: *model_type == active,
            })
            .collect()
    }
}

fn round4(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}
