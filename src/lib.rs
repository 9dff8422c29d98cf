//! Main integration module for QC Vision
//!
//! Wires the lifecycle components together (corpus, registry, guard,
//! orchestrator, router, scheduler) and owns the ordering guarantee that
//! a registry commit happens before the router reload that makes it
//! observable.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use api_gateway::ApiContext;
use common::{ModelType, Result, TrainingReport, Version};
use config::EngineConfig;
use corpus_store::{CorpusAccessor, FsCorpus};
use inference_engine::InferenceRouter;
use model_registry::{AliasStrategy, VersionRegistry};
use retrain_scheduler::RetrainScheduler;
use training_engine::{TrainingGuard, TrainingOrchestrator};

/// Initializes the global tracing subscriber.
///
/// Called once from the binary entry point; tests leave it untouched.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}

/// The assembled lifecycle engine
pub struct Engine {
    config: EngineConfig,
    corpus: Arc<dyn CorpusAccessor>,
    registry: Arc<VersionRegistry>,
    guard: TrainingGuard,
    orchestrator: Arc<TrainingOrchestrator>,
    router: Arc<InferenceRouter>,
}

impl Engine {
    /// Builds the engine from a loaded configuration.
    ///
    /// Probes the alias strategy once, creates the corpus and model roots,
    /// and attempts an initial backend load for the default model type.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.ensure_directories()?;

        let alias = AliasStrategy::probe(&config.models_root);
        let registry = Arc::new(VersionRegistry::new(config.models_root.clone(), alias)?);
        let corpus: Arc<dyn CorpusAccessor> = Arc::new(FsCorpus::new(config.ok_dir()));
        let guard = TrainingGuard::new();
        let orchestrator = Arc::new(TrainingOrchestrator::new(
            corpus.clone(),
            registry.clone(),
            guard.clone(),
            config.staging_root(),
        ));
        let router = Arc::new(InferenceRouter::new(
            registry.clone(),
            config.retrain.model_type,
        ));

        info!(
            "Engine initialized: corpus at {}, models at {}",
            config.data_root.display(),
            config.models_root.display()
        );

        Ok(Self {
            config,
            corpus,
            registry,
            guard,
            orchestrator,
            router,
        })
    }

    /// The loaded configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The version registry
    pub fn registry(&self) -> Arc<VersionRegistry> {
        self.registry.clone()
    }

    /// The inference router
    pub fn router(&self) -> Arc<InferenceRouter> {
        self.router.clone()
    }

    /// The training orchestrator
    pub fn orchestrator(&self) -> Arc<TrainingOrchestrator> {
        self.orchestrator.clone()
    }

    /// The global training guard
    pub fn guard(&self) -> TrainingGuard {
        self.guard.clone()
    }

    /// Runs a full training synchronously and reloads the router.
    ///
    /// Long-running; call from a blocking context. The registry commit
    /// happens before the reload, so no predict can observe a version the
    /// registry does not know about.
    pub fn train(&self, model_type: ModelType) -> Result<TrainingReport> {
        let report = self.orchestrator.train(model_type)?;
        self.router.reload(model_type)?;
        Ok(report)
    }

    /// Rolls back to a prior version and reloads the router.
    pub fn rollback(&self, model_type: ModelType, version: Version) -> Result<()> {
        self.registry.rollback(model_type, version)?;
        self.router.reload(model_type)
    }

    /// Handler context for the API server.
    pub fn api_context(&self) -> Arc<ApiContext> {
        Arc::new(ApiContext {
            orchestrator: self.orchestrator.clone(),
            router: self.router.clone(),
            registry: self.registry.clone(),
            guard: self.guard.clone(),
            default_model_type: self.config.retrain.model_type,
        })
    }

    /// Spawns the daily retraining scheduler, if enabled.
    pub fn spawn_scheduler(&self) -> Option<JoinHandle<()>> {
        if !self.config.retrain.enabled {
            info!("Retraining scheduler disabled by configuration");
            return None;
        }

        let scheduler = Arc::new(RetrainScheduler::new(
            self.corpus.clone(),
            self.orchestrator.clone(),
            self.router.clone(),
            self.config.retrain.clone(),
        ));
        Some(scheduler.spawn())
    }
}
