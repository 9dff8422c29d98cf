//! Daily retraining trigger for QC Vision
//!
//! Fires at a fixed local time of day (not a fixed interval, so drift
//! relative to the wall clock is acceptable). A tick retrains the default
//! model type only when normal samples were added since local midnight;
//! contention with a manual run is logged and dropped: no backlog, no
//! catch-up before the next scheduled tick.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local, NaiveTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use common::Error;
use config::RetrainConfig;
use corpus_store::CorpusAccessor;
use inference_engine::InferenceRouter;
use training_engine::TrainingOrchestrator;

/// Fallback wait when the configured time of day cannot be represented
const FALLBACK_WAIT: Duration = Duration::from_secs(3600);

/// Periodic trigger that keeps the active model fresh
pub struct RetrainScheduler {
    corpus: Arc<dyn CorpusAccessor>,
    orchestrator: Arc<TrainingOrchestrator>,
    router: Arc<InferenceRouter>,
    config: RetrainConfig,
}

impl RetrainScheduler {
    /// Creates a scheduler over the shared engine components.
    pub fn new(
        corpus: Arc<dyn CorpusAccessor>,
        orchestrator: Arc<TrainingOrchestrator>,
        router: Arc<InferenceRouter>,
        config: RetrainConfig,
    ) -> Self {
        Self {
            corpus,
            orchestrator,
            router,
            config,
        }
    }

    /// Spawns the scheduler loop onto the async runtime.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Retraining scheduler armed for {:02}:{:02} local time, model type {}",
                self.config.hour, self.config.minute, self.config.model_type
            );
            loop {
                let wait = self.duration_until_tick(Local::now());
                tokio::time::sleep(wait).await;
                self.tick().await;
            }
        })
    }

    /// Time to sleep until the next occurrence of the configured time of
    /// day.
    pub fn duration_until_tick(&self, now: DateTime<Local>) -> Duration {
        let target_time = match NaiveTime::from_hms_opt(self.config.hour, self.config.minute, 0) {
            Some(t) => t,
            None => return FALLBACK_WAIT,
        };

        let now_naive = now.naive_local();
        let mut target = now.date_naive().and_time(target_time);
        if target <= now_naive {
            target = target + chrono::Duration::days(1);
        }

        (target - now_naive).to_std().unwrap_or(FALLBACK_WAIT)
    }

    /// One scheduler tick.
    ///
    /// Counts normal samples added since local midnight; zero means no
    /// action at all. Otherwise a full training run is attempted on a
    /// blocking worker and the router reloaded on success.
    pub async fn tick(&self) {
        let midnight = match local_midnight() {
            Some(t) => t,
            None => {
                warn!("Could not resolve local midnight, skipping scheduled tick");
                return;
            }
        };

        let added = match self.corpus.added_since(midnight) {
            Ok(n) => n,
            Err(e) => {
                warn!("Corpus scan failed during scheduled tick: {}", e);
                return;
            }
        };

        if added == 0 {
            debug!("No new normal samples today, skipping scheduled retraining");
            return;
        }

        let model_type = self.config.model_type;
        info!(
            "{} new normal samples since midnight, starting scheduled {} training",
            added, model_type
        );

        let orchestrator = self.orchestrator.clone();
        let router = self.router.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let report = orchestrator.train(model_type)?;
            router.reload(model_type)?;
            Ok::<_, Error>(report)
        })
        .await;

        match outcome {
            Ok(Ok(report)) => info!(
                "Scheduled training completed as {} (export {})",
                report.version,
                if report.export.is_exported() {
                    "succeeded"
                } else {
                    "failed"
                }
            ),
            // a manual run overlapped; the next tick will try again
            Ok(Err(e)) if e.is_training_in_progress() => {
                info!("Scheduled training skipped: another training is active")
            }
            Ok(Err(e)) => warn!("Scheduled training failed: {}", e),
            Err(e) => warn!("Scheduled training task failed: {}", e),
        }
    }
}

fn local_midnight() -> Option<SystemTime> {
    let midnight = Local::now().date_naive().and_time(NaiveTime::MIN);
    midnight
        .and_local_timezone(Local)
        .earliest()
        .map(SystemTime::from)
}
