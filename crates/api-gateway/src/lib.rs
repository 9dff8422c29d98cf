//! HTTP API surface for QC Vision
//!
//! Thin request/response glue over the lifecycle engine: training is
//! dispatched to a blocking worker after the synchronous precondition and
//! contention checks, prediction runs on a blocking worker per request, and
//! everything returns structured JSON.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use common::{Error, ModelType, Result, Version};
use inference_engine::InferenceRouter;
use model_registry::VersionRegistry;
use training_engine::{TrainingGuard, TrainingOrchestrator};

/// Shared state of the API handlers
pub struct ApiContext {
    /// Training orchestrator
    pub orchestrator: Arc<TrainingOrchestrator>,

    /// Inference router
    pub router: Arc<InferenceRouter>,

    /// Version registry
    pub registry: Arc<VersionRegistry>,

    /// Global training guard (for the status endpoint)
    pub guard: TrainingGuard,

    /// Model type used when a request does not name one
    pub default_model_type: ModelType,
}

/// Builds the API router.
pub fn app(ctx: Arc<ApiContext>) -> Router {
    Router::new()
        .route("/api/train", post(train))
        .route("/api/training-status", get(training_status))
        .route("/api/predict", post(predict))
        .route("/api/versions", get(versions))
        .route("/api/rollback", post(rollback))
        .route("/api/models", get(models))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// The HTTP server wrapping the API router
pub struct ApiServer {
    addr: SocketAddr,
    ctx: Arc<ApiContext>,
}

impl ApiServer {
    /// Creates a server bound to the given address.
    pub fn new(addr: SocketAddr, ctx: Arc<ApiContext>) -> Self {
        Self { addr, ctx }
    }

    /// Serves requests until a shutdown signal arrives.
    pub async fn serve(self) -> Result<()> {
        info!("API listening on http://{}", self.addr);
        axum::Server::bind(&self.addr)
            .serve(app(self.ctx).into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(format!("server error: {}", e)))
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}

#[derive(Debug, Deserialize)]
struct TrainRequest {
    #[serde(default)]
    model_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PredictRequest {
    #[serde(default)]
    filepath: String,
}

#[derive(Debug, Deserialize)]
struct VersionsQuery {
    #[serde(default)]
    model_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RollbackRequest {
    #[serde(default)]
    model_type: Option<String>,
    version: String,
}

fn resolve_model_type(ctx: &ApiContext, key: Option<&str>) -> Result<ModelType> {
    match key {
        Some(key) => ModelType::from_key(key),
        None => Ok(ctx.default_model_type),
    }
}

/// `POST /api/train`: start a training run in the background.
///
/// Precondition and contention failures are reported synchronously; the
/// fit itself runs on a blocking worker and completion is observed via the
/// status endpoint.
async fn train(
    State(ctx): State<Arc<ApiContext>>,
    Json(req): Json<TrainRequest>,
) -> Response {
    let model_type = match resolve_model_type(&ctx, req.model_type.as_deref()) {
        Ok(model_type) => model_type,
        Err(e) => {
            return error_status(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    match ctx.orchestrator.begin(model_type) {
        Ok(prepared) => {
            let orchestrator = ctx.orchestrator.clone();
            let router = ctx.router.clone();
            tokio::task::spawn_blocking(move || match orchestrator.execute(prepared) {
                Ok(report) => {
                    if let Err(e) = router.reload(model_type) {
                        error!("Backend reload after training failed: {}", e);
                    }
                    info!(
                        "Background training finished as {} {}",
                        report.model_type, report.version
                    );
                }
                Err(e) => error!("Background training failed: {}", e),
            });

            Json(json!({
                "status": "started",
                "message": "Training started in background",
            }))
            .into_response()
        }
        Err(e) if e.is_training_in_progress() => {
            error_status(StatusCode::CONFLICT, e.to_string())
        }
        Err(e) if e.is_insufficient_samples() => {
            error_status(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => error_status(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn error_status(code: StatusCode, message: String) -> Response {
    (
        code,
        Json(json!({"status": "error", "message": message})),
    )
        .into_response()
}

/// `GET /api/training-status`
async fn training_status(State(ctx): State<Arc<ApiContext>>) -> Response {
    Json(json!({"active": ctx.guard.is_active()})).into_response()
}

/// `POST /api/predict`: score a stored image.
async fn predict(
    State(ctx): State<Arc<ApiContext>>,
    Json(req): Json<PredictRequest>,
) -> Response {
    if req.filepath.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Filepath required"})),
        )
            .into_response();
    }

    let path = PathBuf::from(&req.filepath);
    if !path.exists() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "File not found"})),
        )
            .into_response();
    }

    let router = ctx.router.clone();
    match tokio::task::spawn_blocking(move || router.predict(&path)).await {
        Ok(Ok(prediction)) => Json(prediction).into_response(),
        // per-request inference failures are part of the response body
        Ok(Err(e)) => Json(json!({"error": e.to_string()})).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("prediction task failed: {}", e)})),
        )
            .into_response(),
    }
}

/// `GET /api/versions?model_type=`: version history for a model type.
async fn versions(
    State(ctx): State<Arc<ApiContext>>,
    Query(query): Query<VersionsQuery>,
) -> Response {
    let model_type = match resolve_model_type(&ctx, query.model_type.as_deref()) {
        Ok(model_type) => model_type,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()})))
                .into_response();
        }
    };

    let current = ctx.registry.current_version(model_type);
    let entries = ctx.registry.list_versions(model_type);
    match (current, entries) {
        (Ok(current), Ok(entries)) => Json(json!({
            "model_type": model_type.key(),
            "current": current.map(|v| v.to_string()),
            "versions": entries,
        }))
        .into_response(),
        (Err(e), _) | (_, Err(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

/// `POST /api/rollback`: revert the active alias to a prior version.
async fn rollback(
    State(ctx): State<Arc<ApiContext>>,
    Json(req): Json<RollbackRequest>,
) -> Response {
    let model_type = match resolve_model_type(&ctx, req.model_type.as_deref()) {
        Ok(model_type) => model_type,
        Err(e) => {
            return rollback_failure(StatusCode::BAD_REQUEST, e.to_string());
        }
    };
    let version = match Version::parse_dir_name(&req.version) {
        Some(version) => version,
        None => {
            return rollback_failure(
                StatusCode::BAD_REQUEST,
                format!("Invalid version: {}", req.version),
            );
        }
    };

    let registry = ctx.registry.clone();
    let router = ctx.router.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        registry.rollback(model_type, version)?;
        router.reload(model_type)
    })
    .await;

    match outcome {
        Ok(Ok(())) => Json(json!({
            "success": true,
            "message": format!("Rolled back to {}", version),
            "version": version.to_string(),
        }))
        .into_response(),
        Ok(Err(e)) if e.is_version_not_found() => {
            rollback_failure(StatusCode::NOT_FOUND, e.to_string())
        }
        Ok(Err(e)) => rollback_failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Err(e) => rollback_failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("rollback task failed: {}", e),
        ),
    }
}

fn rollback_failure(code: StatusCode, message: String) -> Response {
    (code, Json(json!({"success": false, "error": message}))).into_response()
}

/// `GET /api/models`: availability of every supported model type.
async fn models(State(ctx): State<Arc<ApiContext>>) -> Response {
    Json(ctx.router.available_models()).into_response()
}
