//! HTTP API for predictions, backend management, health checks and Prometheus metrics

use crate::cases::CaseStore;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use predictor_lib::{
    explain::UserExplanation,
    health::HealthRegistry,
    ActiveBackend, BackendInfo, CaseRecord, EngineError, Explanation, PredictionEngine, PredictionResult,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PredictionEngine>,
    pub cases: Arc<dyn CaseStore>,
    pub health_registry: HealthRegistry,
}

impl AppState {
    pub fn new(engine: Arc<PredictionEngine>, cases: Arc<dyn CaseStore>, health_registry: HealthRegistry) -> Self {
        Self {
            engine,
            cases,
            health_registry,
        }
    }

    /// Request data first, then the case store; `None` scores the illustrative record
    async fn resolve_case(&self, case_id: &str, case_data: Option<CaseRecord>) -> Option<CaseRecord> {
        match case_data {
            Some(case) => Some(case),
            None => self.cases.get(case_id).await,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictRequest {
    pub case_id: String,
    #[serde(default)]
    pub case_data: Option<CaseRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwitchRequest {
    pub model_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

/// Rejections returned to API callers
#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Engine(e) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: e.to_string(),
                    code: e.code().to_string(),
                },
            ),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: message,
                    code: "internal_error".to_string(),
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

async fn predict_status(State(state): State<Arc<AppState>>, Json(request): Json<PredictRequest>) -> Json<PredictionResult> {
    let case = state.resolve_case(&request.case_id, request.case_data).await;
    Json(state.engine.predict_status(&request.case_id, case).await)
}

async fn predict_time(State(state): State<Arc<AppState>>, Json(request): Json<PredictRequest>) -> Json<PredictionResult> {
    let case = state.resolve_case(&request.case_id, request.case_data).await;
    Json(state.engine.predict_time(&request.case_id, case).await)
}

async fn explain(State(state): State<Arc<AppState>>, Json(request): Json<PredictRequest>) -> Json<Explanation> {
    let case = state.resolve_case(&request.case_id, request.case_data).await;
    Json(state.engine.explain(&request.case_id, case).await)
}

async fn explain_by_id(State(state): State<Arc<AppState>>, Path(case_id): Path<String>) -> Json<Explanation> {
    let case = state.resolve_case(&case_id, None).await;
    Json(state.engine.explain(&case_id, case).await)
}

/// Plain-language rendering of a full prediction
async fn summary(State(state): State<Arc<AppState>>, Json(request): Json<PredictRequest>) -> Json<UserExplanation> {
    let case = state.resolve_case(&request.case_id, request.case_data).await;
    Json(state.engine.summarize(&request.case_id, case).await)
}

async fn list_models(State(state): State<Arc<AppState>>) -> Json<Vec<BackendInfo>> {
    Json(state.engine.list_available_backends().await)
}

async fn active_model(State(state): State<Arc<AppState>>) -> Json<ActiveBackend> {
    Json(state.engine.get_active_backend().await)
}

async fn switch_model(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SwitchRequest>,
) -> Result<Json<ActiveBackend>, ApiError> {
    match state.engine.switch_active(&request.model_type).await {
        Ok(active) => Ok(Json(active)),
        Err(e) => {
            warn!(model_type = %request.model_type, code = e.code(), "Backend switch rejected");
            Err(e.into())
        }
    }
}

/// Liveness - 200 while healthy or degraded, 503 once a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = if health.status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once the configured backend is preloaded
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Result<impl IntoResponse, ApiError> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder.encode(&metric_families, &mut buffer).map_err(|e| {
        error!(error = %e, "Failed to encode metrics");
        ApiError::Internal(e.to_string())
    })?;

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    ))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/predict/status", post(predict_status))
        .route("/api/v1/predict/processing-time", post(predict_time))
        .route("/api/v1/predict/explain", post(explain))
        .route("/api/v1/predict/explain/:case_id", get(explain_by_id))
        .route("/api/v1/predict/summary", post(summary))
        .route("/api/v1/models", get(list_models))
        .route("/api/v1/models/active", get(active_model))
        .route("/api/v1/models/switch", post(switch_model))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
