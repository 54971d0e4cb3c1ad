//! Prediction engine
//!
//! The engine owns backend lifecycle and is the only entry point the API
//! layer talks to. Trained backends are loaded lazily, once per type, on the
//! blocking pool. A load failure caches the heuristic under the requested
//! type; an inference failure re-answers that one request with the heuristic.
//! Callers only ever see [`EngineError`] for a bad backend name or an
//! untrained backend with no pretrained fallback.

mod cache;
mod loader;

pub use loader::{ArtifactLoader, BackendLoader, LoaderSettings};

use crate::backends::{Backend, HeuristicBackend, Prediction};
use crate::error::{EngineError, InferenceError, LoadError};
use crate::explain::{rule_explanation, summarize, UserExplanation, FALLBACK_CONFIDENCE, MIN_FACTORS};
use crate::models::{
    BackendInfo, BackendKind, CaseRecord, Explanation, PredictionResult, StatusProbabilities, TimeEstimate,
};
use crate::observability::{EngineMetrics, StructuredLogger};
use cache::BackendCache;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, error, info};
use uuid::Uuid;

/// A backend as cached by the engine under its requested type
pub struct BackendHandle {
    requested: BackendKind,
    backend: Arc<dyn Backend>,
    loaded: bool,
    downgrade_reason: Option<String>,
}

impl BackendHandle {
    fn loaded(requested: BackendKind, backend: Arc<dyn Backend>) -> Self {
        Self {
            requested,
            backend,
            loaded: true,
            downgrade_reason: None,
        }
    }

    fn downgraded(requested: BackendKind, substitute: Arc<dyn Backend>, reason: String) -> Self {
        Self {
            requested,
            backend: substitute,
            loaded: false,
            downgrade_reason: Some(reason),
        }
    }

    pub fn requested(&self) -> BackendKind {
        self.requested
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Whether the requested backend itself is serving
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn downgrade_reason(&self) -> Option<&str> {
        self.downgrade_reason.as_deref()
    }

    pub fn version(&self) -> &str {
        self.backend.version()
    }
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("requested", &self.requested)
            .field("version", &self.backend.version())
            .field("loaded", &self.loaded)
            .field("downgrade_reason", &self.downgrade_reason)
            .finish()
    }
}

/// Type and version of the backend selected for new requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveBackend {
    #[serde(rename = "type")]
    pub kind: BackendKind,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Backend type selected at startup
    pub active_backend: BackendKind,
    /// Factors per explanation; never below 5
    pub top_factors: usize,
    /// Seed of the shared heuristic; entropy when unset
    pub heuristic_seed: Option<u64>,
    /// Fixed "today" for reproducible runs; the UTC date when unset
    pub reference_date: Option<NaiveDate>,
    /// Name stamped on structured log records
    pub instance: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            active_backend: BackendKind::Heuristic,
            top_factors: MIN_FACTORS,
            heuristic_seed: None,
            reference_date: None,
            instance: "casepred".to_string(),
        }
    }
}

pub struct PredictionEngine {
    config: EngineConfig,
    loader: Arc<dyn BackendLoader>,
    heuristic: Arc<dyn Backend>,
    cache: BackendCache,
    active: RwLock<BackendKind>,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl PredictionEngine {
    pub fn new(config: EngineConfig, loader: Arc<dyn BackendLoader>) -> Self {
        let heuristic: Arc<dyn Backend> = Arc::new(HeuristicBackend::new(config.heuristic_seed));
        let cache = BackendCache::new(Arc::new(BackendHandle::loaded(
            BackendKind::Heuristic,
            heuristic.clone(),
        )));
        let logger = StructuredLogger::new(config.instance.clone());

        Self {
            active: RwLock::new(config.active_backend),
            config,
            loader,
            heuristic,
            cache,
            metrics: EngineMetrics::new(),
            logger,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn today(&self) -> NaiveDate {
        self.config
            .reference_date
            .unwrap_or_else(|| Utc::now().date_naive())
    }

    fn top_n(&self) -> usize {
        self.config.top_factors.max(MIN_FACTORS)
    }

    /// Cached handle for `kind`, loading it on first use.
    ///
    /// Concurrent first requests share one load, which keeps running even if
    /// every caller waiting on it is cancelled. A failed load is logged and
    /// the heuristic is cached in its place for the life of the process.
    pub async fn get_backend(&self, kind: BackendKind) -> Arc<BackendHandle> {
        let loader = self.loader.clone();
        let heuristic = self.heuristic.clone();
        let metrics = self.metrics.clone();
        let logger = self.logger.clone();

        let loaded = self
            .cache
            .get_or_load(kind, move || async move {
                let start = Instant::now();
                let result = load_blocking(loader, kind).await;
                metrics.observe_backend_load(kind.as_str(), start.elapsed().as_secs_f64());

                match result {
                    Ok(backend) => {
                        info!(
                            backend = %kind,
                            version = backend.version(),
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "Backend loaded"
                        );
                        Arc::new(BackendHandle::loaded(kind, backend))
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        metrics.inc_load_failures(kind.as_str());
                        logger.log_backend_downgraded(kind.as_str(), &reason);
                        Arc::new(BackendHandle::downgraded(kind, heuristic, reason))
                    }
                }
            })
            .await;

        loaded.unwrap_or_else(|| {
            error!(backend = %kind, "Backend load task ended without a result");
            Arc::new(BackendHandle::downgraded(
                kind,
                self.heuristic.clone(),
                "load task aborted".to_string(),
            ))
        })
    }

    /// Snapshot of the active type; never held across inference
    pub async fn active_kind(&self) -> BackendKind {
        *self.active.read().await
    }

    async fn active_handle(&self) -> Arc<BackendHandle> {
        let kind = self.active_kind().await;
        self.get_backend(kind).await
    }

    /// Run `infer` on the active backend, answering with the heuristic on failure.
    ///
    /// `None` means the heuristic failed as well.
    async fn dispatch<T, F>(&self, case_id: &str, infer: F) -> (Option<T>, String, BackendKind)
    where
        F: Fn(&dyn Backend) -> Result<T, InferenceError>,
    {
        let handle = self.active_handle().await;
        let backend = handle.backend();
        let error = match infer(backend.as_ref()) {
            Ok(value) => return (Some(value), backend.version().to_string(), backend.kind()),
            Err(e) => e,
        };

        self.metrics.inc_inference_fallbacks(handle.requested().as_str());
        self.logger
            .log_inference_fallback(case_id, handle.requested().as_str(), &error.to_string());
        let fallback_version = self.heuristic.version().to_string();
        match infer(self.heuristic.as_ref()) {
            Ok(value) => (Some(value), fallback_version, BackendKind::Heuristic),
            Err(e) => {
                error!(case_id = %case_id, error = %e, "Heuristic fallback failed, serving prior");
                (None, fallback_version, BackendKind::Heuristic)
            }
        }
    }

    /// Outcome probabilities, days remaining and explanation for a case.
    ///
    /// Without `case_data` the fixed illustrative record is scored.
    pub async fn predict_status(&self, case_id: &str, case_data: Option<CaseRecord>) -> PredictionResult {
        let (prediction, version) = self.predict(case_id, case_data).await;
        assemble(case_id, version, prediction)
    }

    /// Plain-language rendering of the prediction for a case
    pub async fn summarize(&self, case_id: &str, case_data: Option<CaseRecord>) -> UserExplanation {
        let (prediction, _) = self.predict(case_id, case_data).await;
        summarize(
            &prediction.explanation,
            prediction.status.most_likely(),
            prediction.time.median(),
        )
    }

    async fn predict(&self, case_id: &str, case_data: Option<CaseRecord>) -> (Prediction, String) {
        let start = Instant::now();
        let case = case_data.unwrap_or_else(CaseRecord::illustrative);
        let as_of = self.today();
        let top_n = self.top_n();

        let (prediction, version, served_by) = self
            .dispatch(case_id, |backend| backend.predict(&case, as_of, top_n))
            .await;
        let prediction = prediction.unwrap_or_else(|| prior_prediction(&case, as_of, top_n));

        self.metrics
            .observe_prediction(served_by.as_str(), start.elapsed().as_secs_f64());
        self.logger.log_prediction(
            case_id,
            served_by.as_str(),
            &version,
            prediction.status.most_likely().as_str(),
            prediction.status.max_probability(),
            prediction.time.median(),
        );
        (prediction, version)
    }

    /// Same result as [`predict_status`](Self::predict_status)
    pub async fn predict_time(&self, case_id: &str, case_data: Option<CaseRecord>) -> PredictionResult {
        self.predict_status(case_id, case_data).await
    }

    pub async fn explain(&self, case_id: &str, case_data: Option<CaseRecord>) -> Explanation {
        let case = case_data.unwrap_or_else(CaseRecord::illustrative);
        let as_of = self.today();
        let top_n = self.top_n();

        let (explanation, _, served_by) = self
            .dispatch(case_id, |backend| backend.explain(&case, as_of, top_n))
            .await;
        debug!(case_id = %case_id, backend = %served_by, "Explanation generated");
        explanation.unwrap_or_else(|| rule_explanation(&case, as_of, top_n, FALLBACK_CONFIDENCE))
    }

    /// Make `name` the backend for new requests.
    ///
    /// The requested backend is loaded before the switch takes effect, so the
    /// reported version is the one that will serve.
    pub async fn switch_active(&self, name: &str) -> Result<ActiveBackend, EngineError> {
        let kind: BackendKind = name.parse()?;
        if kind.is_trained() && !kind.has_pretrained_fallback() && !self.loader.has_artifact(kind) {
            return Err(EngineError::ModelNotTrained(kind));
        }

        let handle = self.get_backend(kind).await;
        let previous = {
            let mut active = self.active.write().await;
            std::mem::replace(&mut *active, kind)
        };

        self.logger
            .log_backend_switched(previous.as_str(), kind.as_str(), handle.version());
        self.metrics.set_active_backend(kind.as_str(), handle.version());
        Ok(ActiveBackend {
            kind,
            version: handle.version().to_string(),
        })
    }

    pub async fn get_active_backend(&self) -> ActiveBackend {
        let kind = self.active_kind().await;
        ActiveBackend {
            kind,
            version: self.version_of(kind),
        }
    }

    fn version_of(&self, kind: BackendKind) -> String {
        self.cache
            .peek(kind)
            .map(|handle| handle.version().to_string())
            .unwrap_or_else(|| kind.version().to_string())
    }

    pub async fn list_available_backends(&self) -> Vec<BackendInfo> {
        let active = self.active_kind().await;
        let mut listing = Vec::with_capacity(BackendKind::ALL.len());
        for kind in BackendKind::ALL {
            let loader = self.loader.clone();
            // Reads report files, so keep it off the async workers
            let (trained, report) =
                tokio::task::spawn_blocking(move || (loader.has_artifact(kind), loader.report(kind)))
                    .await
                    .unwrap_or((false, None));
            let (trained_at, metrics) = match report {
                Some(r) => (Some(r.trained_at), r.metrics),
                None => (None, Default::default()),
            };
            listing.push(BackendInfo {
                kind,
                version: self.version_of(kind),
                trained_at,
                metrics,
                trained,
                is_active: kind == active,
            });
        }
        listing
    }

    /// Load the configured backend at startup.
    ///
    /// This is the only place the active type changes without an explicit
    /// switch: a failed preload makes the heuristic active.
    pub async fn preload_active(&self) -> Arc<BackendHandle> {
        let kind = self.active_kind().await;
        let handle = self.get_backend(kind).await;

        if let Some(reason) = handle.downgrade_reason() {
            let mut active = self.active.write().await;
            if *active == kind {
                *active = BackendKind::Heuristic;
                self.logger
                    .log_backend_switched(kind.as_str(), BackendKind::Heuristic.as_str(), self.heuristic.version());
                info!(requested = %kind, reason = %reason, "Preload failed, heuristic is now active");
            }
        }

        let active = self.active_kind().await;
        self.metrics.set_active_backend(active.as_str(), &self.version_of(active));
        handle
    }
}

async fn load_blocking(loader: Arc<dyn BackendLoader>, kind: BackendKind) -> Result<Arc<dyn Backend>, LoadError> {
    tokio::task::spawn_blocking(move || loader.load(kind))
        .await
        .map_err(|e| LoadError::Task(e.to_string()))?
}

/// Served when even the heuristic cannot answer
fn prior_prediction(case: &CaseRecord, as_of: NaiveDate, top_n: usize) -> Prediction {
    Prediction {
        status: StatusProbabilities::PRIOR,
        time: TimeEstimate::PRIOR,
        explanation: rule_explanation(case, as_of, top_n, FALLBACK_CONFIDENCE),
    }
}

fn assemble(case_id: &str, model_version: String, prediction: Prediction) -> PredictionResult {
    PredictionResult {
        id: Uuid::new_v4().to_string(),
        case_id: case_id.to_string(),
        predicted_status: prediction.status,
        estimated_days_remaining: prediction.time.median(),
        confidence_interval: prediction.time.interval(),
        model_version,
        generated_at: Utc::now(),
        explanation: Some(prediction.explanation),
    }
}
