//! Observability infrastructure for the prediction engine
//!
//! Provides:
//! - Prometheus metrics (prediction latency, backend loads, fallbacks, active backend)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, GaugeVec, HistogramVec, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for inference latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Histogram buckets for backend loading (in seconds)
const LOAD_BUCKETS: &[f64] = &[0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    prediction_latency_seconds: HistogramVec,
    backend_load_seconds: HistogramVec,
    predictions_total: IntCounterVec,
    inference_fallbacks_total: IntCounterVec,
    backend_load_failures_total: IntCounterVec,
    active_backend_info: GaugeVec,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            prediction_latency_seconds: register_histogram_vec!(
                "casepred_prediction_latency_seconds",
                "Time spent producing one prediction",
                &["backend"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            backend_load_seconds: register_histogram_vec!(
                "casepred_backend_load_seconds",
                "Time spent bringing a backend into memory",
                &["backend"],
                LOAD_BUCKETS.to_vec()
            )
            .expect("Failed to register backend_load_seconds"),

            predictions_total: register_int_counter_vec!(
                "casepred_predictions_total",
                "Predictions served, by the backend that produced them",
                &["backend"]
            )
            .expect("Failed to register predictions_total"),

            inference_fallbacks_total: register_int_counter_vec!(
                "casepred_inference_fallbacks_total",
                "Requests answered by the heuristic after the requested backend failed",
                &["backend"]
            )
            .expect("Failed to register inference_fallbacks_total"),

            backend_load_failures_total: register_int_counter_vec!(
                "casepred_backend_load_failures_total",
                "Backend loads that failed and were downgraded",
                &["backend"]
            )
            .expect("Failed to register backend_load_failures_total"),

            active_backend_info: register_gauge_vec!(
                "casepred_active_backend_info",
                "The backend type currently serving predictions",
                &["type", "version"]
            )
            .expect("Failed to register active_backend_info"),
        }
    }
}

/// Engine metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new)
    }

    pub fn observe_prediction(&self, backend: &str, duration_secs: f64) {
        let inner = self.inner();
        inner
            .prediction_latency_seconds
            .with_label_values(&[backend])
            .observe(duration_secs);
        inner.predictions_total.with_label_values(&[backend]).inc();
    }

    pub fn observe_backend_load(&self, backend: &str, duration_secs: f64) {
        self.inner()
            .backend_load_seconds
            .with_label_values(&[backend])
            .observe(duration_secs);
    }

    pub fn inc_inference_fallbacks(&self, backend: &str) {
        self.inner().inference_fallbacks_total.with_label_values(&[backend]).inc();
    }

    pub fn inc_load_failures(&self, backend: &str) {
        self.inner().backend_load_failures_total.with_label_values(&[backend]).inc();
    }

    /// Replace the active backend info series
    pub fn set_active_backend(&self, kind: &str, version: &str) {
        let gauge = &self.inner().active_backend_info;
        gauge.reset();
        gauge.with_label_values(&[kind, version]).set(1.0);
    }
}

/// Structured logger for engine events
///
/// Every record carries an `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_prediction(
        &self,
        case_id: &str,
        backend: &str,
        model_version: &str,
        most_likely: &str,
        confidence: f64,
        estimated_days: u32,
    ) {
        info!(
            event = "prediction_generated",
            instance = %self.instance,
            case_id = %case_id,
            backend = %backend,
            model_version = %model_version,
            most_likely = %most_likely,
            confidence = confidence,
            estimated_days = estimated_days,
            "Generated case prediction"
        );
    }

    /// A trained backend could not be loaded and was replaced by the heuristic
    pub fn log_backend_downgraded(&self, requested: &str, reason: &str) {
        warn!(
            event = "backend_downgraded",
            instance = %self.instance,
            requested = %requested,
            substitute = "heuristic",
            reason = %reason,
            "Backend load failed, serving heuristic in its place"
        );
    }

    pub fn log_inference_fallback(&self, case_id: &str, backend: &str, error: &str) {
        warn!(
            event = "inference_fallback",
            instance = %self.instance,
            case_id = %case_id,
            backend = %backend,
            error = %error,
            "Inference failed, answered with heuristic"
        );
    }

    pub fn log_backend_switched(&self, from: &str, to: &str, version: &str) {
        info!(
            event = "backend_switched",
            instance = %self.instance,
            from = %from,
            to = %to,
            version = %version,
            "Active backend switched"
        );
    }

    pub fn log_startup(&self, version: &str, active_backend: &str, model_dir: &str) {
        info!(
            event = "server_started",
            instance = %self.instance,
            server_version = %version,
            active_backend = %active_backend,
            model_dir = %model_dir,
            "Prediction server started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "server_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Prediction server shutting down"
        );
    }
}
