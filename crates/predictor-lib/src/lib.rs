//! Case outcome prediction library
//!
//! This crate provides the core functionality for:
//! - Feature extraction from case records (text template and tabular encoding)
//! - Interchangeable prediction backends (heuristic, tree ensemble, neural text)
//! - Ranked explanations of each prediction
//! - The prediction engine that loads, caches and falls back between backends
//! - Model artifact storage, health checks and observability

pub mod backends;
pub mod engine;
pub mod error;
pub mod explain;
pub mod features;
pub mod health;
pub mod models;
pub mod observability;
pub mod store;

pub use engine::{
    ActiveBackend, ArtifactLoader, BackendHandle, BackendLoader, EngineConfig, LoaderSettings, PredictionEngine,
};
pub use error::{EngineError, FeatureError, InferenceError, LoadError, ModelError};
pub use health::{Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
pub use store::{ModelStore, TrainingReport};
