//! Error taxonomy for the prediction engine
//!
//! Only [`EngineError`] is allowed to reach the API boundary. Load and
//! inference failures are recovered inside the engine by falling back to the
//! heuristic backend.

use std::path::PathBuf;
use thiserror::Error;

use crate::models::BackendKind;

/// Rejections surfaced to callers
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid backend type '{0}', expected one of: heuristic, baseline, neural")]
    InvalidBackendType(String),

    #[error("backend '{0}' has no trained model; train it before switching")]
    ModelNotTrained(BackendKind),
}

impl EngineError {
    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidBackendType(_) => "invalid_backend_type",
            EngineError::ModelNotTrained(_) => "model_not_trained",
        }
    }
}

/// Violations of data model invariants
#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("status probabilities ({approved}, {rfe}, {denied}) are not a distribution")]
    InvalidProbabilities { approved: f64, rfe: f64, denied: f64 },

    #[error("expected 3 class scores, got {0}")]
    WrongClassCount(usize),

    #[error("interval is not ordered: lower={lower} median={median} upper={upper}")]
    UnorderedInterval { lower: u32, median: u32, upper: u32 },

    #[error("time estimate is not finite")]
    NonFiniteEstimate,
}

/// Feature pipeline failures
#[derive(Debug, Error, PartialEq)]
pub enum FeatureError {
    #[error("tabular extractor must be fitted before transform")]
    NotFitted,

    #[error("cannot fit tabular extractor on an empty corpus")]
    EmptyCorpus,

    #[error("no categorical column named '{0}'")]
    UnknownColumn(String),
}

/// Failures while bringing a trained backend into memory
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("artifact not found: {0}")]
    Missing(PathBuf),

    #[error("failed to read artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("text encoder unavailable: {0}")]
    Encoder(String),

    #[error("loader task failed: {0}")]
    Task(String),
}

/// Failures during a live prediction call
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Output(#[from] ModelError),

    #[error("text encoding failed: {0}")]
    Encoder(String),

    #[error("model produced no output: {0}")]
    EmptyModel(&'static str),
}
