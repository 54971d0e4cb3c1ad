//! Server configuration

use anyhow::{Context, Result};
use chrono::NaiveDate;
use predictor_lib::{backends::DEFAULT_INTERVAL_CONFIDENCE, BackendKind, EngineConfig, LoaderSettings};
use serde::Deserialize;
use std::path::PathBuf;

/// Server configuration, read from `PREDICTOR_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Name stamped on structured log records
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Root of the per-backend artifact directories
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// Backend preloaded and served at startup
    #[serde(default = "default_active_backend")]
    pub active_backend: String,

    /// Seed for heuristic draws; unset means fresh entropy per process
    #[serde(default)]
    pub heuristic_seed: Option<u64>,

    #[serde(default = "default_interval_confidence")]
    pub interval_confidence: f64,

    #[serde(default = "default_top_factors")]
    pub top_factors: usize,

    /// JSON object of case id to case record consulted when requests omit case data
    #[serde(default)]
    pub cases_file: Option<PathBuf>,

    /// Pins "today" (YYYY-MM-DD) for days-since-submission; the UTC date when unset
    #[serde(default)]
    pub reference_date: Option<NaiveDate>,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "casepred".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_active_backend() -> String {
    "heuristic".to_string()
}

fn default_interval_confidence() -> f64 {
    DEFAULT_INTERVAL_CONFIDENCE
}

fn default_top_factors() -> usize {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            api_port: default_api_port(),
            model_dir: default_model_dir(),
            active_backend: default_active_backend(),
            heuristic_seed: None,
            interval_confidence: default_interval_confidence(),
            top_factors: default_top_factors(),
            cases_file: None,
            reference_date: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix("PREDICTOR").try_parsing(true))
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = config::Config::builder()
            .add_source(source)
            .build()
            .context("Failed to read configuration")?;
        config
            .try_deserialize()
            .context("Invalid PREDICTOR_* configuration")
    }

    pub fn engine_config(&self) -> Result<EngineConfig> {
        let active_backend: BackendKind = self
            .active_backend
            .parse()
            .with_context(|| format!("PREDICTOR_ACTIVE_BACKEND={}", self.active_backend))?;
        Ok(EngineConfig {
            active_backend,
            top_factors: self.top_factors,
            heuristic_seed: self.heuristic_seed,
            reference_date: self.reference_date,
            instance: self.instance_name.clone(),
        })
    }

    pub fn loader_settings(&self) -> LoaderSettings {
        LoaderSettings {
            heuristic_seed: self.heuristic_seed,
            interval_confidence: self.interval_confidence,
        }
    }
}
