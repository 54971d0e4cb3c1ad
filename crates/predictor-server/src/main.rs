//! Case outcome prediction server
//!
//! Serves outcome, processing-time and explanation predictions over HTTP and
//! manages which backend answers them.

use anyhow::{Context, Result};
use predictor_lib::{
    health::{Component, HealthRegistry},
    observability::StructuredLogger,
    ArtifactLoader, ModelStore, PredictionEngine,
};
use predictor_server::{
    api,
    cases::{CaseStore, InMemoryCaseStore},
    config::ServerConfig,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting predictor-server");

    let config = ServerConfig::load()?;
    let engine_config = config.engine_config()?;
    info!(
        instance = %config.instance_name,
        model_dir = %config.model_dir.display(),
        active_backend = %engine_config.active_backend,
        "Server configured"
    );

    let health_registry = HealthRegistry::new();
    if !config.model_dir.is_dir() {
        health_registry
            .set_degraded(
                Component::ModelStore,
                format!("{} does not exist; only untrained backends can serve", config.model_dir.display()),
            )
            .await;
    }

    let cases: Arc<dyn CaseStore> = match &config.cases_file {
        Some(path) => Arc::new(InMemoryCaseStore::from_file(path).context("Failed to load case records")?),
        None => Arc::new(InMemoryCaseStore::new()),
    };

    let loader = Arc::new(ArtifactLoader::new(
        ModelStore::new(config.model_dir.clone()),
        config.loader_settings(),
    ));
    let engine = Arc::new(PredictionEngine::new(engine_config.clone(), loader));

    let logger = StructuredLogger::new(&config.instance_name);
    logger.log_startup(
        SERVER_VERSION,
        engine_config.active_backend.as_str(),
        &config.model_dir.display().to_string(),
    );

    let app_state = Arc::new(api::AppState::new(engine.clone(), cases, health_registry.clone()));

    // Liveness is served while the configured backend loads
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let handle = engine.preload_active().await;
    health_registry
        .record_preload(engine_config.active_backend, handle.downgrade_reason())
        .await;
    let active = engine.active_kind().await;
    info!(
        backend = %active,
        version = handle.version(),
        "Ready to serve predictions"
    );

    tokio::select! {
        result = api_handle => {
            result.context("API server task panicked")??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
            info!("Shutting down");
        }
    }

    Ok(())
}
