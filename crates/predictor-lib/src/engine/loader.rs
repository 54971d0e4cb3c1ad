//! Bringing backends into memory
//!
//! Loading is blocking work (file reads, JSON decoding, ONNX optimization)
//! and is always run by the engine on the blocking pool.

use crate::backends::neural::{HashingEncoder, OnnxEncoder, TextEncoder};
use crate::backends::{
    Backend, HeuristicBackend, NeuralBackend, OutputConfig, TreeEnsembleBackend, DEFAULT_INTERVAL_CONFIDENCE,
};
use crate::error::LoadError;
use crate::models::BackendKind;
use crate::store::{ModelStore, TrainingReport};
use std::sync::Arc;
use tracing::info;

/// Source of backend instances and their training metadata
pub trait BackendLoader: Send + Sync {
    /// Build a ready-to-serve backend of `kind`
    fn load(&self, kind: BackendKind) -> Result<Arc<dyn Backend>, LoadError>;

    /// Whether trained state exists for `kind`
    fn has_artifact(&self, kind: BackendKind) -> bool;

    fn report(&self, kind: BackendKind) -> Option<TrainingReport>;
}

/// Knobs applied to every backend the loader builds
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    /// Seed for heuristic backends; entropy when unset
    pub heuristic_seed: Option<u64>,
    /// Central coverage of tree-ensemble intervals
    pub interval_confidence: f64,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            heuristic_seed: None,
            interval_confidence: DEFAULT_INTERVAL_CONFIDENCE,
        }
    }
}

/// Loader reading trained state from a [`ModelStore`]
#[derive(Debug, Clone)]
pub struct ArtifactLoader {
    store: ModelStore,
    settings: LoaderSettings,
}

impl ArtifactLoader {
    pub fn new(store: ModelStore, settings: LoaderSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    fn load_baseline(&self) -> Result<Arc<dyn Backend>, LoadError> {
        let bundle = self.store.load_baseline()?;
        let output = OutputConfig {
            interval_confidence: self.settings.interval_confidence,
            ..OutputConfig::default()
        };
        Ok(Arc::new(TreeEnsembleBackend::new(bundle, output)))
    }

    fn load_neural(&self) -> Result<Arc<dyn Backend>, LoadError> {
        let artifacts = self.store.load_neural()?;
        let encoder: Box<dyn TextEncoder> = match &artifacts.encoder {
            Some(path) => Box::new(OnnxEncoder::from_file(path)?),
            None => Box::new(HashingEncoder::default()),
        };

        let backend = match artifacts.heads {
            Some(heads) => NeuralBackend::new(encoder, heads).map_err(|reason| LoadError::Corrupt {
                path: self.store.dir(BackendKind::Neural),
                reason,
            })?,
            None => {
                info!(encoder = encoder.name(), "Serving pretrained neural heads");
                NeuralBackend::pretrained(encoder)
            }
        };
        Ok(Arc::new(backend))
    }
}

impl BackendLoader for ArtifactLoader {
    fn load(&self, kind: BackendKind) -> Result<Arc<dyn Backend>, LoadError> {
        match kind {
            BackendKind::Heuristic => Ok(Arc::new(HeuristicBackend::new(self.settings.heuristic_seed))),
            BackendKind::Baseline => self.load_baseline(),
            BackendKind::Neural => self.load_neural(),
        }
    }

    fn has_artifact(&self, kind: BackendKind) -> bool {
        self.store.has_artifact(kind)
    }

    fn report(&self, kind: BackendKind) -> Option<TrainingReport> {
        self.store.report(kind)
    }
}
