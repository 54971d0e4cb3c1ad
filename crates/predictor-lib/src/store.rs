//! On-disk model artifacts
//!
//! Layout under the model directory:
//!
//! ```text
//! baseline/model.json          forest bundle
//! baseline/model.json.sha256   optional checksum sidecar
//! baseline/report.json
//! neural/status_head.json
//! neural/time_head.json
//! neural/encoder.onnx          optional projection encoder
//! neural/report.json
//! ```
//!
//! Any artifact may carry a `.sha256` sidecar holding the hex digest of its
//! bytes; a sidecar that does not match rejects the artifact.

use crate::backends::{ForestBundle, NeuralHeads};
use crate::error::LoadError;
use crate::models::BackendKind;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const BASELINE_MODEL_FILE: &str = "model.json";
pub const STATUS_HEAD_FILE: &str = "status_head.json";
pub const TIME_HEAD_FILE: &str = "time_head.json";
pub const ENCODER_FILE: &str = "encoder.onnx";
pub const REPORT_FILE: &str = "report.json";
const CHECKSUM_EXTENSION: &str = "sha256";

/// Outcome of the last training run for one backend type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// RFC 3339 timestamp
    pub trained_at: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl TrainingReport {
    pub fn new(metrics: BTreeMap<String, f64>) -> Self {
        Self {
            trained_at: Utc::now().to_rfc3339(),
            metrics,
        }
    }
}

/// Both neural heads as read from disk
#[derive(Debug)]
pub struct NeuralArtifacts {
    pub heads: Option<NeuralHeads>,
    pub encoder: Option<PathBuf>,
}

/// Reads and writes trained state under one root directory
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding artifacts of one backend type
    pub fn dir(&self, kind: BackendKind) -> PathBuf {
        self.root.join(kind.as_str())
    }

    /// Whether trained state exists for `kind`.
    ///
    /// The heuristic backend needs none and always reports true.
    pub fn has_artifact(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Heuristic => true,
            BackendKind::Baseline => self.dir(kind).join(BASELINE_MODEL_FILE).is_file(),
            BackendKind::Neural => {
                let dir = self.dir(kind);
                dir.join(STATUS_HEAD_FILE).is_file() && dir.join(TIME_HEAD_FILE).is_file()
            }
        }
    }

    pub fn load_baseline(&self) -> Result<ForestBundle, LoadError> {
        let path = self.dir(BackendKind::Baseline).join(BASELINE_MODEL_FILE);
        let bundle: ForestBundle = read_json(&path)?;
        bundle
            .validate()
            .map_err(|reason| LoadError::Corrupt { path: path.clone(), reason })?;
        info!(
            path = %path.display(),
            trees = bundle.status_forest.len(),
            "Loaded tree-ensemble bundle"
        );
        Ok(bundle)
    }

    pub fn save_baseline(&self, bundle: &ForestBundle, report: &TrainingReport) -> Result<(), LoadError> {
        let dir = self.dir(BackendKind::Baseline);
        write_json(&dir.join(BASELINE_MODEL_FILE), bundle, true)?;
        write_json(&dir.join(REPORT_FILE), report, false)
    }

    /// Neural artifacts; absent heads are not an error
    pub fn load_neural(&self) -> Result<NeuralArtifacts, LoadError> {
        let dir = self.dir(BackendKind::Neural);
        let heads = if self.has_artifact(BackendKind::Neural) {
            Some(NeuralHeads {
                status: read_json(&dir.join(STATUS_HEAD_FILE))?,
                time: read_json(&dir.join(TIME_HEAD_FILE))?,
            })
        } else {
            debug!(dir = %dir.display(), "No trained neural heads");
            None
        };

        let encoder_path = dir.join(ENCODER_FILE);
        let encoder = if encoder_path.is_file() {
            verify_checksum(&encoder_path, &read_bytes(&encoder_path)?)?;
            Some(encoder_path)
        } else {
            None
        };

        Ok(NeuralArtifacts { heads, encoder })
    }

    pub fn save_neural(&self, heads: &NeuralHeads, report: &TrainingReport) -> Result<(), LoadError> {
        let dir = self.dir(BackendKind::Neural);
        write_json(&dir.join(STATUS_HEAD_FILE), &heads.status, true)?;
        write_json(&dir.join(TIME_HEAD_FILE), &heads.time, true)?;
        write_json(&dir.join(REPORT_FILE), report, false)
    }

    /// Last training report for `kind`; unreadable reports are skipped
    pub fn report(&self, kind: BackendKind) -> Option<TrainingReport> {
        let path = self.dir(kind).join(REPORT_FILE);
        if !path.is_file() {
            return None;
        }
        match read_json(&path) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable training report");
                None
            }
        }
    }
}

fn checksum_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(CHECKSUM_EXTENSION);
    PathBuf::from(name)
}

/// Hex SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, LoadError> {
    fs::read(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            LoadError::Missing(path.to_path_buf())
        } else {
            LoadError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

fn verify_checksum(path: &Path, bytes: &[u8]) -> Result<(), LoadError> {
    let sidecar = checksum_path(path);
    if !sidecar.is_file() {
        return Ok(());
    }
    let recorded = fs::read_to_string(&sidecar).map_err(|source| LoadError::Io {
        path: sidecar.clone(),
        source,
    })?;
    // Accept both a bare digest and `sha256sum` output
    let expected = recorded
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let actual = sha256_hex(bytes);
    if expected != actual {
        return Err(LoadError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, LoadError> {
    let bytes = read_bytes(path)?;
    verify_checksum(path, &bytes)?;
    serde_json::from_slice(&bytes).map_err(|e| LoadError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T, with_checksum: bool) -> Result<(), LoadError> {
    let io_error = |source: std::io::Error| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| LoadError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    fs::write(path, &bytes).map_err(io_error)?;
    if with_checksum {
        fs::write(checksum_path(path), sha256_hex(&bytes)).map_err(io_error)?;
    }
    debug!(path = %path.display(), bytes = bytes.len(), "Wrote artifact");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::forest::ForestConfig;
    use crate::backends::neural::HashingEncoder;
    use crate::backends::testing::{labeled_corpus, reference_date};
    use crate::features::TabularExtractor;
    use tempfile::TempDir;

    fn small_bundle() -> ForestBundle {
        let config = ForestConfig {
            n_trees: 5,
            ..ForestConfig::default()
        };
        ForestBundle::train(&labeled_corpus(40, 3), reference_date(), &config)
            .unwrap()
            .0
    }

    #[test]
    fn test_empty_store_has_only_heuristic() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        assert!(store.has_artifact(BackendKind::Heuristic));
        assert!(!store.has_artifact(BackendKind::Baseline));
        assert!(!store.has_artifact(BackendKind::Neural));
        assert!(matches!(store.load_baseline(), Err(LoadError::Missing(_))));
        assert!(store.report(BackendKind::Baseline).is_none());

        let neural = store.load_neural().unwrap();
        assert!(neural.heads.is_none());
        assert!(neural.encoder.is_none());
    }

    #[test]
    fn test_baseline_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let bundle = small_bundle();
        let mut metrics = BTreeMap::new();
        metrics.insert("status_accuracy".to_string(), 0.75);
        store.save_baseline(&bundle, &TrainingReport::new(metrics)).unwrap();

        assert!(store.has_artifact(BackendKind::Baseline));
        assert_eq!(store.load_baseline().unwrap(), bundle);
        let report = store.report(BackendKind::Baseline).unwrap();
        assert_eq!(report.metrics["status_accuracy"], 0.75);
    }

    #[test]
    fn test_tampered_artifact_fails_checksum() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        store
            .save_baseline(&small_bundle(), &TrainingReport::new(BTreeMap::new()))
            .unwrap();

        let model = store.dir(BackendKind::Baseline).join(BASELINE_MODEL_FILE);
        let mut text = fs::read_to_string(&model).unwrap();
        text.push('\n');
        fs::write(&model, text).unwrap();

        assert!(matches!(store.load_baseline(), Err(LoadError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_garbage_artifact_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let model = store.dir(BackendKind::Baseline).join(BASELINE_MODEL_FILE);
        fs::create_dir_all(model.parent().unwrap()).unwrap();
        fs::write(&model, b"{not json").unwrap();

        assert!(matches!(store.load_baseline(), Err(LoadError::Corrupt { .. })));
    }

    #[test]
    fn test_unfitted_extractor_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let mut bundle = small_bundle();
        bundle.extractor = TabularExtractor::new();
        store
            .save_baseline(&bundle, &TrainingReport::new(BTreeMap::new()))
            .unwrap();

        assert!(matches!(store.load_baseline(), Err(LoadError::Corrupt { .. })));
    }

    #[test]
    fn test_neural_heads_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let heads = NeuralHeads::pretrained(16);
        store
            .save_neural(&heads, &TrainingReport::new(BTreeMap::new()))
            .unwrap();

        assert!(store.has_artifact(BackendKind::Neural));
        let loaded = store.load_neural().unwrap();
        assert_eq!(loaded.heads, Some(heads));

        // Heads sized for another encoder are rejected later by the backend
        let encoder = HashingEncoder::new(32);
        assert!(crate::backends::NeuralBackend::new(Box::new(encoder), loaded.heads.unwrap()).is_err());
    }

    #[test]
    fn test_weights_reload_bit_exact() {
        use rand::{Rng, SeedableRng};

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("weights.json");
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(3);
        let weights: Vec<f64> = (0..2_000)
            .map(|_| rng.gen_range(-1.0..1.0) * 10f64.powi(rng.gen_range(-8..8)))
            .collect();

        write_json(&path, &weights, true).unwrap();
        let loaded: Vec<f64> = read_json(&path).unwrap();
        let bits = |v: &[f64]| v.iter().map(|w| w.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&loaded), bits(&weights));
    }

    #[test]
    fn test_sidecar_accepts_sha256sum_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("artifact.bin");
        fs::write(&path, b"payload").unwrap();
        fs::write(checksum_path(&path), format!("{}  artifact.bin\n", sha256_hex(b"payload"))).unwrap();
        assert!(verify_checksum(&path, b"payload").is_ok());
        assert!(verify_checksum(&path, b"other").is_err());
    }
}
