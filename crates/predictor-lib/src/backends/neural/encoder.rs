//! Text encoders
//!
//! [`HashingEncoder`] is always available and needs no artifact. When an
//! ONNX projection model is present it is layered on top of the hashed
//! features by [`OnnxEncoder`] using tract.

use crate::error::{InferenceError, LoadError};
use std::path::Path;
use std::time::Instant;
use tract_onnx::prelude::*;
use tracing::{debug, warn};

/// Width of the hashed feature space
pub const HASH_DIMENSION: usize = 384;

/// Encoding latency above which a warning is logged
const MAX_ENCODE_MS: u128 = 50;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Maps text to a fixed-width embedding
pub trait TextEncoder: Send + Sync {
    fn dimension(&self) -> usize;

    fn encode(&self, text: &str) -> Result<Vec<f64>, InferenceError>;

    /// Short name recorded in logs and reports
    fn name(&self) -> &str;
}

/// Signed feature hashing over word unigrams and per-line fields
#[derive(Debug, Clone)]
pub struct HashingEncoder {
    dimension: usize,
}

impl HashingEncoder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn fnv1a(bytes: &[u8]) -> u64 {
        bytes.iter().fold(FNV_OFFSET, |hash, b| (hash ^ *b as u64).wrapping_mul(FNV_PRIME))
    }

    fn add_token(&self, vector: &mut [f64], token: &str) {
        let hash = Self::fnv1a(token.as_bytes());
        let index = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign;
    }
}

impl Default for HashingEncoder {
    fn default() -> Self {
        Self::new(HASH_DIMENSION)
    }
}

impl TextEncoder for HashingEncoder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, text: &str) -> Result<Vec<f64>, InferenceError> {
        let mut vector = vec![0.0; self.dimension];

        for line in text.lines() {
            // Whole "Field: value" lines keep field identity
            let line = line.trim().to_lowercase();
            if !line.is_empty() {
                self.add_token(&mut vector, &format!("line:{}", line));
            }
            for word in line.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
                self.add_token(&mut vector, word);
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// ONNX projection applied to hashed features
pub struct OnnxEncoder {
    hashing: HashingEncoder,
    model: TractModel,
    dimension: usize,
}

impl std::fmt::Debug for OnnxEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEncoder")
            .field("input", &self.hashing.dimension)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl OnnxEncoder {
    /// Load a model taking `[1, HASH_DIMENSION]` f32 input
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(model_bytes: &[u8]) -> Result<Self, LoadError> {
        let hashing = HashingEncoder::default();
        let model = Self::load_model(model_bytes, hashing.dimension())
            .map_err(|e| LoadError::Encoder(format!("{:#}", e)))?;

        // Probe once to learn the output width
        let probe = Self::run(&model, &vec![0.0; hashing.dimension()])
            .map_err(|e| LoadError::Encoder(e.to_string()))?;
        if probe.is_empty() {
            return Err(LoadError::Encoder("encoder produced an empty embedding".to_string()));
        }

        Ok(Self {
            hashing,
            dimension: probe.len(),
            model,
        })
    }

    /// Load and optimize an ONNX model from bytes
    fn load_model(model_bytes: &[u8], input_width: usize) -> TractResult<TractModel> {
        tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(model_bytes))?
            .with_input_fact(0, f32::fact([1, input_width]).into())?
            .into_optimized()?
            .into_runnable()
    }

    fn run(model: &TractModel, features: &[f64]) -> Result<Vec<f64>, InferenceError> {
        let data: Vec<f32> = features.iter().map(|v| *v as f32).collect();
        let input: Tensor = tract_ndarray::Array2::from_shape_vec((1, data.len()), data)
            .map_err(|e| InferenceError::Encoder(e.to_string()))?
            .into();

        let outputs = model
            .run(tvec!(input.into()))
            .map_err(|e| InferenceError::Encoder(e.to_string()))?;
        let output = outputs
            .first()
            .ok_or(InferenceError::EmptyModel("encoder returned no tensors"))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| InferenceError::Encoder(e.to_string()))?;
        Ok(view.iter().map(|v| *v as f64).collect())
    }
}

impl TextEncoder for OnnxEncoder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, text: &str) -> Result<Vec<f64>, InferenceError> {
        let start = Instant::now();
        let hashed = self.hashing.encode(text)?;
        let embedding = Self::run(&self.model, &hashed)?;
        if embedding.len() != self.dimension {
            return Err(InferenceError::Encoder(format!(
                "embedding has {} values, expected {}",
                embedding.len(),
                self.dimension
            )));
        }

        let elapsed = start.elapsed();
        if elapsed.as_millis() > MAX_ENCODE_MS {
            warn!(elapsed_ms = elapsed.as_millis(), "Text encoding exceeded {}ms", MAX_ENCODE_MS);
        } else {
            debug!(elapsed_us = elapsed.as_micros(), "Text encoding completed");
        }
        Ok(embedding)
    }

    fn name(&self) -> &str {
        "onnx"
    }
}
