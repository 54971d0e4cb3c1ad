//! Neural-text backend
//!
//! Cases are rendered with the fixed text template, embedded by a
//! [`TextEncoder`], and priced by a softmax classification head and a
//! quantile regression head. Without trained heads the backend serves
//! deterministic seeded heads so it can always be switched to.

mod encoder;
mod head;

pub use encoder::{HashingEncoder, OnnxEncoder, TextEncoder, HASH_DIMENSION};
pub use head::{
    pinball_loss, softplus, ClassificationHead, HeadTrainingConfig, QuantileHead, DAY_SCALE, PRIOR_MEDIAN_DAYS,
    QUANTILES,
};

use super::output::OutputFormatter;
use super::{Backend, Prediction};
use crate::error::InferenceError;
use crate::explain::rule_explanation;
use crate::features::encode_text;
use crate::models::{BackendKind, CaseRecord, Explanation, StatusProbabilities, TimeEstimate, TrainingExample};
use chrono::NaiveDate;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Seed of the untrained heads served before any training run
pub const PRETRAINED_SEED: u64 = 2024;

/// Hidden width of the untrained quantile head
const PRETRAINED_HIDDEN_UNITS: usize = 32;

/// Trained state of both heads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralHeads {
    pub status: ClassificationHead,
    pub time: QuantileHead,
}

impl NeuralHeads {
    /// Deterministic untrained heads for an encoder of width `input_dim`
    pub fn pretrained(input_dim: usize) -> Self {
        Self {
            status: ClassificationHead::initialized(input_dim, PRETRAINED_SEED),
            time: QuantileHead::initialized(input_dim, PRETRAINED_HIDDEN_UNITS, PRETRAINED_SEED),
        }
    }

    /// Fit both heads on embeddings of the labeled examples
    pub fn train(
        examples: &[TrainingExample],
        reference_date: NaiveDate,
        encoder: &dyn TextEncoder,
        config: &HeadTrainingConfig,
    ) -> Result<(Self, BTreeMap<String, f64>), InferenceError> {
        let embeddings = examples
            .iter()
            .map(|e| encoder.encode(&encode_text(&e.case, reference_date)).map(Array1::from_vec))
            .collect::<Result<Vec<_>, _>>()?;
        let labels: Vec<usize> = examples.iter().map(|e| e.outcome.index()).collect();
        let days: Vec<f64> = examples.iter().map(|e| e.days_to_decision).collect();

        let dim = encoder.dimension();
        let mut status = ClassificationHead::initialized(dim, config.seed);
        let mut time = QuantileHead::initialized(dim, config.hidden_units, config.seed);

        info!(
            examples = examples.len(),
            encoder = encoder.name(),
            epochs = config.epochs,
            "Training neural heads"
        );
        let cross_entropy = status.train(&embeddings, &labels, config);
        let pinball = time.train(&embeddings, &days, config);

        let mut metrics = BTreeMap::new();
        metrics.insert("train_size".to_string(), examples.len() as f64);
        metrics.insert("status_cross_entropy".to_string(), cross_entropy);
        metrics.insert("time_pinball_loss".to_string(), pinball);

        let heads = Self { status, time };
        if !embeddings.is_empty() {
            let (mut correct, mut covered) = (0usize, 0usize);
            for ((x, label), y) in embeddings.iter().zip(&labels).zip(&days) {
                let probs = heads.status.predict_proba(x.view());
                if StatusProbabilities::from_scores(&probs)?.most_likely().index() == *label {
                    correct += 1;
                }
                let (_, lower, upper) = heads.time.predict(x.view());
                if (lower..=upper).contains(y) {
                    covered += 1;
                }
            }
            let n = embeddings.len() as f64;
            metrics.insert("status_accuracy".to_string(), correct as f64 / n);
            metrics.insert("interval_coverage".to_string(), covered as f64 / n);
        }
        Ok((heads, metrics))
    }

    pub fn validate(&self, input_dim: usize) -> Result<(), String> {
        self.status.validate()?;
        self.time.validate()?;
        if self.status.input_dim() != input_dim || self.time.input_dim() != input_dim {
            return Err(format!(
                "heads expect {} and {} inputs, encoder produces {}",
                self.status.input_dim(),
                self.time.input_dim(),
                input_dim
            ));
        }
        Ok(())
    }
}

/// Backend pairing a text encoder with prediction heads
pub struct NeuralBackend {
    encoder: Box<dyn TextEncoder>,
    heads: NeuralHeads,
    pretrained: bool,
    version: String,
    formatter: OutputFormatter,
}

impl NeuralBackend {
    /// Serve trained heads; fails when they do not fit the encoder
    pub fn new(encoder: Box<dyn TextEncoder>, heads: NeuralHeads) -> Result<Self, String> {
        heads.validate(encoder.dimension())?;
        Ok(Self {
            encoder,
            heads,
            pretrained: false,
            version: BackendKind::Neural.version().to_string(),
            formatter: OutputFormatter::new(),
        })
    }

    /// Serve the deterministic untrained heads
    pub fn pretrained(encoder: Box<dyn TextEncoder>) -> Self {
        let heads = NeuralHeads::pretrained(encoder.dimension());
        Self {
            encoder,
            heads,
            pretrained: true,
            version: format!("{}-pretrained", BackendKind::Neural.version()),
            formatter: OutputFormatter::new(),
        }
    }

    pub fn is_pretrained(&self) -> bool {
        self.pretrained
    }

    pub fn encoder_name(&self) -> &str {
        self.encoder.name()
    }

    fn embed(&self, case: &CaseRecord, as_of: NaiveDate) -> Result<Array1<f64>, InferenceError> {
        let text = encode_text(case, as_of);
        let embedding = self.encoder.encode(&text)?;
        if embedding.len() != self.heads.status.input_dim() {
            return Err(InferenceError::Encoder(format!(
                "embedding has {} values, heads expect {}",
                embedding.len(),
                self.heads.status.input_dim()
            )));
        }
        Ok(Array1::from_vec(embedding))
    }

    fn status_from(&self, embedding: &Array1<f64>) -> Result<StatusProbabilities, InferenceError> {
        self.formatter
            .format_status(&self.heads.status.predict_proba(embedding.view()))
    }

    fn time_from(&self, embedding: &Array1<f64>) -> Result<TimeEstimate, InferenceError> {
        let (median, lower, upper) = self.heads.time.predict(embedding.view());
        self.formatter.format_time(median, lower, upper)
    }
}

impl Backend for NeuralBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Neural
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn predict_status(&self, case: &CaseRecord, as_of: NaiveDate) -> Result<StatusProbabilities, InferenceError> {
        self.status_from(&self.embed(case, as_of)?)
    }

    fn predict_time(&self, case: &CaseRecord, as_of: NaiveDate) -> Result<TimeEstimate, InferenceError> {
        self.time_from(&self.embed(case, as_of)?)
    }

    fn explain(&self, case: &CaseRecord, as_of: NaiveDate, top_n: usize) -> Result<Explanation, InferenceError> {
        let status = self.predict_status(case, as_of)?;
        Ok(rule_explanation(case, as_of, top_n, status.max_probability()))
    }

    fn predict(&self, case: &CaseRecord, as_of: NaiveDate, top_n: usize) -> Result<Prediction, InferenceError> {
        let embedding = self.embed(case, as_of)?;
        let status = self.status_from(&embedding)?;
        let time = self.time_from(&embedding)?;
        Ok(Prediction {
            status,
            time,
            explanation: rule_explanation(case, as_of, top_n, status.max_probability()),
        })
    }
}
