//! Tabular feature extraction for tree-ensemble models
//!
//! Two-phase contract: [`TabularExtractor::fit`] learns categorical
//! vocabularies and numeric scaling from a training corpus, then
//! [`TabularExtractor::transform`] maps records to fixed-order rows.

use crate::error::FeatureError;
use crate::models::CaseRecord;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Sentinel category substituted for values unseen at fit time
pub const UNKNOWN: &str = "Unknown";

pub const CATEGORICAL_COLUMNS: [&str; 4] = ["nationality", "visa_type", "consulate", "sponsor_type"];

pub const NUMERIC_COLUMNS: [&str; 3] = ["document_count", "prior_travel", "days_since_submission"];

/// Column order of every transformed row
pub const FEATURE_NAMES: [&str; 7] = [
    "nationality",
    "visa_type",
    "consulate",
    "sponsor_type",
    "document_count",
    "prior_travel",
    "days_since_submission",
];

/// Sorted vocabulary for one categorical column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Vocabulary {
    classes: Vec<String>,
}

impl Vocabulary {
    fn fit<'a>(values: impl Iterator<Item = &'a str>) -> Self {
        let mut classes: Vec<String> = values.map(|v| v.to_string()).collect();
        classes.push(UNKNOWN.to_string());
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    fn encode(&self, value: &str) -> f64 {
        let idx = self
            .classes
            .binary_search_by(|c| c.as_str().cmp(value))
            .or_else(|_| self.classes.binary_search_by(|c| c.as_str().cmp(UNKNOWN)))
            .unwrap_or(0);
        idx as f64
    }
}

/// Standardization parameters for one numeric column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Scaler {
    mean: f64,
    scale: f64,
}

impl Scaler {
    fn fit(values: &[f64]) -> Self {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std = variance.sqrt();
        Self {
            mean,
            scale: if std > f64::EPSILON { std } else { 1.0 },
        }
    }

    fn apply(&self, value: f64) -> f64 {
        (value - self.mean) / self.scale
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedState {
    vocabularies: Vec<Vocabulary>,
    scalers: Vec<Scaler>,
}

/// Encodes case records into fixed-width numeric rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularExtractor {
    fitted: Option<FittedState>,
}

impl TabularExtractor {
    pub fn new() -> Self {
        Self { fitted: None }
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn feature_names(&self) -> &'static [&'static str] {
        &FEATURE_NAMES
    }

    pub fn width(&self) -> usize {
        FEATURE_NAMES.len()
    }

    /// Learn vocabularies and scaling from a training corpus
    pub fn fit(&mut self, corpus: &[CaseRecord], reference_date: NaiveDate) -> Result<&mut Self, FeatureError> {
        if corpus.is_empty() {
            return Err(FeatureError::EmptyCorpus);
        }

        let vocabularies = (0..CATEGORICAL_COLUMNS.len())
            .map(|col| Vocabulary::fit(corpus.iter().map(|c| categorical(c, col))))
            .collect();

        let numeric: Vec<[f64; 3]> = corpus.iter().map(|c| numeric(c, reference_date)).collect();
        let scalers = (0..NUMERIC_COLUMNS.len())
            .map(|col| {
                let column: Vec<f64> = numeric.iter().map(|row| row[col]).collect();
                Scaler::fit(&column)
            })
            .collect();

        self.fitted = Some(FittedState { vocabularies, scalers });
        Ok(self)
    }

    /// Map records to rows in [`FEATURE_NAMES`] order
    pub fn transform(&self, records: &[CaseRecord], reference_date: NaiveDate) -> Result<Vec<Vec<f64>>, FeatureError> {
        records
            .iter()
            .map(|r| self.transform_one(r, reference_date))
            .collect()
    }

    pub fn transform_one(&self, record: &CaseRecord, reference_date: NaiveDate) -> Result<Vec<f64>, FeatureError> {
        let state = self.fitted.as_ref().ok_or(FeatureError::NotFitted)?;

        let mut row = Vec::with_capacity(FEATURE_NAMES.len());
        for (col, vocab) in state.vocabularies.iter().enumerate() {
            row.push(vocab.encode(categorical(record, col)));
        }
        let raw = numeric(record, reference_date);
        for (value, scaler) in raw.iter().zip(&state.scalers) {
            row.push(scaler.apply(*value));
        }
        Ok(row)
    }

    pub fn fit_transform(
        &mut self,
        corpus: &[CaseRecord],
        reference_date: NaiveDate,
    ) -> Result<Vec<Vec<f64>>, FeatureError> {
        self.fit(corpus, reference_date)?;
        self.transform(corpus, reference_date)
    }

    /// Encoded index of a raw categorical value, as `transform` would produce it
    pub fn encode_category(&self, column: &str, value: &str) -> Result<f64, FeatureError> {
        let state = self.fitted.as_ref().ok_or(FeatureError::NotFitted)?;
        let col = CATEGORICAL_COLUMNS
            .iter()
            .position(|c| *c == column)
            .ok_or_else(|| FeatureError::UnknownColumn(column.to_string()))?;
        Ok(state.vocabularies[col].encode(value))
    }
}

fn categorical(record: &CaseRecord, col: usize) -> &str {
    match col {
        0 => record.nationality.as_str(),
        1 => record.visa_type.as_str(),
        2 => record.consulate.as_str(),
        _ => record.sponsor_type.as_str(),
    }
}

fn numeric(record: &CaseRecord, reference_date: NaiveDate) -> [f64; 3] {
    [
        record.document_count() as f64,
        if record.prior_travel { 1.0 } else { 0.0 },
        record.days_since_submission(reference_date) as f64,
    ]
}
