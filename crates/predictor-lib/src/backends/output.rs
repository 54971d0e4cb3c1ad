//! Prediction output formatting and post-processing
//!
//! Converts raw model outputs (class scores, per-member day estimates)
//! into validated [`StatusProbabilities`] and [`TimeEstimate`] values.

use crate::error::{InferenceError, ModelError};
use crate::models::{StatusProbabilities, TimeEstimate};

/// Default coverage of the time interval (10th to 90th percentile)
pub const DEFAULT_INTERVAL_CONFIDENCE: f64 = 0.80;

/// Configuration for output formatting
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Central coverage of the time interval, in (0, 1)
    pub interval_confidence: f64,
    /// Below this maximum class probability a prediction is flagged
    pub low_confidence_threshold: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            interval_confidence: DEFAULT_INTERVAL_CONFIDENCE,
            low_confidence_threshold: 0.5,
        }
    }
}

/// Formats raw model outputs into validated result values
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    config: OutputConfig,
}

impl OutputFormatter {
    pub fn new() -> Self {
        Self { config: OutputConfig::default() }
    }

    pub fn with_config(config: OutputConfig) -> Self {
        let interval_confidence = if config.interval_confidence > 0.0 && config.interval_confidence < 1.0 {
            config.interval_confidence
        } else {
            DEFAULT_INTERVAL_CONFIDENCE
        };
        Self {
            config: OutputConfig {
                interval_confidence,
                ..config
            },
        }
    }

    pub fn interval_confidence(&self) -> f64 {
        self.config.interval_confidence
    }

    /// Quantile levels of the interval bounds
    pub fn interval_levels(&self) -> (f64, f64) {
        let tail = (1.0 - self.config.interval_confidence) / 2.0;
        (tail, 1.0 - tail)
    }

    /// Normalize raw class scores onto the probability simplex
    pub fn format_status(&self, scores: &[f64]) -> Result<StatusProbabilities, InferenceError> {
        Ok(StatusProbabilities::from_scores(scores)?)
    }

    /// Aggregate per-member estimates into a median with an empirical interval.
    ///
    /// Quantiles are monotone in their level, so the triple is ordered
    /// before conversion to whole days.
    pub fn format_member_spread(&self, members: &[f64]) -> Result<TimeEstimate, InferenceError> {
        if members.is_empty() {
            return Err(InferenceError::EmptyModel("regression ensemble has no members"));
        }
        if members.iter().any(|m| !m.is_finite()) {
            return Err(ModelError::NonFiniteEstimate.into());
        }
        let mut sorted = members.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let (low, high) = self.interval_levels();
        let median = quantile_sorted(&sorted, 0.5);
        let lower = quantile_sorted(&sorted, low).max(0.0);
        let upper = quantile_sorted(&sorted, high);
        Ok(TimeEstimate::from_days(median, lower.min(median), upper)?)
    }

    /// Convert an already-ordered float triple to whole days
    pub fn format_time(&self, median: f64, lower: f64, upper: f64) -> Result<TimeEstimate, InferenceError> {
        Ok(TimeEstimate::from_days(median, lower, upper)?)
    }

    /// Check if a status distribution has low confidence
    pub fn is_low_confidence(&self, status: &StatusProbabilities) -> bool {
        status.max_probability() < self.config.low_confidence_threshold
    }

    /// Get the reason for low confidence (if applicable)
    pub fn low_confidence_reason(&self, status: &StatusProbabilities) -> Option<String> {
        if status.max_probability() < 0.4 {
            Some("No outcome is clearly favored for this case".to_string())
        } else if self.is_low_confidence(status) {
            Some("Outcome probabilities are close together".to_string())
        } else {
            None
        }
    }
}

impl Default for OutputFormatter {
    fn default() -> Self {
        Self::new()
    }
}

/// Linear-interpolated quantile of an ascending slice
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}
