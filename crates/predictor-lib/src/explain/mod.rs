//! Prediction explanations
//!
//! Two paths produce an [`Explanation`]:
//! - the native path attributes a prediction to input features using the
//!   model itself (decision-path deltas, or occlusion against a background
//!   sample when only scores are available)
//! - the fallback path manufactures directional attributions from static
//!   importances, or from seeded random weights when even those are missing
//!
//! Rule-based explanations for text and heuristic backends live in [`rules`].

mod rules;
pub mod summary;

pub use rules::{pad_factors, rule_explanation, rule_factors, PADDING_FACTORS};
pub use summary::{summarize, FormattedFactor, UserExplanation};

use crate::models::{Explanation, ExplanationFactor, FeatureImportance, Impact};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Mutex;
use tracing::debug;

/// Explanations never carry fewer factors than this
pub const MIN_FACTORS: usize = 5;

/// Confidence of a native explanation when the model has no class distribution
pub const NATIVE_CONFIDENCE: f64 = 0.85;

/// Confidence of a fallback explanation when the model has no class distribution
pub const FALLBACK_CONFIDENCE: f64 = 0.75;

/// Default seed of the fallback attribution stream
pub const DEFAULT_EXPLAINER_SEED: u64 = 42;

/// Model internals an [`Explainer`] can draw on
pub trait AttributionModel {
    fn feature_names(&self) -> Vec<String>;

    /// Per-class, per-feature contributions traced through the model
    fn path_attributions(&self, _row: &[f64]) -> Option<Vec<Vec<f64>>> {
        None
    }

    /// Class scores for a row, used for occlusion and confidence
    fn class_scores(&self, _row: &[f64]) -> Option<Vec<f64>> {
        None
    }

    /// Static per-feature importances
    fn importances(&self) -> Option<Vec<f64>> {
        None
    }
}

/// Which path produced the attributions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributionSource {
    Path,
    Occlusion,
    Importance,
    Random,
}

impl AttributionSource {
    pub fn is_native(&self) -> bool {
        matches!(self, AttributionSource::Path | AttributionSource::Occlusion)
    }
}

/// Attribution-based explainer bound to a background sample
pub struct Explainer {
    background: Vec<Vec<f64>>,
    rng: Mutex<ChaCha8Rng>,
}

impl Explainer {
    pub fn new(background: Vec<Vec<f64>>, seed: u64) -> Self {
        Self {
            background,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    pub fn background(&self) -> &[Vec<f64>] {
        &self.background
    }

    /// Explain one row.
    ///
    /// `class_index` selects the class to attribute; otherwise the class
    /// whose attributions sum largest is used.
    pub fn explain<M: AttributionModel + ?Sized>(
        &self,
        model: &M,
        row: &[f64],
        class_index: Option<usize>,
        top_n: usize,
    ) -> Explanation {
        let names = model.feature_names();
        let scores = model.class_scores(row);
        let (values, source) = self.attribute(model, row, class_index, scores.as_deref());
        debug!(source = ?source, features = names.len(), "Computed attributions");

        let confidence = match &scores {
            Some(s) if !s.is_empty() => s.iter().cloned().fold(0.0_f64, f64::max).clamp(0.0, 1.0),
            _ if source.is_native() => NATIVE_CONFIDENCE,
            _ => FALLBACK_CONFIDENCE,
        };

        build_explanation(&names, &values, top_n, confidence)
    }

    /// Attribution values for `row`, preferring the richest available path
    pub fn attribute<M: AttributionModel + ?Sized>(
        &self,
        model: &M,
        row: &[f64],
        class_index: Option<usize>,
        scores: Option<&[f64]>,
    ) -> (Vec<f64>, AttributionSource) {
        if let Some(per_class) = model.path_attributions(row) {
            if let Some(values) = select_class(per_class, class_index) {
                return (values, AttributionSource::Path);
            }
        }

        if let Some(base) = scores {
            if !self.background.is_empty() && !base.is_empty() {
                if let Some(values) = self.occlusion(model, row, base, class_index) {
                    return (values, AttributionSource::Occlusion);
                }
            }
        }

        self.fallback(model, row)
    }

    /// `f(x) - mean_b f(x with feature i := b_i)` for every class and feature
    fn occlusion<M: AttributionModel + ?Sized>(
        &self,
        model: &M,
        row: &[f64],
        base: &[f64],
        class_index: Option<usize>,
    ) -> Option<Vec<f64>> {
        let classes = base.len();
        let mut per_class = vec![vec![0.0; row.len()]; classes];

        for feature in 0..row.len() {
            let mut mean = vec![0.0; classes];
            let mut counted = 0usize;
            for reference in &self.background {
                let Some(value) = reference.get(feature) else {
                    continue;
                };
                let mut occluded = row.to_vec();
                occluded[feature] = *value;
                let scores = model.class_scores(&occluded)?;
                for (m, s) in mean.iter_mut().zip(&scores) {
                    *m += s;
                }
                counted += 1;
            }
            if counted == 0 {
                continue;
            }
            for class in 0..classes {
                per_class[class][feature] = base[class] - mean[class] / counted as f64;
            }
        }

        select_class(per_class, class_index)
    }

    /// Importances times `sign(x - 0.5)`, or seeded random weights
    fn fallback<M: AttributionModel + ?Sized>(&self, model: &M, row: &[f64]) -> (Vec<f64>, AttributionSource) {
        let (weights, source) = match model.importances() {
            Some(importances) if importances.len() == row.len() => (importances, AttributionSource::Importance),
            _ => (self.random_weights(row.len()), AttributionSource::Random),
        };
        let values = weights
            .iter()
            .zip(row)
            .map(|(w, x)| w * sign(x - 0.5))
            .collect();
        (values, source)
    }

    fn random_weights(&self, n: usize) -> Vec<f64> {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let raw: Vec<f64> = (0..n).map(|_| rng.gen_range(f64::EPSILON..1.0)).collect();
        let total: f64 = raw.iter().sum();
        raw.into_iter().map(|w| w / total).collect()
    }
}

fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Pick the requested class, or the one whose attributions sum largest
fn select_class(per_class: Vec<Vec<f64>>, class_index: Option<usize>) -> Option<Vec<f64>> {
    if let Some(idx) = class_index {
        if idx < per_class.len() {
            return per_class.into_iter().nth(idx);
        }
    }
    per_class.into_iter().fold(None, |best: Option<Vec<f64>>, candidate| match best {
        Some(b) if b.iter().sum::<f64>() >= candidate.iter().sum::<f64>() => Some(b),
        _ => Some(candidate),
    })
}

/// Rank attributions into a padded explanation
pub fn build_explanation(names: &[String], values: &[f64], top_n: usize, confidence: f64) -> Explanation {
    let mut ranked: Vec<(&String, f64)> = names.iter().zip(values.iter().copied()).collect();
    ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));

    let target = top_n.max(MIN_FACTORS);
    let mut factors: Vec<ExplanationFactor> = ranked
        .iter()
        .take(target)
        .map(|(name, value)| make_factor(name, *value))
        .collect();
    pad_factors(&mut factors, target);

    let mut importance =
        FeatureImportance::from_pairs(ranked.iter().map(|(name, value)| ((*name).clone(), *value)));
    for factor in &factors {
        importance.insert_missing(&factor.feature, factor.contribution);
    }

    Explanation {
        top_factors: factors,
        feature_importance: importance,
        model_confidence: confidence.clamp(0.0, 1.0),
    }
}

/// Factor with impact from the deadband and a table description
pub fn make_factor(feature: &str, contribution: f64) -> ExplanationFactor {
    let impact = Impact::from_contribution(contribution);
    ExplanationFactor {
        feature: feature.to_string(),
        impact,
        contribution,
        description: describe(feature, impact),
    }
}

/// Human-readable description for a (feature, impact) pair
pub fn describe(feature: &str, impact: Impact) -> String {
    let known = match (feature, impact) {
        ("prior_travel", Impact::Positive) => Some("Previous US travel history increases approval likelihood"),
        ("prior_travel", Impact::Negative) => Some("No prior travel may require additional documentation"),
        ("sponsor_type", Impact::Positive) => Some("Strong sponsorship demonstrates ties and support"),
        ("sponsor_type", Impact::Negative) => Some("Sponsorship type may require additional verification"),
        ("document_count", Impact::Positive) => Some("Complete documentation submitted"),
        ("document_count", Impact::Negative) => Some("Consider submitting additional supporting documents"),
        ("document_completeness", Impact::Positive) => {
            Some("All required documents for this visa category are present")
        }
        ("document_completeness", Impact::Negative) => {
            Some("Required documents for this visa category are missing")
        }
        ("nationality", Impact::Positive) => Some("Nationality has favorable processing statistics"),
        ("nationality", Impact::Negative) => Some("Nationality may experience longer processing times"),
        ("visa_type", Impact::Positive) => Some("Visa category has strong approval rates"),
        ("visa_type", Impact::Negative) => Some("Visa category requires thorough documentation"),
        ("consulate", Impact::Positive) => Some("Consulate has efficient processing times"),
        ("consulate", Impact::Negative) => Some("Consulate may have longer wait times"),
        ("days_since_submission", Impact::Positive) => Some("Application timing is favorable"),
        ("days_since_submission", Impact::Negative) => Some("Extended processing time expected"),
        _ => None,
    };

    match known {
        Some(text) => text.to_string(),
        None => format!("{} has {} impact on prediction", title_case(feature), impact.as_str()),
    }
}

/// `days_since_submission` -> `Days Since Submission`
pub fn title_case(feature: &str) -> String {
    feature
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        ["prior_travel", "sponsor_type", "document_count", "nationality", "consulate", "visa_type", "days_since_submission"]
            .iter()
            .take(n)
            .map(|s| s.to_string())
            .collect()
    }

    struct ImportanceOnly;

    impl AttributionModel for ImportanceOnly {
        fn feature_names(&self) -> Vec<String> {
            names(5)
        }

        fn importances(&self) -> Option<Vec<f64>> {
            Some(vec![0.3, 0.25, 0.2, 0.15, 0.1])
        }

        fn class_scores(&self, _row: &[f64]) -> Option<Vec<f64>> {
            Some(vec![0.7, 0.2, 0.1])
        }
    }

    struct Bare;

    impl AttributionModel for Bare {
        fn feature_names(&self) -> Vec<String> {
            names(3)
        }
    }

    /// Linear scorer: class 0 rises with feature 0, class 1 with feature 1
    struct Linear;

    impl AttributionModel for Linear {
        fn feature_names(&self) -> Vec<String> {
            names(2)
        }

        fn class_scores(&self, row: &[f64]) -> Option<Vec<f64>> {
            Some(vec![0.5 * row[0], 0.25 * row[1]])
        }
    }

    #[test]
    fn test_importance_fallback_signs() {
        let explainer = Explainer::new(vec![], DEFAULT_EXPLAINER_SEED);
        let row = [0.8, 0.5, 0.9, 0.3, 0.6];
        let (values, source) = explainer.attribute(&ImportanceOnly, &row, None, None);
        assert_eq!(source, AttributionSource::Importance);
        assert_eq!(values, vec![0.3, 0.0, 0.2, -0.15, 0.1]);
    }

    #[test]
    fn test_fallback_confidence_uses_probabilities() {
        let explainer = Explainer::new(vec![], DEFAULT_EXPLAINER_SEED);
        let explanation = explainer.explain(&ImportanceOnly, &[0.8, 0.5, 0.9, 0.3, 0.6], None, 3);
        assert_eq!(explanation.top_factors.len(), MIN_FACTORS);
        assert_eq!(explanation.model_confidence, 0.7);
        assert_eq!(explanation.top_factors[0].feature, "prior_travel");
        assert_eq!(explanation.top_factors[0].impact, Impact::Positive);
        assert_eq!(explanation.top_factors[1].feature, "document_count");
    }

    #[test]
    fn test_random_fallback_is_seeded_and_padded() {
        let a = Explainer::new(vec![], 9);
        let b = Explainer::new(vec![], 9);
        let row = [0.9, 0.1, 0.7];
        let (va, source) = a.attribute(&Bare, &row, None, None);
        let (vb, _) = b.attribute(&Bare, &row, None, None);
        assert_eq!(source, AttributionSource::Random);
        assert_eq!(va, vb);
        let total: f64 = va.iter().map(|v| v.abs()).sum();
        assert!((total - 1.0).abs() < 1e-9);

        let explanation = a.explain(&Bare, &row, None, 5);
        assert_eq!(explanation.top_factors.len(), 5);
        assert_eq!(explanation.model_confidence, FALLBACK_CONFIDENCE);
        for factor in &explanation.top_factors {
            assert!(explanation.feature_importance.contains(&factor.feature));
        }
    }

    #[test]
    fn test_occlusion_against_background() {
        let explainer = Explainer::new(vec![vec![0.0, 0.0], vec![2.0, 0.0]], DEFAULT_EXPLAINER_SEED);
        let row = [4.0, 8.0];
        let scores = Linear.class_scores(&row).unwrap();
        let (values, source) = explainer.attribute(&Linear, &row, Some(0), Some(&scores));
        assert_eq!(source, AttributionSource::Occlusion);
        // class 0: f = 2.0, occluding feature 0 gives mean(0.0, 1.0) = 0.5
        assert!((values[0] - 1.5).abs() < 1e-12);
        assert!(values[1].abs() < 1e-12);

        // Without a class index the larger class (class 1: 0.0 + 2.0) wins
        let (auto, _) = explainer.attribute(&Linear, &row, None, Some(&scores));
        assert!((auto[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(
            describe("prior_travel", Impact::Positive),
            "Previous US travel history increases approval likelihood"
        );
        assert_eq!(
            describe("rule_volatility", Impact::Negative),
            "Rule Volatility has negative impact on prediction"
        );
        assert_eq!(title_case("days_since_submission"), "Days Since Submission");
    }

    #[test]
    fn test_build_explanation_ranks_by_magnitude() {
        let explanation = build_explanation(&names(7), &[0.02, -0.3, 0.1, 0.005, -0.05, 0.2, 0.0], 5, 1.3);
        let ranked: Vec<&str> = explanation.top_factors.iter().map(|f| f.feature.as_str()).collect();
        assert_eq!(ranked, vec!["sponsor_type", "visa_type", "document_count", "consulate", "prior_travel"]);
        assert_eq!(explanation.top_factors[4].impact, Impact::Positive);
        assert_eq!(explanation.feature_importance.len(), 7);
        assert_eq!(explanation.model_confidence, 1.0);
    }
}
