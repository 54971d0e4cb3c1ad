//! Core data models for the case outcome predictor

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Tolerance for the probability simplex check
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Visa category of a case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VisaType {
    #[serde(rename = "F-1")]
    F1,
    #[serde(rename = "H-1B")]
    H1B,
    #[serde(rename = "B1/B2")]
    B1B2,
    #[serde(rename = "L-1")]
    L1,
    #[serde(rename = "O-1")]
    O1,
    #[serde(rename = "J-1")]
    J1,
}

impl VisaType {
    pub const ALL: [VisaType; 6] = [
        VisaType::F1,
        VisaType::H1B,
        VisaType::B1B2,
        VisaType::L1,
        VisaType::O1,
        VisaType::J1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VisaType::F1 => "F-1",
            VisaType::H1B => "H-1B",
            VisaType::B1B2 => "B1/B2",
            VisaType::L1 => "L-1",
            VisaType::O1 => "O-1",
            VisaType::J1 => "J-1",
        }
    }
}

impl fmt::Display for VisaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who sponsors the applicant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SponsorType {
    Employer,
    University,
    #[serde(rename = "self")]
    SelfSponsored,
    Family,
    Government,
}

impl SponsorType {
    pub const ALL: [SponsorType; 5] = [
        SponsorType::Employer,
        SponsorType::University,
        SponsorType::SelfSponsored,
        SponsorType::Family,
        SponsorType::Government,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SponsorType::Employer => "employer",
            SponsorType::University => "university",
            SponsorType::SelfSponsored => "self",
            SponsorType::Family => "family",
            SponsorType::Government => "government",
        }
    }

    /// Institutional sponsors that demonstrate ties and support
    pub fn is_institutional(&self) -> bool {
        matches!(self, SponsorType::Employer | SponsorType::University)
    }
}

impl fmt::Display for SponsorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A case record as resolved by the storage collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub nationality: String,
    pub visa_type: VisaType,
    pub consulate: String,
    pub submission_date: NaiveDate,
    #[serde(default, rename = "documents_submitted")]
    pub documents: Vec<String>,
    pub sponsor_type: SponsorType,
    #[serde(default)]
    pub prior_travel: bool,
}

impl CaseRecord {
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Whole days between submission and `as_of`, never negative
    pub fn days_since_submission(&self, as_of: NaiveDate) -> i64 {
        (as_of - self.submission_date).num_days().max(0)
    }

    /// Fixed record used when a request carries no case data
    pub fn illustrative() -> Self {
        Self {
            nationality: "India".to_string(),
            visa_type: VisaType::H1B,
            consulate: "New Delhi".to_string(),
            submission_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap_or_default(),
            documents: ["Passport", "DS-160", "I-797", "Employment Letter"]
                .iter()
                .map(|d| d.to_string())
                .collect(),
            sponsor_type: SponsorType::Employer,
            prior_travel: true,
        }
    }
}

/// A decided case used to fit trained backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub case: CaseRecord,
    pub outcome: CaseOutcome,
    pub days_to_decision: f64,
}

/// Outcome categories in model output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseOutcome {
    Approved,
    Rfe,
    Denied,
}

impl CaseOutcome {
    pub const ALL: [CaseOutcome; 3] = [CaseOutcome::Approved, CaseOutcome::Rfe, CaseOutcome::Denied];

    pub fn index(&self) -> usize {
        match self {
            CaseOutcome::Approved => 0,
            CaseOutcome::Rfe => 1,
            CaseOutcome::Denied => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CaseOutcome::Approved => "approved",
            CaseOutcome::Rfe => "rfe",
            CaseOutcome::Denied => "denied",
        }
    }
}

/// Probability of each outcome; always a valid distribution
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatusProbabilities {
    approved: f64,
    rfe: f64,
    denied: f64,
}

impl StatusProbabilities {
    /// Historical outcome mix, served when no backend can answer
    pub const PRIOR: StatusProbabilities = StatusProbabilities {
        approved: 0.70,
        rfe: 0.20,
        denied: 0.10,
    };

    pub fn new(approved: f64, rfe: f64, denied: f64) -> Result<Self, ModelError> {
        let valid = [approved, rfe, denied]
            .iter()
            .all(|p| p.is_finite() && (0.0..=1.0).contains(p));
        let sum = approved + rfe + denied;
        if !valid || (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(ModelError::InvalidProbabilities { approved, rfe, denied });
        }
        Ok(Self { approved, rfe, denied })
    }

    /// Build from raw non-negative scores by normalizing them onto the simplex
    pub fn from_scores(scores: &[f64]) -> Result<Self, ModelError> {
        if scores.len() != 3 {
            return Err(ModelError::WrongClassCount(scores.len()));
        }
        let clipped: Vec<f64> = scores
            .iter()
            .map(|s| if s.is_finite() { s.max(0.0) } else { 0.0 })
            .collect();
        let total: f64 = clipped.iter().sum();
        if total <= 0.0 {
            return Err(ModelError::InvalidProbabilities {
                approved: scores[0],
                rfe: scores[1],
                denied: scores[2],
            });
        }
        let approved = clipped[0] / total;
        let rfe = clipped[1] / total;
        Self::new(approved, rfe, (1.0 - approved - rfe).max(0.0))
    }

    pub fn approved(&self) -> f64 {
        self.approved
    }

    pub fn rfe(&self) -> f64 {
        self.rfe
    }

    pub fn denied(&self) -> f64 {
        self.denied
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.approved, self.rfe, self.denied]
    }

    pub fn most_likely(&self) -> CaseOutcome {
        let probs = self.as_array();
        let mut best = 0;
        for i in 1..probs.len() {
            if probs[i] > probs[best] {
                best = i;
            }
        }
        CaseOutcome::ALL[best]
    }

    pub fn max_probability(&self) -> f64 {
        self.approved.max(self.rfe).max(self.denied)
    }
}

impl<'de> Deserialize<'de> for StatusProbabilities {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            approved: f64,
            rfe: f64,
            denied: f64,
        }
        let raw = Raw::deserialize(deserializer)?;
        StatusProbabilities::new(raw.approved, raw.rfe, raw.denied).map_err(serde::de::Error::custom)
    }
}

/// Estimated days to decision with an ordered interval around it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeEstimate {
    median: u32,
    lower: u32,
    upper: u32,
}

impl TimeEstimate {
    /// Typical processing window, served when no backend can answer
    pub const PRIOR: TimeEstimate = TimeEstimate {
        median: 45,
        lower: 30,
        upper: 60,
    };

    pub fn new(median: u32, lower: u32, upper: u32) -> Result<Self, ModelError> {
        if lower > median || median > upper {
            return Err(ModelError::UnorderedInterval { lower, median, upper });
        }
        Ok(Self { median, lower, upper })
    }

    /// Convert a float triple to whole days.
    ///
    /// Lower is floored and upper ceiled, so an ordered triple stays ordered.
    pub fn from_days(median: f64, lower: f64, upper: f64) -> Result<Self, ModelError> {
        if !(median.is_finite() && lower.is_finite() && upper.is_finite()) {
            return Err(ModelError::NonFiniteEstimate);
        }
        if lower > median || median > upper {
            return Err(ModelError::UnorderedInterval {
                lower: to_days(lower.floor()),
                median: to_days(median.round()),
                upper: to_days(upper.ceil()),
            });
        }
        Self::new(
            to_days(median.round()),
            to_days(lower.floor()),
            to_days(upper.ceil()),
        )
    }

    pub fn median(&self) -> u32 {
        self.median
    }

    pub fn lower(&self) -> u32 {
        self.lower
    }

    pub fn upper(&self) -> u32 {
        self.upper
    }

    pub fn interval(&self) -> ConfidenceInterval {
        ConfidenceInterval(self.lower, self.upper)
    }
}

fn to_days(value: f64) -> u32 {
    value.clamp(0.0, u32::MAX as f64) as u32
}

/// `(lower, upper)` bounds in days, serialized as a two-element array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceInterval(pub u32, pub u32);

impl ConfidenceInterval {
    pub fn lower(&self) -> u32 {
        self.0
    }

    pub fn upper(&self) -> u32 {
        self.1
    }
}

/// Direction a factor pushed the prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Positive,
    Negative,
    Neutral,
}

impl Impact {
    /// Deadband around zero inside which a contribution counts as neutral
    pub const DEADBAND: f64 = 0.01;

    pub fn from_contribution(value: f64) -> Self {
        if value > Self::DEADBAND {
            Impact::Positive
        } else if value < -Self::DEADBAND {
            Impact::Negative
        } else {
            Impact::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Impact::Positive => "positive",
            Impact::Negative => "negative",
            Impact::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationFactor {
    pub feature: String,
    pub impact: Impact,
    pub contribution: f64,
    pub description: String,
}

/// Feature name to importance, unique keys sorted by magnitude (descending).
///
/// Serialized as a JSON object whose key order is the ranking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureImportance(Vec<(String, f64)>);

impl FeatureImportance {
    /// Build from pairs; duplicate names keep their largest magnitude
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        let mut entries: Vec<(String, f64)> = Vec::new();
        for (name, value) in pairs {
            let magnitude = value.abs();
            match entries.iter_mut().find(|(n, _)| *n == name) {
                Some(existing) => existing.1 = existing.1.max(magnitude),
                None => entries.push((name, magnitude)),
            }
        }
        let mut importance = Self(entries);
        importance.sort();
        importance
    }

    /// Insert a feature if it is not already ranked
    pub fn insert_missing(&mut self, name: &str, value: f64) {
        if !self.contains(name) {
            self.0.push((name.to_string(), value.abs()));
            self.sort();
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(n, v)| (n.as_str(), *v))
    }

    fn sort(&mut self) {
        // Stable sort keeps first-seen order for ties
        self.0
            .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    }
}

impl Serialize for FeatureImportance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FeatureImportance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ImportanceVisitor;

        impl<'de> Visitor<'de> for ImportanceVisitor {
            type Value = FeatureImportance;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of feature names to importances")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut pairs = Vec::new();
                while let Some((name, value)) = access.next_entry::<String, f64>()? {
                    pairs.push((name, value));
                }
                Ok(FeatureImportance::from_pairs(pairs))
            }
        }

        deserializer.deserialize_map(ImportanceVisitor)
    }
}

/// Ranked explanation of a prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub top_factors: Vec<ExplanationFactor>,
    pub feature_importance: FeatureImportance,
    pub model_confidence: f64,
}

/// Result envelope returned to the API boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub id: String,
    pub case_id: String,
    pub predicted_status: StatusProbabilities,
    pub estimated_days_remaining: u32,
    pub confidence_interval: ConfidenceInterval,
    pub model_version: String,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Explanation>,
}

/// Identifier of a backend variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Heuristic,
    Baseline,
    Neural,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Heuristic, BackendKind::Baseline, BackendKind::Neural];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Heuristic => "heuristic",
            BackendKind::Baseline => "baseline",
            BackendKind::Neural => "neural",
        }
    }

    /// Version tag stamped on results produced by this backend
    pub fn version(&self) -> &'static str {
        match self {
            BackendKind::Heuristic => "v1.0.0-heuristic",
            BackendKind::Baseline => "v1.0.0-baseline",
            BackendKind::Neural => "v1.0.0-neural",
        }
    }

    /// Whether the backend needs trained state at all
    pub fn is_trained(&self) -> bool {
        !matches!(self, BackendKind::Heuristic)
    }

    /// Whether the backend can serve from untrained default weights
    pub fn has_pretrained_fallback(&self) -> bool {
        matches!(self, BackendKind::Neural)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heuristic" | "mock" => Ok(BackendKind::Heuristic),
            "baseline" => Ok(BackendKind::Baseline),
            "neural" | "hf" => Ok(BackendKind::Neural),
            _ => Err(crate::error::EngineError::InvalidBackendType(s.to_string())),
        }
    }
}

/// Listing entry for a backend type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendInfo {
    #[serde(rename = "type")]
    pub kind: BackendKind,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trained_at: Option<String>,
    pub metrics: std::collections::BTreeMap<String, f64>,
    pub trained: bool,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probabilities_must_sum_to_one() {
        assert!(StatusProbabilities::new(0.7, 0.2, 0.1).is_ok());
        assert!(StatusProbabilities::new(0.7, 0.2, 0.2).is_err());
        assert!(StatusProbabilities::new(1.2, -0.1, -0.1).is_err());
        assert!(StatusProbabilities::new(f64::NAN, 0.5, 0.5).is_err());
    }

    #[test]
    fn test_probabilities_from_scores_normalizes() {
        let p = StatusProbabilities::from_scores(&[2.0, 1.0, 1.0]).unwrap();
        assert!((p.approved() - 0.5).abs() < 1e-12);
        assert!((p.approved() + p.rfe() + p.denied() - 1.0).abs() < PROBABILITY_TOLERANCE);
        assert_eq!(p.most_likely(), CaseOutcome::Approved);

        assert!(StatusProbabilities::from_scores(&[0.0, 0.0, 0.0]).is_err());
        assert!(StatusProbabilities::from_scores(&[1.0, 1.0]).is_err());
    }

    #[test]
    fn test_probabilities_deserialize_validates() {
        let ok: Result<StatusProbabilities, _> =
            serde_json::from_str(r#"{"approved":0.6,"rfe":0.3,"denied":0.1}"#);
        assert!(ok.is_ok());
        let bad: Result<StatusProbabilities, _> =
            serde_json::from_str(r#"{"approved":0.9,"rfe":0.3,"denied":0.1}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_time_estimate_ordering() {
        assert!(TimeEstimate::new(40, 30, 50).is_ok());
        assert!(TimeEstimate::new(40, 45, 50).is_err());
        assert!(TimeEstimate::new(40, 30, 35).is_err());
    }

    #[test]
    fn test_time_estimate_from_days_rounds_outward() {
        let t = TimeEstimate::from_days(41.4, 30.9, 50.1).unwrap();
        assert_eq!((t.median(), t.lower(), t.upper()), (41, 30, 51));

        let near_zero = TimeEstimate::from_days(0.3, -2.5, 1.0).unwrap();
        assert_eq!(near_zero.lower(), 0);
        assert!(near_zero.lower() <= near_zero.median());

        assert!(TimeEstimate::from_days(10.0, 12.0, 20.0).is_err());
        assert!(TimeEstimate::from_days(f64::NAN, 1.0, 2.0).is_err());
    }

    #[test]
    fn test_impact_deadband() {
        assert_eq!(Impact::from_contribution(0.02), Impact::Positive);
        assert_eq!(Impact::from_contribution(-0.02), Impact::Negative);
        assert_eq!(Impact::from_contribution(0.01), Impact::Neutral);
        assert_eq!(Impact::from_contribution(-0.005), Impact::Neutral);
    }

    #[test]
    fn test_feature_importance_is_unique_and_sorted() {
        let importance = FeatureImportance::from_pairs(vec![
            ("a".to_string(), 0.1),
            ("b".to_string(), -0.5),
            ("a".to_string(), 0.3),
        ]);
        let names: Vec<&str> = importance.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(importance.get("a"), Some(0.3));

        let json = serde_json::to_string(&importance).unwrap();
        assert_eq!(json, r#"{"b":0.5,"a":0.3}"#);
        let back: FeatureImportance = serde_json::from_str(&json).unwrap();
        assert_eq!(back, importance);
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("baseline".parse::<BackendKind>().unwrap(), BackendKind::Baseline);
        assert_eq!("HF".parse::<BackendKind>().unwrap(), BackendKind::Neural);
        assert_eq!("mock".parse::<BackendKind>().unwrap(), BackendKind::Heuristic);
        assert!("xgboost".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_case_record_wire_format() {
        let json = r#"{
            "nationality": "Brazil",
            "visa_type": "B1/B2",
            "consulate": "London",
            "submission_date": "2026-02-01",
            "documents_submitted": ["Passport"],
            "sponsor_type": "self"
        }"#;
        let case: CaseRecord = serde_json::from_str(json).unwrap();
        assert_eq!(case.visa_type, VisaType::B1B2);
        assert_eq!(case.sponsor_type, SponsorType::SelfSponsored);
        assert!(!case.prior_travel);
        assert_eq!(case.document_count(), 1);
    }

    #[test]
    fn test_days_since_submission_never_negative() {
        let case = CaseRecord::illustrative();
        let before = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        let after = NaiveDate::from_ymd_opt(2026, 1, 25).unwrap();
        assert_eq!(case.days_since_submission(before), 0);
        assert_eq!(case.days_since_submission(after), 10);
    }

    #[test]
    fn test_priors_satisfy_invariants() {
        assert_eq!(StatusProbabilities::new(0.7, 0.2, 0.1).unwrap(), StatusProbabilities::PRIOR);
        assert_eq!(TimeEstimate::new(45, 30, 60).unwrap(), TimeEstimate::PRIOR);
    }
}
