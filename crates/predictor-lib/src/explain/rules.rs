//! Rule-based explanations from raw case attributes

use super::{make_factor, MIN_FACTORS};
use crate::features::case_completeness;
use crate::models::{CaseRecord, Explanation, ExplanationFactor, FeatureImportance, Impact};
use chrono::NaiveDate;

/// Generic neutral factors appended, in order, until an explanation is full
pub const PADDING_FACTORS: [(&str, f64, &str); 5] = [
    ("visa_type", 0.05, "Visa category processed normally"),
    ("consulate", 0.03, "Consulate has standard processing times"),
    ("nationality", 0.02, "Processing aligns with typical patterns"),
    ("days_since_submission", 0.01, "Submission age is within the usual range"),
    ("rule_volatility", 0.01, "No recent policy changes affect this category"),
];

/// Factors implied directly by the case record
pub fn rule_factors(case: &CaseRecord) -> Vec<ExplanationFactor> {
    let mut factors = Vec::new();

    if case.prior_travel {
        factors.push(make_factor("prior_travel", 0.15));
    }

    let documents = case.document_count();
    if documents >= 7 {
        factors.push(make_factor("document_count", 0.12));
    } else if documents <= 3 {
        factors.push(make_factor("document_count", -0.10));
    }

    if case.sponsor_type.is_institutional() {
        factors.push(make_factor("sponsor_type", 0.10));
    }

    let completeness = case_completeness(case);
    if completeness < 0.5 {
        factors.push(make_factor("document_completeness", -0.08));
    } else if completeness >= 1.0 {
        factors.push(make_factor("document_completeness", 0.06));
    }

    factors
}

/// Append neutral factors until `factors` holds `target` entries.
///
/// Draws from [`PADDING_FACTORS`] in order, skipping features already
/// present, then falls back to `unattributed_{i}` placeholders.
pub fn pad_factors(factors: &mut Vec<ExplanationFactor>, target: usize) {
    for (feature, contribution, description) in PADDING_FACTORS {
        if factors.len() >= target {
            return;
        }
        if factors.iter().any(|f| f.feature == feature) {
            continue;
        }
        factors.push(ExplanationFactor {
            feature: feature.to_string(),
            impact: Impact::Neutral,
            contribution,
            description: description.to_string(),
        });
    }

    let mut index = 0;
    while factors.len() < target {
        let feature = format!("unattributed_{}", index);
        index += 1;
        if factors.iter().any(|f| f.feature == feature) {
            continue;
        }
        factors.push(ExplanationFactor {
            feature,
            impact: Impact::Neutral,
            contribution: 0.0,
            description: "No further attributable factors".to_string(),
        });
    }
}

/// Explanation built from [`rule_factors`], padded to `max(top_n, 5)` entries
pub fn rule_explanation(case: &CaseRecord, _as_of: NaiveDate, top_n: usize, confidence: f64) -> Explanation {
    let target = top_n.max(MIN_FACTORS);

    let mut factors = rule_factors(case);
    factors.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
    factors.truncate(target);
    pad_factors(&mut factors, target);

    let importance = FeatureImportance::from_pairs(factors.iter().map(|f| (f.feature.clone(), f.contribution)));

    Explanation {
        top_factors: factors,
        feature_importance: importance,
        model_confidence: confidence.clamp(0.0, 1.0),
    }
}
