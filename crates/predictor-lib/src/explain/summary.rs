//! User-facing rendering of an explanation

use crate::models::{CaseOutcome, Explanation, ExplanationFactor, Impact};
use serde::{Deserialize, Serialize};

/// A factor with its contribution rendered as a signed percentage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedFactor {
    pub feature: String,
    pub impact: Impact,
    pub contribution: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserExplanation {
    pub summary: String,
    pub top_factors: Vec<FormattedFactor>,
    pub confidence_level: String,
    pub model_confidence: f64,
    pub recommendation: String,
}

pub fn summarize(explanation: &Explanation, outcome: CaseOutcome, estimated_days: u32) -> UserExplanation {
    let top_factors = explanation.top_factors.iter().map(format_factor).collect();

    UserExplanation {
        summary: format!(
            "Based on your case details, we predict {} with {:.0}% confidence. \
             Estimated processing time: {} days.",
            outcome.as_str().to_uppercase(),
            explanation.model_confidence * 100.0,
            estimated_days
        ),
        top_factors,
        confidence_level: confidence_level(explanation.model_confidence).to_string(),
        model_confidence: (explanation.model_confidence * 100.0).round() / 100.0,
        recommendation: recommendation(&explanation.top_factors),
    }
}

fn format_factor(factor: &ExplanationFactor) -> FormattedFactor {
    let sign = match factor.impact {
        Impact::Positive => "+",
        Impact::Negative => "-",
        Impact::Neutral => "",
    };
    FormattedFactor {
        feature: factor.feature.clone(),
        impact: factor.impact,
        contribution: format!("{}{:.1}%", sign, factor.contribution.abs() * 100.0),
        description: factor.description.clone(),
    }
}

pub fn confidence_level(confidence: f64) -> &'static str {
    if confidence >= 0.85 {
        "High confidence"
    } else if confidence >= 0.70 {
        "Moderate confidence"
    } else {
        "Lower confidence - consider additional documentation"
    }
}

/// Advice derived from up to two negative factors
pub fn recommendation(factors: &[ExplanationFactor]) -> String {
    let negative: Vec<&ExplanationFactor> = factors.iter().filter(|f| f.impact == Impact::Negative).collect();
    if negative.is_empty() {
        return "Your application looks strong. Ensure all documents are in order and submit promptly.".to_string();
    }

    let mut advice: Vec<&str> = Vec::new();
    for factor in negative.iter().take(2) {
        let feature = factor.feature.to_lowercase();
        let line = if feature.contains("document") {
            Some("Consider submitting additional supporting documents")
        } else if feature.contains("sponsor") {
            Some("Strengthen your sponsorship documentation")
        } else if feature.contains("travel") {
            Some("Provide any prior travel history documentation")
        } else {
            None
        };
        if let Some(line) = line {
            if !advice.contains(&line) {
                advice.push(line);
            }
        }
    }
    if advice.is_empty() {
        advice.push("Review your application for any missing information");
    }

    format!("{}.", advice.join(". "))
}
