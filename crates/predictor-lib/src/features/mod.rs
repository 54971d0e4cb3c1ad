//! Feature pipeline
//!
//! Deterministic transforms from a [`CaseRecord`] into the representations
//! each backend consumes: a fixed-template text prompt for text models and a
//! fitted tabular encoding for tree ensembles.

mod tabular;
mod text;

pub use tabular::{TabularExtractor, CATEGORICAL_COLUMNS, FEATURE_NAMES, NUMERIC_COLUMNS, UNKNOWN};
pub use text::{encode_text, encode_text_batch, NOT_SPECIFIED};

use crate::models::{CaseRecord, VisaType};

/// Documents every application needs regardless of category
const BASE_REQUIRED: &[&str] = &["Passport", "DS-160", "Photo"];

/// Required document set for a visa category
pub fn required_documents(visa_type: VisaType) -> Vec<&'static str> {
    let extra: &[&str] = match visa_type {
        VisaType::F1 => &["I-20", "Financial Docs"],
        VisaType::H1B => &["I-797", "Employment Letter"],
        VisaType::B1B2 => &[],
        VisaType::L1 | VisaType::O1 => &["I-797"],
        VisaType::J1 => &["I-20"],
    };
    BASE_REQUIRED.iter().chain(extra.iter()).copied().collect()
}

/// Fraction of the required document set present among `documents`, in [0, 1]
pub fn document_completeness(documents: &[String], visa_type: VisaType) -> f64 {
    let required = required_documents(visa_type);
    if required.is_empty() {
        return 1.0;
    }
    let matched = required
        .iter()
        .filter(|req| documents.iter().any(|d| d == *req))
        .count();
    matched as f64 / required.len() as f64
}

/// Completeness of a case's own submission
pub fn case_completeness(case: &CaseRecord) -> f64 {
    document_completeness(&case.documents, case.visa_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_complete_h1b_submission() {
        let submitted = docs(&["Passport", "DS-160", "Photo", "I-797", "Employment Letter"]);
        assert_eq!(document_completeness(&submitted, VisaType::H1B), 1.0);
    }

    #[test]
    fn test_partial_submission() {
        let submitted = docs(&["Passport", "DS-160", "I-797", "Employment Letter"]);
        assert!((document_completeness(&submitted, VisaType::H1B) - 0.8).abs() < 1e-12);
        assert!((document_completeness(&docs(&["Passport"]), VisaType::B1B2) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_and_irrelevant_documents() {
        assert_eq!(document_completeness(&[], VisaType::F1), 0.0);
        assert_eq!(document_completeness(&docs(&["Resume", "Transcripts"]), VisaType::J1), 0.0);
    }

    #[test]
    fn test_duplicates_do_not_overcount() {
        let submitted = docs(&["Passport", "Passport", "Passport"]);
        let score = document_completeness(&submitted, VisaType::B1B2);
        assert!((score - 1.0 / 3.0).abs() < 1e-12);
        assert!((0.0..=1.0).contains(&score));
    }
}
