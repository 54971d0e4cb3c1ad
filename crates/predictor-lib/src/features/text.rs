//! Fixed-template text serialization for text-based backends

use crate::models::CaseRecord;
use chrono::NaiveDate;

/// Placeholder used when no documents were submitted
pub const NOT_SPECIFIED: &str = "Not specified";

/// Render a case as the multi-line prompt the text models were trained on.
///
/// Pure: identical inputs always produce byte-identical output.
pub fn encode_text(case: &CaseRecord, reference_date: NaiveDate) -> String {
    let documents = if case.documents.is_empty() {
        NOT_SPECIFIED.to_string()
    } else {
        case.documents.join(", ")
    };

    format!(
        "Nationality: {}\n\
         Visa Type: {}\n\
         Consulate: {}\n\
         Documents Submitted: {}\n\
         Document Count: {}\n\
         Sponsor Type: {}\n\
         Prior US Travel: {}\n\
         Days Since Submission: {}",
        case.nationality,
        case.visa_type,
        case.consulate,
        documents,
        case.document_count(),
        case.sponsor_type,
        if case.prior_travel { "Yes" } else { "No" },
        case.days_since_submission(reference_date),
    )
}

pub fn encode_text_batch(cases: &[CaseRecord], reference_date: NaiveDate) -> Vec<String> {
    cases.iter().map(|c| encode_text(c, reference_date)).collect()
}
