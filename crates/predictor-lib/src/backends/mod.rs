//! Backend variants
//!
//! Every backend answers the same three questions about a case (outcome
//! probabilities, days to decision with an ordered interval, and the drivers
//! behind the answer) through the [`Backend`] trait. The engine holds them as
//! `Arc<dyn Backend>` and never inspects the concrete type.

pub mod forest;
mod heuristic;
pub mod neural;
mod output;

pub use forest::{ForestBundle, ForestConfig, TreeEnsembleBackend};
pub use heuristic::HeuristicBackend;
pub use neural::{NeuralBackend, NeuralHeads};
pub use output::{OutputConfig, OutputFormatter, DEFAULT_INTERVAL_CONFIDENCE};

use crate::error::InferenceError;
use crate::models::{BackendKind, CaseRecord, Explanation, StatusProbabilities, TimeEstimate};
use chrono::NaiveDate;

/// Everything a backend prices from one feature pass
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub status: StatusProbabilities,
    pub time: TimeEstimate,
    pub explanation: Explanation,
}

/// Shared capability set of all prediction backends
pub trait Backend: Send + Sync {
    /// Backend family this instance belongs to
    fn kind(&self) -> BackendKind;

    /// Version tag stamped on results
    fn version(&self) -> &str;

    fn predict_status(&self, case: &CaseRecord, as_of: NaiveDate) -> Result<StatusProbabilities, InferenceError>;

    fn predict_time(&self, case: &CaseRecord, as_of: NaiveDate) -> Result<TimeEstimate, InferenceError>;

    /// Ranked drivers of the prediction, at least `top_n` (and never fewer than 5) factors
    fn explain(&self, case: &CaseRecord, as_of: NaiveDate, top_n: usize) -> Result<Explanation, InferenceError>;

    /// Status, time and explanation together
    fn predict(&self, case: &CaseRecord, as_of: NaiveDate, top_n: usize) -> Result<Prediction, InferenceError> {
        Ok(Prediction {
            status: self.predict_status(case, as_of)?,
            time: self.predict_time(case, as_of)?,
            explanation: self.explain(case, as_of, top_n)?,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic labeled corpora for fitting backends in tests

    use crate::models::{CaseOutcome, CaseRecord, SponsorType, TrainingExample, VisaType};
    use chrono::{Duration, NaiveDate};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    pub fn reference_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    pub fn labeled_corpus(n: usize, seed: u64) -> Vec<TrainingExample> {
        let nationalities = ["India", "China", "Mexico", "Brazil", "Nigeria"];
        let consulates = ["New Delhi", "Beijing", "Mexico City", "London"];
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        (0..n)
            .map(|_| {
                let docs = rng.gen_range(1..=9usize);
                let prior_travel = rng.gen_bool(0.5);
                let sponsor = SponsorType::ALL[rng.gen_range(0..SponsorType::ALL.len())];
                let case = CaseRecord {
                    nationality: nationalities[rng.gen_range(0..nationalities.len())].to_string(),
                    visa_type: VisaType::ALL[rng.gen_range(0..VisaType::ALL.len())],
                    consulate: consulates[rng.gen_range(0..consulates.len())].to_string(),
                    submission_date: reference_date() - Duration::days(rng.gen_range(0..90)),
                    documents: (0..docs).map(|i| format!("Doc {}", i)).collect(),
                    sponsor_type: sponsor,
                    prior_travel,
                };

                let mut score = docs as f64 / 9.0 + if prior_travel { 0.3 } else { 0.0 };
                if sponsor.is_institutional() {
                    score += 0.2;
                }
                score += rng.gen_range(-0.15..0.15);
                let outcome = if score > 0.8 {
                    CaseOutcome::Approved
                } else if score > 0.45 {
                    CaseOutcome::Rfe
                } else {
                    CaseOutcome::Denied
                };
                let days_to_decision = 30.0 + (9 - docs) as f64 * 4.0 + rng.gen_range(0.0..15.0);

                TrainingExample {
                    case,
                    outcome,
                    days_to_decision,
                }
            })
            .collect()
    }

    /// A spread of cases covering every visa and sponsor category
    pub fn probe_cases() -> Vec<CaseRecord> {
        let mut cases = vec![CaseRecord::illustrative()];
        for (i, visa_type) in VisaType::ALL.iter().enumerate() {
            for sponsor in SponsorType::ALL {
                cases.push(CaseRecord {
                    nationality: if i % 2 == 0 { "Atlantis" } else { "India" }.to_string(),
                    visa_type: *visa_type,
                    consulate: "London".to_string(),
                    submission_date: NaiveDate::from_ymd_opt(2026, 1, 1 + i as u32).unwrap(),
                    documents: (0..i * 2).map(|d| format!("Doc {}", d)).collect(),
                    sponsor_type: sponsor,
                    prior_travel: i % 3 == 0,
                });
            }
        }
        cases
    }
}
