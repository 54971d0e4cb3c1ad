//! Case lookup for requests that carry only a case id

use anyhow::{Context, Result};
use async_trait::async_trait;
use predictor_lib::CaseRecord;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Resolves case ids to stored case records
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// `None` when the case is unknown
    async fn get(&self, case_id: &str) -> Option<CaseRecord>;
}

/// Case records held in memory, optionally seeded from a JSON file
#[derive(Debug, Default, Clone)]
pub struct InMemoryCaseStore {
    cases: HashMap<String, CaseRecord>,
}

impl InMemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a JSON object mapping case id to case record
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let cases: HashMap<String, CaseRecord> =
            serde_json::from_str(&text).with_context(|| format!("Invalid case file {}", path.display()))?;
        info!(path = %path.display(), cases = cases.len(), "Loaded case records");
        Ok(Self { cases })
    }

    pub fn insert(&mut self, case_id: impl Into<String>, case: CaseRecord) {
        self.cases.insert(case_id.into(), case);
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

#[async_trait]
impl CaseStore for InMemoryCaseStore {
    async fn get(&self, case_id: &str) -> Option<CaseRecord> {
        self.cases.get(case_id).cloned()
    }
}
