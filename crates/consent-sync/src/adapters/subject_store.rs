//! Local subject persistence.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use shared_types::SubjectId;
use tracing::info;

use crate::error::WorkflowResult;
use crate::ports::SubjectService;

/// Keeps subject payloads in memory and counts erasures per subject.
#[derive(Default)]
pub struct InMemorySubjectStore {
    records: DashMap<SubjectId, Value>,
    erasures: DashMap<SubjectId, u32>,
}

impl InMemorySubjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, subject: &SubjectId) -> bool {
        self.records.contains_key(subject)
    }

    pub fn get(&self, subject: &SubjectId) -> Option<Value> {
        self.records.get(subject).map(|record| record.clone())
    }

    pub fn erase_count(&self, subject: &SubjectId) -> u32 {
        self.erasures.get(subject).map(|n| *n).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl SubjectService for InMemorySubjectStore {
    async fn initialize_user(&self, subject: &SubjectId, payload: Value) -> WorkflowResult<()> {
        self.records.insert(subject.clone(), payload);
        info!(subject = %subject, "[subjects] Stored subject data");
        Ok(())
    }

    async fn erase_data_and_revoke_consent(&self, subject: &SubjectId) -> WorkflowResult<()> {
        self.records.remove(subject);
        *self.erasures.entry(subject.clone()).or_insert(0) += 1;
        info!(subject = %subject, "[subjects] Erased subject data and revoked consent");
        Ok(())
    }
}
