//! Driving Ports (API - Inbound)
//!
//! Typed operations of the consent contract. Reads go straight through the
//! gateway; every write is submitted and then confirmed.

use async_trait::async_trait;
use shared_types::{DataState, Identity, SubjectId};

use crate::domain::{LedgerEvent, TransactionReceipt};
use crate::error::LedgerResult;

#[async_trait]
pub trait ConsentLedgerApi: Send + Sync {
    /// Whether the controller has erased the subject.
    async fn get_is_erased(&self, subject: &SubjectId) -> LedgerResult<bool>;

    /// Data state for `(subject, processor)`; the controller when `processor` is `None`.
    async fn get_subject_data_state(
        &self,
        subject: &SubjectId,
        processor: Option<&Identity>,
    ) -> LedgerResult<DataState>;

    async fn get_processors(&self) -> LedgerResult<Vec<Identity>>;

    async fn is_processor(&self, processor: &Identity) -> LedgerResult<bool>;

    async fn are_all_valid_processors(&self, processors: &[Identity]) -> LedgerResult<bool>;

    async fn set_subject_data_state(
        &self,
        subject: &SubjectId,
        processor: &Identity,
        state: DataState,
    ) -> LedgerResult<TransactionReceipt>;

    /// Replace the trusted set; the controller is always kept first.
    async fn set_processors(&self, processors: &[Identity]) -> LedgerResult<TransactionReceipt>;

    async fn record_processors_update(
        &self,
        processors: &[Identity],
    ) -> LedgerResult<TransactionReceipt>;

    /// Record a grant; the controller is always prepended to the whitelist.
    async fn record_consent_given_to(
        &self,
        subject: &SubjectId,
        processors: &[Identity],
    ) -> LedgerResult<TransactionReceipt>;

    async fn record_access_by_controller(
        &self,
        subject: &SubjectId,
    ) -> LedgerResult<TransactionReceipt>;

    async fn record_erasure_by_controller(
        &self,
        subject: &SubjectId,
    ) -> LedgerResult<TransactionReceipt>;

    async fn record_erasure_by_processor(
        &self,
        subject: &SubjectId,
    ) -> LedgerResult<TransactionReceipt>;

    /// Every historical instance of an event, for auditing.
    async fn past_events(&self, event_name: &str) -> LedgerResult<Vec<LedgerEvent>>;
}
