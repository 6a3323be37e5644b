//! Driven Ports (SPI - Outbound Dependencies)
//!
//! Everything the subsystem needs from the outside world: the ledger node, the
//! configuration store, the controller's peer endpoint, local persistence and
//! the audit trail.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared_types::{Identity, SubjectId, TxHash};
use tokio::sync::mpsc;

use crate::domain::{
    AuditEntry, CallRequest, LogFilter, RawLog, TransactionReceipt, TransactionRequest,
};
use crate::error::{LedgerResult, WorkflowResult};

/// Live feed of logs matching a filter. Ends when the connection is lost.
pub type LogStream = mpsc::Receiver<RawLog>;

/// One connection to the ledger node's RPC endpoint.
#[async_trait]
pub trait LedgerNode: Send + Sync {
    /// Liveness probe (`net_listening`).
    async fn is_listening(&self) -> LedgerResult<bool>;

    /// Sign and send; returns as soon as the node accepted the transaction.
    async fn send_transaction(&self, request: TransactionRequest) -> LedgerResult<TxHash>;

    /// Read-only call against latest state; returns raw return data.
    async fn call(&self, request: CallRequest) -> LedgerResult<Vec<u8>>;

    /// `None` until the transaction is included.
    async fn transaction_receipt(&self, tx_hash: TxHash)
        -> LedgerResult<Option<TransactionReceipt>>;

    /// Number of the most recent block (`eth_blockNumber`).
    async fn block_number(&self) -> LedgerResult<u64>;

    /// Account that sent a transaction.
    async fn transaction_sender(&self, tx_hash: TxHash) -> LedgerResult<Option<Identity>>;

    /// Open a live log subscription.
    async fn subscribe_logs(&self, filter: LogFilter) -> LedgerResult<LogStream>;

    /// Historical logs from `filter.from_block` to latest.
    async fn past_logs(&self, filter: LogFilter) -> LedgerResult<Vec<RawLog>>;
}

/// Dials fresh node connections.
pub trait NodeConnector: Send + Sync {
    fn connect(&self) -> LedgerResult<Arc<dyn LedgerNode>>;
}

/// Stored binding of the deployed contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractConfig {
    pub address: String,
    /// JSON interface descriptor.
    pub abi_json: String,
}

/// External configuration store.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_config(&self, key: &str) -> LedgerResult<Option<ContractConfig>>;

    async fn put_config(&self, key: &str, config: ContractConfig) -> LedgerResult<()>;
}

/// The controller's public data endpoint, as seen from a processor.
#[async_trait]
pub trait PeerDataSource: Send + Sync {
    async fn fetch_subject_data(&self, subject: &SubjectId) -> WorkflowResult<serde_json::Value>;
}

/// Local persistence collaborator for subject records.
#[async_trait]
pub trait SubjectService: Send + Sync {
    async fn initialize_user(
        &self,
        subject: &SubjectId,
        payload: serde_json::Value,
    ) -> WorkflowResult<()>;

    async fn erase_data_and_revoke_consent(&self, subject: &SubjectId) -> WorkflowResult<()>;
}

/// Receives every contract event for auditing.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry);
}
