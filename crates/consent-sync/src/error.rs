//! Error types for the ledger-sync subsystem

use std::fmt;

use shared_types::{DataStateError, Identity, IdentityError, NodeRole, SubjectId, TxHash};
use thiserror::Error;

use crate::domain::abi::AbiError;
use crate::domain::state::SubjectState;

/// The contract method a failed write was attempting, for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSite {
    pub method: String,
    /// Rendered parameters.
    pub params: String,
}

impl CallSite {
    pub fn new(method: impl Into<String>, params: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: params.into(),
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.method.is_empty() {
            f.write_str("unattributed transaction")
        } else {
            write!(f, "contract method {} with params {}", self.method, self.params)
        }
    }
}

/// Errors talking to the ledger node or the deployed contract.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No contract configuration stored under the configured key
    #[error("No contract deployed (configuration key {key} is absent)")]
    ContractNotDeployed { key: String },

    /// Stored configuration could not be turned into a contract binding
    #[error("Invalid contract configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Receipt never appeared within the polling budget
    #[error("{call} did not resolve in time: transaction {tx_hash} unconfirmed after {attempts} polls")]
    TransactionTimeout {
        tx_hash: TxHash,
        attempts: u32,
        call: CallSite,
    },

    /// Receipt appeared with a failure status
    #[error("{call} failed: transaction {tx_hash} reverted in block {block_number}")]
    TransactionFailed {
        tx_hash: TxHash,
        block_number: u64,
        call: CallSite,
    },

    /// Transport-level failure reaching the node
    #[error("Ledger node unreachable: {reason}")]
    NodeUnreachable { reason: String },

    /// JSON-RPC error object returned by the node
    #[error("Ledger RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Response did not have the expected shape
    #[error("Unexpected ledger response: {reason}")]
    UnexpectedResponse { reason: String },

    /// Method missing from the contract interface
    #[error("Unknown contract method: {0}")]
    UnknownMethod(String),

    /// Event missing from the contract interface
    #[error("Unknown contract event: {0}")]
    UnknownEvent(String),

    /// Encoding or decoding failure
    #[error("ABI error: {0}")]
    Abi(#[from] AbiError),

    /// Configuration store failure
    #[error("Configuration store error: {reason}")]
    ConfigStore { reason: String },

    /// A wait was interrupted by the shutdown signal
    #[error("Operation cancelled by shutdown")]
    Cancelled,
}

impl LedgerError {
    /// Attach the attempted method to confirmation failures.
    pub fn with_call(self, method: &str, params: &str) -> Self {
        match self {
            Self::TransactionTimeout {
                tx_hash, attempts, ..
            } => Self::TransactionTimeout {
                tx_hash,
                attempts,
                call: CallSite::new(method, params),
            },
            Self::TransactionFailed {
                tx_hash,
                block_number,
                ..
            } => Self::TransactionFailed {
                tx_hash,
                block_number,
                call: CallSite::new(method, params),
            },
            other => other,
        }
    }

    pub fn unexpected(reason: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            reason: reason.into(),
        }
    }
}

impl From<IdentityError> for LedgerError {
    fn from(err: IdentityError) -> Self {
        Self::UnexpectedResponse {
            reason: err.to_string(),
        }
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors raised by the consent/erasure workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Pulling the subject's payload from the controller failed
    #[error("Failed to fetch data for subject {subject} from the controller: {reason}")]
    PeerFetch { subject: SubjectId, reason: String },

    /// The local persistence collaborator failed
    #[error("Subject store error for {subject}: {reason}")]
    SubjectStore { subject: SubjectId, reason: String },

    /// Local action not allowed from the subject's current state
    #[error("Cannot {action} subject {subject} in state {from:?}")]
    InvalidTransition {
        subject: SubjectId,
        from: SubjectState,
        action: &'static str,
    },

    /// Another transition for the subject is still running
    #[error("Subject {subject} has a transition in flight")]
    SubjectBusy { subject: SubjectId },

    /// Consent named processors the ledger does not know
    #[error("Processors not registered on the ledger: {processors:?}")]
    UnknownProcessors { processors: Vec<Identity> },

    /// Operation reserved for the other role
    #[error("{operation} is not available in {role:?} mode")]
    WrongRole {
        operation: &'static str,
        role: NodeRole,
    },

    /// Event fields did not match the wire contract
    #[error("Malformed {event} payload: {reason}")]
    MalformedEvent { event: String, reason: String },

    #[error(transparent)]
    DataState(#[from] DataStateError),
}

/// Result type for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_names_method_and_params() {
        let err = LedgerError::TransactionTimeout {
            tx_hash: TxHash([1; 32]),
            attempts: 20,
            call: CallSite::default(),
        }
        .with_call("recordErasureByController", "[\"abc\"]");

        let message = err.to_string();
        assert!(message.contains("recordErasureByController"));
        assert!(message.contains("[\"abc\"]"));
        assert!(message.contains("20 polls"));
    }

    #[test]
    fn test_with_call_leaves_other_errors_alone() {
        let err = LedgerError::Cancelled.with_call("setProcessors", "[]");
        assert!(matches!(err, LedgerError::Cancelled));
    }
}
