//! Transactions submitted to the ledger node and their receipts.

use shared_types::{Identity, TxHash};

/// A state-changing transaction to be signed and sent by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    /// Sending account (must be unlocked on the node).
    pub from: Identity,
    /// Contract address; `None` deploys `data` as new contract code.
    pub to: Option<Identity>,
    pub data: Vec<u8>,
    pub gas: Option<u64>,
}

/// A read-only call against the latest ledger state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Identity>,
    pub to: Identity,
    pub data: Vec<u8>,
}

/// Ledger-confirmed proof that a transaction was included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    /// `false` when execution reverted.
    pub success: bool,
    /// Set for contract deployments.
    pub contract_address: Option<Identity>,
}

/// Confirmation status of a write in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Submitted,
    Confirmed,
    Failed,
    TimedOut,
}

/// One write owned by the confirmation tracker until it resolves.
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub method: String,
    /// Rendered parameters for diagnostics.
    pub params: String,
    pub tx_hash: TxHash,
    pub status: TransactionStatus,
    /// Receipt polls performed so far.
    pub polls: u32,
}

impl PendingTransaction {
    pub fn submitted(method: &str, params: String, tx_hash: TxHash) -> Self {
        Self {
            method: method.to_string(),
            params,
            tx_hash,
            status: TransactionStatus::Submitted,
            polls: 0,
        }
    }

    pub fn resolve(&mut self, status: TransactionStatus) {
        self.status = status;
    }
}
