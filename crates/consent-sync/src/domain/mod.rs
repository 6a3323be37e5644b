//! Domain module for ledger synchronization
//!
//! ## Core Modules
//! - abi: contract interface descriptor and call/log codec
//! - events: raw logs, decoded events and typed payloads
//! - state: per-subject state machine and handler registry
//! - transaction: requests, receipts and pending writes

pub mod abi;
pub mod events;
pub mod state;
pub mod transaction;

pub use abi::{keccak256, render_tokens, AbiError, ContractAbi, EventDescriptor, Function, Token};
pub use events::{
    AuditEntry, BlockTag, EventPayload, LedgerEvent, LogFilter, RawLog, CONSENT_GIVEN_EVENT,
    CONTROLLER_ERASURE_EVENT, PROCESSOR_ERASURE_EVENT,
};
pub use state::{
    reduce_local, HandlerRegistry, LocalAction, ReactionContext, Reducer, SideEffect,
    SubjectState, Transition,
};
pub use transaction::{
    CallRequest, PendingTransaction, TransactionReceipt, TransactionRequest, TransactionStatus,
};
