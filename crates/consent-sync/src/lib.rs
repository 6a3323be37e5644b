//! # consent-sync
//!
//! Ledger synchronization for consent and erasure state shared between a data
//! controller and independent data processors.
//!
//! ## Overview
//!
//! This subsystem provides:
//! - **Ledger Gateway**: binding to the deployed consent contract, reads and writes
//! - **Confirmation Tracker**: bounded receipt polling for every write
//! - **Readiness Monitor**: unbounded liveness probing before the node is used
//! - **Event Subscriptions**: live contract events dispatched to handlers
//! - **Reaction Workflow**: per-subject state machine driving fetch and erasure
//!
//! ## Architecture
//!
//! ```text
//! ReadinessMonitor ──replaces──→ NodeSlot ←──current()── LedgerGateway
//!                                                          │        │
//!                                     ConfirmationTracker ←┘        └→ EventSubscriptionManager
//!                                              │                                │
//!                                       ConsentContract ←──── writes ──── ConsentWorkflow
//!                                                                          (EventHandler)
//! ```
//!
//! ## Subject lifecycle
//!
//! ```text
//! Unknown ──→ ConsentPending ──→ Consented ──→ ErasureRequested ──→ Erased
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use consent_sync::{SyncRuntime, StartOutcome};
//!
//! let runtime = SyncRuntime::new(role, readiness, subscriptions, workflow)
//!     .with_shutdown(shutdown);
//!
//! match runtime.start_all().await? {
//!     StartOutcome::Skipped => info!("controller mode"),
//!     StartOutcome::Started { subscriptions, .. } => info!(count = subscriptions.len(), "listening"),
//! }
//! ```

pub mod adapters;
pub mod confirmation;
pub mod contract;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod ports;
pub mod readiness;
pub mod runtime;
pub mod shutdown;
pub mod subscription;
pub mod workflow;

pub use confirmation::{poll_receipt, ConfirmationConfig, ConfirmationTracker};
pub use contract::ConsentContract;
pub use domain::{
    AuditEntry, ContractAbi, EventPayload, HandlerRegistry, LedgerEvent, SubjectState, Token,
    TransactionReceipt, CONSENT_GIVEN_EVENT, CONTROLLER_ERASURE_EVENT, PROCESSOR_ERASURE_EVENT,
};
pub use error::{LedgerError, LedgerResult, WorkflowError, WorkflowResult};
pub use gateway::{ContractHandle, LedgerGateway, NodeSlot, CONTRACT_CONFIG_KEY};
pub use ports::{ConsentLedgerApi, ContractConfig};
pub use readiness::{ReadinessConfig, ReadinessMonitor};
pub use runtime::{StartOutcome, SyncRuntime, PROCESSOR_EVENTS};
pub use shutdown::ShutdownSignal;
pub use subscription::{EventHandler, EventSubscriptionManager, SubscriptionConfig, SubscriptionId};
pub use workflow::ConsentWorkflow;
