//! # Adapters Layer (Hexagonal Architecture)
//!
//! Implements the outbound ports: the JSON-RPC ledger node, the controller's
//! HTTP endpoint, configuration and subject stores, the audit trail, and
//! in-memory doubles for tests.

mod audit;
mod config_store;
mod json_rpc;
mod mock;
mod peer_http;
mod subject_store;

pub use audit::{RecordingAuditSink, TracingAuditSink};
pub use config_store::{FileConfigStore, InMemoryConfigStore};
pub use json_rpc::{
    JsonRpcConnector, JsonRpcLedgerNode, DEFAULT_FILTER_POLL_INTERVAL, DEFAULT_REQUEST_TIMEOUT,
    MAX_FILTER_POLL_FAILURES,
};
pub use mock::{
    MockConnector, MockLedgerNode, MockPeerDataSource, ReceiptPoll, RecordingLedgerApi,
};
pub use peer_http::HttpPeerDataSource;
pub use subject_store::InMemorySubjectStore;
