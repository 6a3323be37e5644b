//! Hexagonal ports: inbound API and outbound dependencies.

pub mod inbound;
pub mod outbound;

pub use inbound::ConsentLedgerApi;
pub use outbound::{
    AuditSink, ConfigStore, ContractConfig, LedgerNode, LogStream, NodeConnector, PeerDataSource,
    SubjectService,
};
