//! Ledger events: raw logs, their normalized form and typed payloads.
//!
//! ## Wire contract
//!
//! | Event | Fields |
//! |-------|--------|
//! | `Controller_ConsentGivenTo` | `subjectIdHash: string`, `newProcessorsWhiteListed: address[]` |
//! | `Controller_SubjectDataErased` | `subjectIdHash: string` |
//! | `Processor_SubjectDataErased` | `subjectIdHash: string`, `processorIdHash: address` |

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use shared_types::{Identity, SubjectId, TxHash};

use crate::domain::abi::{AbiError, ContractAbi};
use crate::error::{WorkflowError, WorkflowResult};

pub const CONSENT_GIVEN_EVENT: &str = "Controller_ConsentGivenTo";
pub const CONTROLLER_ERASURE_EVENT: &str = "Controller_SubjectDataErased";
pub const PROCESSOR_ERASURE_EVENT: &str = "Processor_SubjectDataErased";

/// Block reference for log queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Earliest,
    Latest,
    Number(u64),
}

/// Server-side log filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Identity,
    /// Accepted first topics; empty accepts every event of the contract.
    pub topics: Vec<[u8; 32]>,
    pub from_block: BlockTag,
}

impl LogFilter {
    pub fn matches(&self, log: &RawLog) -> bool {
        if log.address != self.address {
            return false;
        }
        if let (BlockTag::Number(from), Some(block)) = (self.from_block, log.block_number) {
            if block < from {
                return false;
            }
        }
        if self.topics.is_empty() {
            return true;
        }
        log.topics
            .first()
            .is_some_and(|topic| self.topics.contains(topic))
    }
}

/// A log entry exactly as the node delivers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Identity,
    pub topics: Vec<[u8; 32]>,
    pub data: Vec<u8>,
    pub block_number: Option<u64>,
    pub tx_hash: Option<TxHash>,
    pub log_index: Option<u64>,
}

/// A decoded, immutable ledger event.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEvent {
    pub event_type: String,
    /// Payload fields keyed by their ABI parameter names.
    pub params: Map<String, Value>,
    pub block_number: Option<u64>,
    pub tx_hash: Option<TxHash>,
    pub log_index: Option<u64>,
    /// Emitting contract address.
    pub address: Option<Identity>,
}

impl LedgerEvent {
    /// An event with only a type and payload, e.g. replayed from storage.
    pub fn new(event_type: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            event_type: event_type.into(),
            params,
            block_number: None,
            tx_hash: None,
            log_index: None,
            address: None,
        }
    }

    /// Decode a raw log using the contract interface.
    pub fn decode(abi: &ContractAbi, log: &RawLog) -> Result<Self, AbiError> {
        let topic = log
            .topics
            .first()
            .ok_or_else(|| AbiError::InvalidDescriptor("log without topics".into()))?;
        let descriptor = abi.event_by_topic(topic).ok_or_else(|| {
            AbiError::InvalidDescriptor(format!("no event with topic 0x{}", hex::encode(topic)))
        })?;

        let params = descriptor
            .decode_log(&log.topics, &log.data)?
            .into_iter()
            .map(|(name, token)| (name, token.to_json()))
            .collect();

        Ok(Self {
            event_type: descriptor.name.clone(),
            params,
            block_number: log.block_number,
            tx_hash: log.tx_hash,
            log_index: log.log_index,
            address: Some(log.address.clone()),
        })
    }

    fn fields<T: DeserializeOwned>(&self) -> WorkflowResult<T> {
        serde_json::from_value(Value::Object(self.params.clone())).map_err(|e| {
            WorkflowError::MalformedEvent {
                event: self.event_type.clone(),
                reason: e.to_string(),
            }
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsentGivenToFields {
    subject_id_hash: String,
    new_processors_white_listed: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ControllerErasureFields {
    subject_id_hash: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessorErasureFields {
    subject_id_hash: String,
    processor_id_hash: String,
}

/// Typed payload of the events the workflow reacts to.
///
/// Identities are normalized here, once, so handlers compare canonical values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    ConsentGiven {
        subject: SubjectId,
        processors: Vec<Identity>,
    },
    ControllerErasure {
        subject: SubjectId,
    },
    ProcessorErasure {
        subject: SubjectId,
        processor: Identity,
    },
}

impl EventPayload {
    /// `Ok(None)` for events the workflow has no interest in.
    pub fn from_event(event: &LedgerEvent) -> WorkflowResult<Option<Self>> {
        let malformed = |reason: String| WorkflowError::MalformedEvent {
            event: event.event_type.clone(),
            reason,
        };

        let payload = match event.event_type.as_str() {
            CONSENT_GIVEN_EVENT => {
                let fields: ConsentGivenToFields = event.fields()?;
                let processors = fields
                    .new_processors_white_listed
                    .iter()
                    .map(|raw| Identity::parse(raw))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| malformed(e.to_string()))?;
                Self::ConsentGiven {
                    subject: SubjectId::from_hash(fields.subject_id_hash),
                    processors,
                }
            }
            CONTROLLER_ERASURE_EVENT => {
                let fields: ControllerErasureFields = event.fields()?;
                Self::ControllerErasure {
                    subject: SubjectId::from_hash(fields.subject_id_hash),
                }
            }
            PROCESSOR_ERASURE_EVENT => {
                let fields: ProcessorErasureFields = event.fields()?;
                Self::ProcessorErasure {
                    subject: SubjectId::from_hash(fields.subject_id_hash),
                    processor: Identity::parse(&fields.processor_id_hash)
                        .map_err(|e| malformed(e.to_string()))?,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(payload))
    }

    pub fn subject(&self) -> &SubjectId {
        match self {
            Self::ConsentGiven { subject, .. }
            | Self::ControllerErasure { subject }
            | Self::ProcessorErasure { subject, .. } => subject,
        }
    }

    /// Whether a consent grant authorizes `identity`.
    pub fn names(&self, identity: &Identity) -> bool {
        match self {
            Self::ConsentGiven { processors, .. } => processors.contains(identity),
            _ => false,
        }
    }
}

/// One catch-all observation for the audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub event_name: String,
    pub params: Map<String, Value>,
    /// Account that sent the emitting transaction.
    pub from: Option<Identity>,
    /// Assigned locally at delivery; the ledger carries no wall-clock time.
    pub observed_at: DateTime<Utc>,
    pub tx_hash: Option<TxHash>,
    pub block_number: Option<u64>,
}
