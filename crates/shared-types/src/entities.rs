//! # Core Domain Entities
//!
//! ## Clusters
//!
//! - **Parties**: `Identity`, `NodeRole`
//! - **Subjects**: `SubjectId`, `ConsentRecord`, `DataState`
//! - **Ledger**: `TxHash`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::errors::{DataStateError, IdentityError};

// =============================================================================
// PARTIES
// =============================================================================

/// A ledger party (controller or processor), identified by its address.
///
/// The wrapped value is canonical: trimmed, `0x`-prefixed and lowercase.
/// Two identities built from `"0xAbC"` and `"0xabc"` are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Normalize a raw address string.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let trimmed = raw.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if body.is_empty() {
            return Err(IdentityError::Empty);
        }
        Ok(Self(format!("0x{}", body.to_ascii_lowercase())))
    }

    /// Build an identity from raw address bytes (as decoded from the ledger).
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address bytes, if this identity is a well-formed 20-byte address.
    pub fn to_bytes(&self) -> Result<[u8; 20], IdentityError> {
        let decoded = hex::decode(&self.0[2..])
            .map_err(|_| IdentityError::NotAnAddress(self.0.clone()))?;
        decoded
            .try_into()
            .map_err(|_| IdentityError::NotAnAddress(self.0.clone()))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(value: Identity) -> Self {
        value.0
    }
}

/// Which side of the consent relationship this node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// Originates subject records and grants consent.
    Controller,
    /// Receives subject data once consent names it.
    Processor,
}

impl NodeRole {
    /// Map the externally supplied mode gate to a role.
    pub fn from_controller_mode(controller_mode: bool) -> Self {
        if controller_mode {
            Self::Controller
        } else {
            Self::Processor
        }
    }

    pub fn is_controller(self) -> bool {
        self == Self::Controller
    }
}

// =============================================================================
// SUBJECTS
// =============================================================================

/// Pseudonymized subject identifier.
///
/// Holds the Keccak-256 hash of the subject's real identity. The clear value is
/// never stored here. Values received from the ledger are kept verbatim since
/// the contract treats them as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    /// Hash a real-world identity into its ledger pseudonym.
    pub fn pseudonymize(real_identity: &str) -> Self {
        let digest = Keccak256::digest(real_identity.as_bytes());
        Self(format!("0x{}", hex::encode(digest)))
    }

    /// Wrap an already-hashed identifier.
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-(subject, processor) data state as recorded on the ledger.
///
/// Discriminants match the contract's `uint8` encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataState {
    NoData = 0,
    Consented = 1,
    Erased = 2,
}

impl DataState {
    pub fn from_discriminant(value: u64) -> Result<Self, DataStateError> {
        match value {
            0 => Ok(Self::NoData),
            1 => Ok(Self::Consented),
            2 => Ok(Self::Erased),
            other => Err(DataStateError::UnknownDiscriminant(other)),
        }
    }

    pub fn discriminant(self) -> u8 {
        self as u8
    }

    /// Transitions only move forward; nothing restores `NoData` or un-erases.
    pub fn can_transition_to(self, next: DataState) -> bool {
        next > self
    }

    pub fn transition_to(self, next: DataState) -> Result<DataState, DataStateError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DataStateError::NonMonotonic {
                from: self,
                to: next,
            })
        }
    }
}

/// A consent grant: which processors may hold the subject's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub subject: SubjectId,
    /// Authorized processors, controller first, no duplicates.
    pub processors: Vec<Identity>,
    /// Unix seconds when the grant was issued.
    pub timestamp: u64,
}

impl ConsentRecord {
    /// Build a record, forcing the controller to the head of the list.
    pub fn new(
        subject: SubjectId,
        controller: &Identity,
        processors: impl IntoIterator<Item = Identity>,
        timestamp: u64,
    ) -> Self {
        Self {
            subject,
            processors: whitelist_with_controller(controller, processors),
            timestamp,
        }
    }

    pub fn authorizes(&self, processor: &Identity) -> bool {
        self.processors.contains(processor)
    }
}

/// Controller first, then the given processors in order, duplicates dropped.
pub fn whitelist_with_controller(
    controller: &Identity,
    processors: impl IntoIterator<Item = Identity>,
) -> Vec<Identity> {
    let mut list = vec![controller.clone()];
    for processor in processors {
        if !list.contains(&processor) {
            list.push(processor);
        }
    }
    list
}

// =============================================================================
// LEDGER
// =============================================================================

/// A 32-byte transaction hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxHash(pub [u8; 32]);

impl TxHash {
    pub fn from_hex(raw: &str) -> Result<Self, IdentityError> {
        let body = raw.trim().trim_start_matches("0x");
        let bytes = hex::decode(body).map_err(|_| IdentityError::InvalidHash(raw.to_string()))?;
        bytes
            .try_into()
            .map(Self)
            .map_err(|_| IdentityError::InvalidHash(raw.to_string()))
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl TryFrom<String> for TxHash {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<TxHash> for String {
    fn from(value: TxHash) -> Self {
        value.to_string()
    }
}
