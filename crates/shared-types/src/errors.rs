//! # Error Types
//!
//! Errors raised while constructing or transitioning shared entities.

use thiserror::Error;

use crate::entities::DataState;

/// Errors produced while parsing an identity or hash.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The raw value was empty after trimming.
    #[error("Identity is empty")]
    Empty,

    /// The value is not a 20-byte hex address.
    #[error("Not a 20-byte hex address: {0}")]
    NotAnAddress(String),

    /// The value is not a 32-byte hex hash.
    #[error("Not a 32-byte hex hash: {0}")]
    InvalidHash(String),
}

/// Errors related to the per-(subject, processor) data state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataStateError {
    /// The ledger returned a discriminant outside the known range.
    #[error("Unknown data state discriminant: {0}")]
    UnknownDiscriminant(u64),

    /// The requested transition would move the state backwards or sideways.
    #[error("Non-monotonic data state transition: {from:?} -> {to:?}")]
    NonMonotonic { from: DataState, to: DataState },
}
