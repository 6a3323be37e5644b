//! # Shared Types Crate
//!
//! Domain entities shared between the ledger-sync library and the node runtime.
//!
//! ## Design Principles
//!
//! - **Canonical identities**: ledger addresses are normalized once, at the
//!   point of ingestion, so every later comparison is a plain equality check.
//! - **Pseudonymized subjects**: a subject is only ever referenced by the hash
//!   of its real identity.
//! - **Monotonic data state**: `NoData → Consented → Erased`, never backwards.

pub mod entities;
pub mod errors;

pub use entities::*;
pub use errors::*;
