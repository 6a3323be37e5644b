//! # Node Container
//!
//! Configuration loading and the container that wires the ledger-sync
//! components for the `consent-node` binary.

pub mod config;
pub mod node;

pub use config::{load_config, load_config_from, ConfigError, NodeConfig};
pub use node::{Collaborators, ContainerError, NodeContainer};
