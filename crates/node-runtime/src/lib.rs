//! # Node Runtime Library
//!
//! Exposes the node container and configuration for testing.
//! The main entry point is the `consent-node` binary.

pub mod container;

pub use container::{load_config, ContainerError, NodeConfig, NodeContainer};
