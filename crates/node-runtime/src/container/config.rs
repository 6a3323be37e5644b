//! # Node Configuration
//!
//! Runtime parameters for the consent node, with defaults overridable from
//! `CC_*` environment variables.
//!
//! ## Required settings
//!
//! - `CC_OWN_ADDRESS`: the account this node signs transactions from
//! - `CC_CONTROLLER_ADDRESS`: the controller organization's account

use std::path::PathBuf;
use std::time::Duration;

use shared_types::{Identity, NodeRole};
use thiserror::Error;
use tracing::{info, warn};

/// Complete node configuration.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    pub ledger: LedgerConfig,
    pub identity: IdentityConfig,
    pub peer: PeerConfig,
    pub storage: StorageConfig,
    pub confirmation: ConfirmationSettings,
    pub readiness: ReadinessSettings,
    pub audit: AuditConfig,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{variable} is not set")]
    Missing { variable: &'static str },

    #[error("{variable} is not a valid address: {reason}")]
    InvalidAddress {
        variable: &'static str,
        reason: String,
    },
}

impl NodeConfig {
    pub fn role(&self) -> NodeRole {
        NodeRole::from_controller_mode(self.identity.controller_mode)
    }

    /// Validate that both ledger identities are present and well-formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.own_identity()?;
        self.controller_identity()?;
        Ok(())
    }

    pub fn own_identity(&self) -> Result<Identity, ConfigError> {
        parse_identity("CC_OWN_ADDRESS", self.identity.own_address.as_deref())
    }

    /// In controller mode the controller is this node; an unset
    /// `CC_CONTROLLER_ADDRESS` falls back to `CC_OWN_ADDRESS`.
    pub fn controller_identity(&self) -> Result<Identity, ConfigError> {
        match (&self.identity.controller_address, self.identity.controller_mode) {
            (None, true) => self.own_identity(),
            (address, _) => parse_identity("CC_CONTROLLER_ADDRESS", address.as_deref()),
        }
    }
}

fn parse_identity(variable: &'static str, raw: Option<&str>) -> Result<Identity, ConfigError> {
    let raw = raw.ok_or(ConfigError::Missing { variable })?;
    let invalid = |reason: String| ConfigError::InvalidAddress { variable, reason };
    let identity = Identity::parse(raw).map_err(|e| invalid(e.to_string()))?;
    // Must decode to 20 bytes.
    identity.to_bytes().map_err(|e| invalid(e.to_string()))?;
    Ok(identity)
}

/// Ledger node connection.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint of the ledger node.
    pub rpc_url: String,
    pub request_timeout_ms: u64,
    /// How often live-log filters are polled.
    pub filter_poll_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            request_timeout_ms: 10_000,
            filter_poll_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdentityConfig {
    /// Run as the controller organization (no listeners).
    pub controller_mode: bool,
    pub own_address: Option<String>,
    pub controller_address: Option<String>,
}

/// Controller endpoint processors fetch subject data from.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub controller_url: String,
    pub bearer_token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            controller_url: "http://127.0.0.1:8080".to_string(),
            bearer_token: None,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// JSON file holding the contract binding. In-memory when unset.
    pub config_store: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ConfirmationSettings {
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for ConfirmationSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            max_attempts: 20,
        }
    }
}

impl ConfirmationSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone)]
pub struct ReadinessSettings {
    pub interval_ms: u64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self { interval_ms: 5_000 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditConfig {
    /// Arm the catch-all subscription feeding the audit trail.
    pub enabled: bool,
}

/// Load configuration from the process environment.
pub fn load_config() -> NodeConfig {
    load_config_from(|key| std::env::var(key).ok())
}

/// Load configuration through an arbitrary variable lookup.
pub fn load_config_from(lookup: impl Fn(&str) -> Option<String>) -> NodeConfig {
    let mut config = NodeConfig::default();

    if let Some(url) = lookup("CC_LEDGER_RPC_URL") {
        config.ledger.rpc_url = url;
    }
    if let Some(mode) = lookup("CC_CONTROLLER_MODE") {
        match parse_flag(&mode) {
            Some(flag) => config.identity.controller_mode = flag,
            None => warn!(value = %mode, "[config] CC_CONTROLLER_MODE is not a boolean, ignoring"),
        }
    }
    config.identity.own_address = lookup("CC_OWN_ADDRESS");
    config.identity.controller_address = lookup("CC_CONTROLLER_ADDRESS");

    if let Some(url) = lookup("CC_CONTROLLER_URL") {
        config.peer.controller_url = url;
    }
    config.peer.bearer_token = lookup("CC_PEER_TOKEN").filter(|t| !t.is_empty());
    config.storage.config_store = lookup("CC_CONFIG_STORE").map(PathBuf::from);

    if let Some(ms) = parse_number(&lookup, "CC_CONFIRM_POLL_MS") {
        config.confirmation.poll_interval_ms = ms;
    }
    if let Some(attempts) = parse_number(&lookup, "CC_CONFIRM_MAX_ATTEMPTS") {
        config.confirmation.max_attempts = attempts;
    }
    if let Some(ms) = parse_number(&lookup, "CC_READINESS_INTERVAL_MS") {
        config.readiness.interval_ms = ms;
    }
    if let Some(audit) = lookup("CC_AUDIT_EVENTS") {
        config.audit.enabled = parse_flag(&audit).unwrap_or(false);
    }

    info!(
        role = ?config.role(),
        rpc = %config.ledger.rpc_url,
        "[config] Configuration loaded"
    );
    config
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "[config] Not a number, keeping default");
            None
        }
    }
}
