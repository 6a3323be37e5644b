//! # Node Container
//!
//! Holds the wired consent-sync components and manages their lifecycle.
//!
//! ## Wiring
//!
//! ```text
//! NodeConnector ──connect──→ NodeSlot ←── ReadinessMonitor (swaps on ready)
//!                               │
//! ConfigStore ──────────→ LedgerGateway ──→ ConfirmationTracker ──→ ConsentContract
//!                               │                                         │
//!                   EventSubscriptionManager      PeerDataSource ──→ ConsentWorkflow
//!                               └──────────────── SyncRuntime ───────────┘
//! ```
//!
//! Every long wait (readiness probing, receipt polling) watches the
//! container's shutdown channel.

use std::sync::Arc;
use std::time::Duration;

use consent_sync::adapters::{
    FileConfigStore, HttpPeerDataSource, InMemoryConfigStore, InMemorySubjectStore,
    JsonRpcConnector, TracingAuditSink,
};
use consent_sync::ports::{ConfigStore, NodeConnector, PeerDataSource};
use consent_sync::{
    ConfirmationConfig, ConfirmationTracker, ConsentContract, ConsentWorkflow,
    EventSubscriptionManager, LedgerError, LedgerGateway, NodeSlot, ReadinessConfig,
    ReadinessMonitor, ShutdownSignal, StartOutcome, SubscriptionConfig, SyncRuntime,
};
use shared_types::Identity;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

use crate::container::config::{ConfigError, NodeConfig};

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Externally reachable collaborators, swappable in tests.
pub struct Collaborators {
    pub connector: Arc<dyn NodeConnector>,
    pub config_store: Arc<dyn ConfigStore>,
    pub peer: Arc<dyn PeerDataSource>,
    pub subjects: Arc<InMemorySubjectStore>,
}

impl Collaborators {
    /// JSON-RPC ledger node, HTTP controller endpoint, file or in-memory
    /// contract binding.
    pub fn from_config(config: &NodeConfig) -> Self {
        let connector = JsonRpcConnector::new(config.ledger.rpc_url.clone())
            .with_timeout(Duration::from_millis(config.ledger.request_timeout_ms))
            .with_filter_poll_interval(Duration::from_millis(config.ledger.filter_poll_ms));

        let config_store: Arc<dyn ConfigStore> = match &config.storage.config_store {
            Some(path) => Arc::new(FileConfigStore::new(path.clone())),
            None => Arc::new(InMemoryConfigStore::new()),
        };

        let peer = HttpPeerDataSource::new(
            &config.peer.controller_url,
            config.peer.bearer_token.clone(),
            Duration::from_millis(config.peer.timeout_ms),
        );

        Self {
            connector: Arc::new(connector),
            config_store,
            peer: Arc::new(peer),
            subjects: Arc::new(InMemorySubjectStore::new()),
        }
    }
}

/// Central container holding the wired ledger-sync components.
pub struct NodeContainer {
    pub config: NodeConfig,
    pub slot: Arc<NodeSlot>,
    pub gateway: Arc<LedgerGateway>,
    pub workflow: Arc<ConsentWorkflow>,
    pub subjects: Arc<InMemorySubjectStore>,
    runtime: SyncRuntime,
    shutdown_tx: watch::Sender<bool>,
}

impl NodeContainer {
    pub fn new(config: NodeConfig) -> Result<Self, ContainerError> {
        let collaborators = Collaborators::from_config(&config);
        Self::assemble(config, collaborators)
    }

    pub fn assemble(
        config: NodeConfig,
        collaborators: Collaborators,
    ) -> Result<Self, ContainerError> {
        config.validate()?;
        let role = config.role();
        let own = config.own_identity()?;
        let controller = config.controller_identity()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown = ShutdownSignal::new(shutdown_rx);

        let confirmation = ConfirmationConfig {
            poll_interval: config.confirmation.poll_interval(),
            max_attempts: config.confirmation.max_attempts,
        };

        let slot = Arc::new(NodeSlot::new(collaborators.connector.connect()?));
        let gateway = Arc::new(
            LedgerGateway::new(
                Arc::clone(&slot),
                collaborators.config_store,
                own.clone(),
                controller,
            )
            .with_deploy_confirmation(confirmation),
        );
        let tracker = ConfirmationTracker::new(Arc::clone(&gateway), confirmation)
            .with_shutdown(shutdown.clone());
        let contract = Arc::new(ConsentContract::new(Arc::clone(&gateway), tracker));

        let workflow = Arc::new(ConsentWorkflow::new(
            role,
            own,
            contract,
            collaborators.peer,
            collaborators.subjects.clone(),
        ));

        let readiness = Arc::new(ReadinessMonitor::new(
            collaborators.connector,
            Arc::clone(&slot),
            ReadinessConfig {
                probe_interval: Duration::from_millis(config.readiness.interval_ms),
            },
        ));
        let subscriptions = Arc::new(EventSubscriptionManager::new(
            Arc::clone(&gateway),
            SubscriptionConfig::default(),
        ));

        let mut runtime = SyncRuntime::new(role, readiness, subscriptions, Arc::clone(&workflow))
            .with_shutdown(shutdown);
        if config.audit.enabled {
            runtime = runtime.with_audit(Arc::new(TracingAuditSink));
        }

        info!(role = ?role, account = %gateway.account(), "[runtime] Node container assembled");

        Ok(Self {
            config,
            slot,
            gateway,
            workflow,
            subjects: collaborators.subjects,
            runtime,
            shutdown_tx,
        })
    }

    /// Gate on ledger readiness and arm the listeners (processor mode).
    pub async fn start(&self) -> Result<StartOutcome, ContainerError> {
        let outcome = self.runtime.start_all().await?;
        if let StartOutcome::Started {
            subscriptions,
            audit,
        } = &outcome
        {
            info!(
                listeners = subscriptions.len(),
                audit = audit.is_some(),
                "[runtime] Listeners armed"
            );
        }
        Ok(outcome)
    }

    /// Deploy the consent contract and persist its binding.
    pub async fn deploy(&self, abi_json: &str, bytecode: &[u8]) -> Result<Identity, ContainerError> {
        Ok(self.gateway.deploy(abi_json, bytecode).await?)
    }

    /// Signal every pending wait to stop and tear down the listeners.
    pub fn shutdown(&self) {
        info!("[runtime] Initiating shutdown");
        if let Err(e) = self.shutdown_tx.send(true) {
            error!("[runtime] Failed to send shutdown signal: {}", e);
        }
        self.runtime.subscriptions().unsubscribe_all();
    }

    pub fn runtime(&self) -> &SyncRuntime {
        &self.runtime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::config::load_config_from;
    use consent_sync::adapters::{MockConnector, MockLedgerNode, MockPeerDataSource};
    use consent_sync::{ContractConfig, CONTRACT_CONFIG_KEY};
    use shared_types::NodeRole;

    const ABI: &str = include_str!("../../../consent-sync/tests/fixtures/consent_registry.abi.json");
    const PROCESSOR: &str = "0x00000000000000000000000000000000000000a1";
    const CONTROLLER: &str = "0x00000000000000000000000000000000000000c0";

    fn config(controller_mode: bool, audit: bool) -> NodeConfig {
        let own = if controller_mode { CONTROLLER } else { PROCESSOR };
        let mode = controller_mode.to_string();
        let audit = audit.to_string();
        load_config_from(move |key| match key {
            "CC_CONTROLLER_MODE" => Some(mode.clone()),
            "CC_OWN_ADDRESS" => Some(own.to_string()),
            "CC_CONTROLLER_ADDRESS" => Some(CONTROLLER.to_string()),
            "CC_AUDIT_EVENTS" => Some(audit.clone()),
            "CC_READINESS_INTERVAL_MS" => Some("10".to_string()),
            _ => None,
        })
    }

    async fn collaborators(ledger: Arc<MockLedgerNode>, deployed: bool) -> Collaborators {
        let store = Arc::new(InMemoryConfigStore::new());
        if deployed {
            store
                .put_config(
                    CONTRACT_CONFIG_KEY,
                    ContractConfig {
                        address: "0x00000000000000000000000000000000000000ff".into(),
                        abi_json: ABI.into(),
                    },
                )
                .await
                .unwrap();
        }
        Collaborators {
            connector: Arc::new(MockConnector::new(ledger)),
            config_store: store,
            peer: Arc::new(MockPeerDataSource::new()),
            subjects: Arc::new(InMemorySubjectStore::new()),
        }
    }

    #[tokio::test]
    async fn test_assemble_rejects_missing_identity() {
        let ledger = Arc::new(MockLedgerNode::new());
        let result = NodeContainer::assemble(
            NodeConfig::default(),
            collaborators(ledger, true).await,
        );
        assert!(matches!(result, Err(ContainerError::Config(_))));
    }

    #[tokio::test]
    async fn test_controller_start_is_skipped() {
        let ledger = Arc::new(MockLedgerNode::new());
        let node = NodeContainer::assemble(
            config(true, false),
            collaborators(ledger.clone(), true).await,
        )
        .unwrap();

        assert_eq!(node.workflow.role(), NodeRole::Controller);
        assert_eq!(node.start().await.unwrap(), StartOutcome::Skipped);
        assert!(ledger.journal().is_empty());
    }

    #[tokio::test]
    async fn test_processor_start_arms_listeners_with_audit() {
        let ledger = Arc::new(MockLedgerNode::new());
        let node = NodeContainer::assemble(
            config(false, true),
            collaborators(ledger.clone(), true).await,
        )
        .unwrap();

        match node.start().await.unwrap() {
            StartOutcome::Started {
                subscriptions,
                audit,
            } => {
                assert_eq!(subscriptions.len(), 2);
                assert!(audit.is_some());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(node.runtime().subscriptions().active_subscriptions().len(), 3);

        node.shutdown();
        assert!(node.runtime().subscriptions().active_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_processor_start_without_contract_fails() {
        let ledger = Arc::new(MockLedgerNode::new());
        let node = NodeContainer::assemble(
            config(false, false),
            collaborators(ledger, false).await,
        )
        .unwrap();

        assert!(matches!(
            node.start().await,
            Err(ContainerError::Ledger(LedgerError::ContractNotDeployed { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_readiness_wait() {
        let ledger = Arc::new(MockLedgerNode::new());
        ledger.set_listening(false);
        let node = Arc::new(
            NodeContainer::assemble(config(false, false), collaborators(ledger, true).await)
                .unwrap(),
        );

        let starting = tokio::spawn({
            let node = Arc::clone(&node);
            async move { node.start().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        node.shutdown();

        assert!(matches!(
            starting.await.unwrap(),
            Err(ContainerError::Ledger(LedgerError::Cancelled))
        ));
    }
}
