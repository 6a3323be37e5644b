//! Node Readiness Monitor
//!
//! Dials a fresh connection and probes it until the node answers that it is
//! listening, then installs that connection in the shared [`NodeSlot`].
//! There is no attempt limit; only the shutdown signal ends the wait early.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::gateway::NodeSlot;
use crate::ports::{LedgerNode, NodeConnector};
use crate::shutdown::ShutdownSignal;

/// Default delay between liveness probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessConfig {
    pub probe_interval: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

pub struct ReadinessMonitor {
    connector: Arc<dyn NodeConnector>,
    slot: Arc<NodeSlot>,
    config: ReadinessConfig,
}

impl ReadinessMonitor {
    pub fn new(
        connector: Arc<dyn NodeConnector>,
        slot: Arc<NodeSlot>,
        config: ReadinessConfig,
    ) -> Self {
        Self {
            connector,
            slot,
            config,
        }
    }

    /// Block until the node is reachable and the shared connection is replaced.
    pub async fn wait_until_ready(&self, mut shutdown: ShutdownSignal) -> LedgerResult<()> {
        let mut attempt: u64 = 0;
        loop {
            if shutdown.is_triggered() {
                return Err(LedgerError::Cancelled);
            }
            attempt += 1;

            match self.probe().await {
                Ok(node) => {
                    self.slot.replace(node);
                    info!(attempt, "[readiness] Ledger node is listening");
                    return Ok(());
                }
                Err(e) => warn!(
                    attempt,
                    error = %e,
                    retry_in_ms = self.config.probe_interval.as_millis() as u64,
                    "[readiness] Ledger node not ready"
                ),
            }

            tokio::select! {
                _ = shutdown.triggered() => return Err(LedgerError::Cancelled),
                _ = tokio::time::sleep(self.config.probe_interval) => {}
            }
        }
    }

    /// Run [`Self::wait_until_ready`] as a background task.
    pub fn spawn(self: Arc<Self>, shutdown: ShutdownSignal) -> JoinHandle<LedgerResult<()>> {
        tokio::spawn(async move { self.wait_until_ready(shutdown).await })
    }

    async fn probe(&self) -> LedgerResult<Arc<dyn LedgerNode>> {
        let node = self.connector.connect()?;
        if node.is_listening().await? {
            Ok(node)
        } else {
            Err(LedgerError::NodeUnreachable {
                reason: "node reports it is not listening".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockConnector, MockLedgerNode};
    use tokio::sync::watch;

    fn monitor(connector: Arc<MockConnector>, slot: Arc<NodeSlot>) -> Arc<ReadinessMonitor> {
        Arc::new(ReadinessMonitor::new(
            connector,
            slot,
            ReadinessConfig::default(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_until_listening_then_swaps() {
        let stale = Arc::new(MockLedgerNode::new());
        let fresh = Arc::new(MockLedgerNode::new());
        fresh.set_listening(false);
        let connector = Arc::new(MockConnector::new(fresh.clone()));
        let slot = Arc::new(NodeSlot::new(stale.clone()));

        let handle = monitor(connector.clone(), slot.clone()).spawn(ShutdownSignal::never());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(fresh.probe_count(), 3);
        assert!(!handle.is_finished());

        fresh.set_listening(true);
        handle.await.unwrap().unwrap();

        assert_eq!(fresh.probe_count(), 4);
        slot.current().is_listening().await.unwrap();
        assert_eq!(fresh.probe_count(), 5);
        assert_eq!(stale.probe_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dial_failures_are_retried() {
        let node = Arc::new(MockLedgerNode::new());
        let connector = Arc::new(MockConnector::new(node.clone()));
        connector.fail_next_connects(2);
        let slot = Arc::new(NodeSlot::new(Arc::new(MockLedgerNode::new())));

        monitor(connector.clone(), slot)
            .wait_until_ready(ShutdownSignal::never())
            .await
            .unwrap();

        assert_eq!(connector.connect_count(), 3);
        assert_eq!(node.probe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_wait() {
        let node = Arc::new(MockLedgerNode::new());
        node.set_listening(false);
        let slot = Arc::new(NodeSlot::new(Arc::new(MockLedgerNode::new())));
        let (tx, rx) = watch::channel(false);

        let handle = monitor(Arc::new(MockConnector::new(node)), slot)
            .spawn(ShutdownSignal::new(rx));
        tokio::time::sleep(Duration::from_secs(7)).await;
        tx.send(true).unwrap();

        assert!(matches!(handle.await.unwrap(), Err(LedgerError::Cancelled)));
    }
}
