//! Transaction Confirmation Tracker
//!
//! Polls for a receipt at a fixed interval with a bounded number of attempts.
//! The first poll is immediate. Transport errors during a poll count as an
//! unsuccessful attempt, the same as "not yet included".

use std::sync::Arc;
use std::time::Duration;

use shared_types::TxHash;
use tracing::{debug, info, warn};

use crate::domain::{
    render_tokens, PendingTransaction, Token, TransactionReceipt, TransactionStatus,
};
use crate::error::{CallSite, LedgerError, LedgerResult};
use crate::gateway::LedgerGateway;
use crate::ports::LedgerNode;
use crate::shutdown::ShutdownSignal;

/// Default delay between receipt polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of receipt polls before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationConfig {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Poll until `pending` resolves, updating its poll count and status.
async fn track(
    node: &dyn LedgerNode,
    pending: &mut PendingTransaction,
    config: &ConfirmationConfig,
    shutdown: &mut ShutdownSignal,
) -> LedgerResult<TransactionReceipt> {
    while pending.polls < config.max_attempts {
        if pending.polls > 0 {
            tokio::select! {
                _ = shutdown.triggered() => return Err(LedgerError::Cancelled),
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
        }
        pending.polls += 1;

        match node.transaction_receipt(pending.tx_hash).await {
            Ok(Some(receipt)) if receipt.success => {
                pending.resolve(TransactionStatus::Confirmed);
                return Ok(receipt);
            }
            Ok(Some(receipt)) => {
                pending.resolve(TransactionStatus::Failed);
                return Err(LedgerError::TransactionFailed {
                    tx_hash: receipt.tx_hash,
                    block_number: receipt.block_number,
                    call: CallSite::new(&pending.method, &pending.params),
                });
            }
            Ok(None) => {
                debug!(
                    tx_hash = %pending.tx_hash,
                    attempt = pending.polls,
                    "[confirm] Receipt not available yet"
                );
            }
            Err(e) => {
                debug!(
                    tx_hash = %pending.tx_hash,
                    attempt = pending.polls,
                    error = %e,
                    "[confirm] Receipt poll failed"
                );
            }
        }
    }

    pending.resolve(TransactionStatus::TimedOut);
    Err(LedgerError::TransactionTimeout {
        tx_hash: pending.tx_hash,
        attempts: pending.polls,
        call: CallSite::new(&pending.method, &pending.params),
    })
}

/// Await the receipt of `tx_hash` on a specific connection.
pub async fn poll_receipt(
    node: &dyn LedgerNode,
    tx_hash: TxHash,
    config: &ConfirmationConfig,
    shutdown: &mut ShutdownSignal,
) -> LedgerResult<TransactionReceipt> {
    let mut pending = PendingTransaction::submitted("", String::new(), tx_hash);
    track(node, &mut pending, config, shutdown).await
}

/// Turns fire-and-forget submissions into confirmed writes.
pub struct ConfirmationTracker {
    gateway: Arc<LedgerGateway>,
    config: ConfirmationConfig,
    shutdown: ShutdownSignal,
}

impl ConfirmationTracker {
    pub fn new(gateway: Arc<LedgerGateway>, config: ConfirmationConfig) -> Self {
        Self {
            gateway,
            config,
            shutdown: ShutdownSignal::never(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn config(&self) -> &ConfirmationConfig {
        &self.config
    }

    /// Poll the current connection until the transaction is included.
    pub async fn confirm(&self, tx_hash: TxHash) -> LedgerResult<TransactionReceipt> {
        let node = self.gateway.node();
        poll_receipt(node.as_ref(), tx_hash, &self.config, &mut self.shutdown.clone()).await
    }

    /// Submit a contract method and wait for its receipt.
    ///
    /// Failures carry the method name and rendered parameters.
    pub async fn run_method(
        &self,
        method: &str,
        params: Vec<Token>,
    ) -> LedgerResult<TransactionReceipt> {
        let rendered = render_tokens(&params);
        let tx_hash = self.gateway.submit(method, params).await?;
        let mut pending = PendingTransaction::submitted(method, rendered, tx_hash);

        let node = self.gateway.node();
        let result = track(
            node.as_ref(),
            &mut pending,
            &self.config,
            &mut self.shutdown.clone(),
        )
        .await;

        match &result {
            Ok(receipt) => info!(
                method,
                tx_hash = %tx_hash,
                block = receipt.block_number,
                polls = pending.polls,
                "[confirm] Transaction confirmed"
            ),
            Err(e) => warn!(
                method,
                params = %pending.params,
                status = ?pending.status,
                error = %e,
                "[confirm] Transaction did not confirm"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryConfigStore, MockLedgerNode, ReceiptPoll};
    use crate::gateway::{NodeSlot, CONTRACT_CONFIG_KEY};
    use crate::ports::{ConfigStore, ContractConfig};
    use shared_types::Identity;
    use tokio::sync::watch;

    const ABI: &str = include_str!("../tests/fixtures/consent_registry.abi.json");

    async fn tracker(node: Arc<MockLedgerNode>) -> ConfirmationTracker {
        let store = Arc::new(InMemoryConfigStore::new());
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
        let controller = Identity::parse("0x00000000000000000000000000000000000000c0").unwrap();
        let gateway = Arc::new(LedgerGateway::new(
            Arc::new(NodeSlot::new(node)),
            store,
            controller.clone(),
            controller,
        ));
        ConfirmationTracker::new(gateway, ConfirmationConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirms_after_two_empty_polls() {
        let node = Arc::new(MockLedgerNode::new());
        node.script_receipts([ReceiptPoll::NotYet, ReceiptPoll::NotYet, ReceiptPoll::Mined]);
        let tracker = tracker(Arc::clone(&node)).await;

        let receipt = tracker
            .run_method("recordErasureByController", vec![Token::string("abc")])
            .await
            .unwrap();

        assert!(receipt.success);
        assert_eq!(node.receipt_polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpc_errors_count_as_attempts() {
        let node = Arc::new(MockLedgerNode::new());
        node.script_receipts([ReceiptPoll::RpcError, ReceiptPoll::Mined]);
        let tracker = tracker(Arc::clone(&node)).await;

        tracker
            .run_method("recordAccessByController", vec![Token::string("abc")])
            .await
            .unwrap();
        assert_eq!(node.receipt_polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_max_attempts() {
        let node = Arc::new(MockLedgerNode::new());
        node.set_auto_mine(false);
        let tracker = tracker(Arc::clone(&node)).await;

        let err = tracker
            .run_method("recordErasureByController", vec![Token::string("abc")])
            .await
            .unwrap_err();

        match err {
            LedgerError::TransactionTimeout { attempts, call, .. } => {
                assert_eq!(attempts, DEFAULT_MAX_ATTEMPTS);
                assert_eq!(call.method, "recordErasureByController");
                assert_eq!(call.params, "[\"abc\"]");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(node.receipt_polls(), DEFAULT_MAX_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverted_receipt_is_failure() {
        let node = Arc::new(MockLedgerNode::new());
        node.script_receipts([ReceiptPoll::Reverted]);
        let tracker = tracker(Arc::clone(&node)).await;

        let err = tracker
            .run_method("setProcessors", vec![Token::Array(vec![])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::TransactionFailed { ref call, .. } if call.method == "setProcessors"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_polling() {
        let node = Arc::new(MockLedgerNode::new());
        node.set_auto_mine(false);
        let (tx, rx) = watch::channel(false);
        let tracker = tracker(Arc::clone(&node))
            .await
            .with_shutdown(ShutdownSignal::new(rx));

        let handle = tokio::spawn(async move {
            tracker
                .run_method("recordAccessByController", vec![Token::string("abc")])
                .await
        });
        tokio::time::sleep(Duration::from_millis(2500)).await;
        tx.send(true).unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(LedgerError::Cancelled)));
        assert!(node.receipt_polls() < DEFAULT_MAX_ATTEMPTS);
    }
}
