//! Event Subscription Manager
//!
//! Opens live log subscriptions on the deployed contract and dispatches each
//! decoded event to its handler in a task of its own. A failing or panicking
//! handler never ends the subscription.
//!
//! Each subscription keeps a cursor on the last delivered log, starting at
//! the head block read before the first filter is installed. When the log
//! stream ends (node replaced, connection lost) a new live filter is opened
//! through the current connection and the logs missed since the cursor are
//! backfilled with `eth_getLogs` before live delivery resumes. Logs at or
//! behind the cursor are skipped, so delivery is at-least-once.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use shared_types::TxHash;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{AuditEntry, BlockTag, LedgerEvent, RawLog};
use crate::error::{LedgerResult, WorkflowResult};
use crate::gateway::{ContractHandle, LedgerGateway};
use crate::ports::{AuditSink, LogStream};

/// Default pause before re-subscribing after a stream ended.
pub const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Receives decoded events of one subscription.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: LedgerEvent) -> WorkflowResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionConfig {
    pub resubscribe_delay: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            resubscribe_delay: DEFAULT_RESUBSCRIBE_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a subscription delivers.
#[derive(Clone)]
enum Target {
    Handler(Arc<dyn EventHandler>),
    Audit(Arc<dyn AuditSink>),
}

/// Ledger position of a delivered log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Cursor {
    block: u64,
    log_index: u64,
}

impl Cursor {
    /// Past every log already in `block`.
    fn head(block: u64) -> Self {
        Self {
            block,
            log_index: u64::MAX,
        }
    }

    fn of(log: &RawLog) -> Option<Self> {
        log.block_number.map(|block| Self {
            block,
            log_index: log.log_index.unwrap_or(0),
        })
    }
}

struct ActiveSubscription {
    /// `None` for the catch-all subscription.
    event: Option<String>,
    task: JoinHandle<()>,
}

pub struct EventSubscriptionManager {
    gateway: Arc<LedgerGateway>,
    config: SubscriptionConfig,
    active: Mutex<HashMap<SubscriptionId, ActiveSubscription>>,
}

impl EventSubscriptionManager {
    pub fn new(gateway: Arc<LedgerGateway>, config: SubscriptionConfig) -> Self {
        Self {
            gateway,
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe `handler` to every future occurrence of `event_type`.
    ///
    /// The first subscription is opened before returning, so a missing
    /// contract or event surfaces here.
    pub async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> LedgerResult<SubscriptionId> {
        self.start(Some(event_type.to_string()), Target::Handler(handler))
            .await
    }

    /// Catch-all subscription feeding the audit trail.
    pub async fn subscribe_all(&self, sink: Arc<dyn AuditSink>) -> LedgerResult<SubscriptionId> {
        self.start(None, Target::Audit(sink)).await
    }

    /// Event names of the running subscriptions (`"*"` for the catch-all).
    pub fn active_subscriptions(&self) -> Vec<(SubscriptionId, String)> {
        self.active
            .lock()
            .iter()
            .filter(|(_, sub)| !sub.task.is_finished())
            .map(|(id, sub)| (*id, sub.event.clone().unwrap_or_else(|| "*".to_string())))
            .collect()
    }

    pub fn unsubscribe_all(&self) {
        let drained: Vec<_> = self.active.lock().drain().collect();
        for (id, sub) in drained {
            sub.task.abort();
            debug!(subscription = %id, "[subscriptions] Subscription stopped");
        }
    }

    async fn start(&self, event: Option<String>, target: Target) -> LedgerResult<SubscriptionId> {
        let contract = self.gateway.resolve_contract().await?;
        let head = contract.node().block_number().await?;
        let stream = live_stream(&contract, event.as_deref()).await?;
        let id = SubscriptionId::new();
        info!(
            subscription = %id,
            event = event.as_deref().unwrap_or("*"),
            contract = %contract.address,
            from_block = head,
            "[subscriptions] Subscribed"
        );

        let delivery = Delivery {
            gateway: Arc::clone(&self.gateway),
            label: event.clone().unwrap_or_else(|| "*".to_string()),
            target,
            cursor: Cursor::head(head),
        };
        let task = tokio::spawn(run(
            delivery,
            event.clone(),
            self.config,
            contract,
            stream,
        ));
        self.active
            .lock()
            .insert(id, ActiveSubscription { event, task });
        Ok(id)
    }
}

impl Drop for EventSubscriptionManager {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

async fn live_stream(contract: &ContractHandle, event: Option<&str>) -> LedgerResult<LogStream> {
    let filter = contract.log_filter(event, BlockTag::Latest)?;
    contract.node().subscribe_logs(filter).await
}

/// Open a new live filter, then fetch what was emitted since `cursor`.
async fn reopen(
    gateway: &LedgerGateway,
    event: Option<&str>,
    cursor: Cursor,
) -> LedgerResult<(ContractHandle, LogStream, Vec<RawLog>)> {
    let contract = gateway.resolve_contract().await?;
    let stream = live_stream(&contract, event).await?;
    let missed = contract
        .node()
        .past_logs(contract.log_filter(event, BlockTag::Number(cursor.block))?)
        .await?;
    Ok((contract, stream, missed))
}

async fn run(
    mut delivery: Delivery,
    event: Option<String>,
    config: SubscriptionConfig,
    mut contract: ContractHandle,
    mut stream: LogStream,
) {
    let mut backlog = Vec::new();
    loop {
        for log in backlog.drain(..) {
            delivery.accept(&contract, log);
        }
        while let Some(log) = stream.recv().await {
            delivery.accept(&contract, log);
        }

        warn!(event = %delivery.label, "[subscriptions] Log stream ended, resubscribing");
        loop {
            tokio::time::sleep(config.resubscribe_delay).await;
            match reopen(&delivery.gateway, event.as_deref(), delivery.cursor).await {
                Ok((next_contract, next_stream, missed)) => {
                    contract = next_contract;
                    stream = next_stream;
                    backlog = missed;
                    info!(
                        event = %delivery.label,
                        from_block = delivery.cursor.block,
                        backfilled = backlog.len(),
                        "[subscriptions] Resubscribed"
                    );
                    break;
                }
                Err(e) => warn!(
                    event = %delivery.label,
                    error = %e,
                    "[subscriptions] Resubscription failed"
                ),
            }
        }
    }
}

/// Decodes and dispatches the logs of one subscription in ledger order.
struct Delivery {
    gateway: Arc<LedgerGateway>,
    label: String,
    target: Target,
    cursor: Cursor,
}

impl Delivery {
    fn accept(&mut self, contract: &ContractHandle, log: RawLog) {
        if let Some(position) = Cursor::of(&log) {
            if position <= self.cursor {
                debug!(
                    event = %self.label,
                    block = position.block,
                    tx_hash = ?log.tx_hash,
                    "[subscriptions] Skipping delivered log"
                );
                return;
            }
            self.cursor = position;
        }

        match LedgerEvent::decode(&contract.abi, &log) {
            Ok(decoded) => dispatch(&self.gateway, &self.target, decoded),
            Err(e) => warn!(
                event = %self.label,
                tx_hash = ?log.tx_hash,
                error = %e,
                "[subscriptions] Skipping undecodable log"
            ),
        }
    }
}

fn dispatch(gateway: &Arc<LedgerGateway>, target: &Target, event: LedgerEvent) {
    let event_type = event.event_type.clone();
    let tx_hash = event.tx_hash;
    match target {
        Target::Handler(handler) => {
            let handler = Arc::clone(handler);
            supervise(event_type, tx_hash, async move { handler.handle(event).await });
        }
        Target::Audit(sink) => {
            let sink = Arc::clone(sink);
            let gateway = Arc::clone(gateway);
            let observed_at = Utc::now();
            supervise(event_type, tx_hash, async move {
                let from = match event.tx_hash {
                    Some(hash) => match gateway.node().transaction_sender(hash).await {
                        Ok(sender) => sender,
                        Err(e) => {
                            warn!(tx_hash = %hash, error = %e, "[subscriptions] Sender lookup failed");
                            None
                        }
                    },
                    None => None,
                };
                sink.record(AuditEntry {
                    event_name: event.event_type,
                    params: event.params,
                    from,
                    observed_at,
                    tx_hash: event.tx_hash,
                    block_number: event.block_number,
                })
                .await;
                Ok(())
            });
        }
    }
}

/// Run `work` in its own task and report how it ended.
fn supervise<F>(event_type: String, tx_hash: Option<TxHash>, work: F)
where
    F: Future<Output = WorkflowResult<()>> + Send + 'static,
{
    let task = tokio::spawn(work);
    tokio::spawn(async move {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                event = %event_type,
                tx_hash = ?tx_hash,
                error = %e,
                "[subscriptions] Event handler failed"
            ),
            Err(e) if e.is_panic() => error!(
                event = %event_type,
                tx_hash = ?tx_hash,
                "[subscriptions] Event handler panicked"
            ),
            Err(_) => debug!(event = %event_type, "[subscriptions] Event handler cancelled"),
        }
    });
}
