//! Mode-gated startup of the processor-side listeners.

use std::sync::Arc;

use shared_types::NodeRole;
use tracing::info;

use crate::domain::{CONSENT_GIVEN_EVENT, CONTROLLER_ERASURE_EVENT};
use crate::error::LedgerResult;
use crate::ports::AuditSink;
use crate::readiness::ReadinessMonitor;
use crate::shutdown::ShutdownSignal;
use crate::subscription::{EventSubscriptionManager, SubscriptionId};
use crate::workflow::ConsentWorkflow;

/// Events a processor reacts to, in arming order.
pub const PROCESSOR_EVENTS: [&str; 2] = [CONSENT_GIVEN_EVENT, CONTROLLER_ERASURE_EVENT];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Controller mode: no readiness wait, no listeners.
    Skipped,
    Started {
        subscriptions: Vec<SubscriptionId>,
        audit: Option<SubscriptionId>,
    },
}

pub struct SyncRuntime {
    role: NodeRole,
    readiness: Arc<ReadinessMonitor>,
    subscriptions: Arc<EventSubscriptionManager>,
    workflow: Arc<ConsentWorkflow>,
    audit: Option<Arc<dyn AuditSink>>,
    shutdown: ShutdownSignal,
}

impl SyncRuntime {
    pub fn new(
        role: NodeRole,
        readiness: Arc<ReadinessMonitor>,
        subscriptions: Arc<EventSubscriptionManager>,
        workflow: Arc<ConsentWorkflow>,
    ) -> Self {
        Self {
            role,
            readiness,
            subscriptions,
            workflow,
            audit: None,
            shutdown: ShutdownSignal::never(),
        }
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn subscriptions(&self) -> &Arc<EventSubscriptionManager> {
        &self.subscriptions
    }

    /// Wait for the ledger node, then arm the listeners. Controller mode
    /// returns immediately.
    pub async fn start_all(&self) -> LedgerResult<StartOutcome> {
        if self.role.is_controller() {
            info!("[runtime] Controller mode, listeners not started");
            return Ok(StartOutcome::Skipped);
        }

        self.readiness
            .wait_until_ready(self.shutdown.clone())
            .await?;

        info!("[runtime] Starting listeners in processor mode");
        let mut subscriptions = Vec::with_capacity(PROCESSOR_EVENTS.len());
        for event in PROCESSOR_EVENTS {
            let handler = Arc::clone(&self.workflow);
            subscriptions.push(self.subscriptions.subscribe(event, handler).await?);
        }

        let audit = match &self.audit {
            Some(sink) => Some(self.subscriptions.subscribe_all(Arc::clone(sink)).await?),
            None => None,
        };

        Ok(StartOutcome::Started {
            subscriptions,
            audit,
        })
    }
}
