//! Audit trail sinks.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::info;

use crate::domain::AuditEntry;
use crate::ports::AuditSink;

/// Writes each observed contract event as a structured log line.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) {
        info!(
            event = %entry.event_name,
            from = entry.from.as_ref().map(|f| f.as_str()).unwrap_or("unknown"),
            block = ?entry.block_number,
            tx_hash = ?entry.tx_hash.map(|h| h.to_string()),
            observed_at = %entry.observed_at.to_rfc3339(),
            params = %serde_json::Value::Object(entry.params),
            "[audit] Contract event"
        );
    }
}

/// Buffers entries for inspection.
pub struct RecordingAuditSink {
    sender: mpsc::UnboundedSender<AuditEntry>,
    receiver: Mutex<mpsc::UnboundedReceiver<AuditEntry>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Next recorded entry, in arrival order.
    pub async fn next(&self) -> Option<AuditEntry> {
        self.receiver.lock().await.recv().await
    }
}

impl Default for RecordingAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, entry: AuditEntry) {
        let _ = self.sender.send(entry);
    }
}
