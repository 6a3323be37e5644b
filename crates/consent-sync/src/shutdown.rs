//! Process shutdown signal shared by long-running waits.

use tokio::sync::watch;

/// Read side of the runtime's `watch::channel(false)` shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receiver: Option<watch::Receiver<bool>>,
}

impl ShutdownSignal {
    pub fn new(receiver: watch::Receiver<bool>) -> Self {
        Self {
            receiver: Some(receiver),
        }
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self { receiver: None }
    }

    pub fn is_triggered(&self) -> bool {
        self.receiver.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once shutdown has been requested.
    ///
    /// Never resolves if the sender is dropped without signalling.
    pub async fn triggered(&mut self) {
        let Some(rx) = self.receiver.as_mut() else {
            return std::future::pending().await;
        };
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_triggered_after_send() {
        let (tx, rx) = watch::channel(false);
        let mut signal = ShutdownSignal::new(rx);
        assert!(!signal.is_triggered());

        tx.send(true).unwrap();
        timeout(Duration::from_millis(100), signal.triggered())
            .await
            .expect("shutdown should be observed");
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_never_does_not_fire() {
        let mut signal = ShutdownSignal::never();
        assert!(timeout(Duration::from_millis(20), signal.triggered())
            .await
            .is_err());
    }
}
