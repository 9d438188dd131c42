//! Readiness gate between the chat host and the relay.
//!
//! The host marks the gate ready once it has joined its channels; anything
//! that must not speak before then awaits [`ReadinessGate::wait_ready`].

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Chat connection readiness. Only ever moves from `NotReady` to `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotReady,
    Ready,
}

/// A one-shot, cloneable readiness signal.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::NotReady);
        Self { tx: Arc::new(tx) }
    }

    /// Mark the chat connection ready. Idempotent.
    pub fn mark_ready(&self) {
        let changed = self.tx.send_if_modified(|state| {
            if *state == ConnectionState::Ready {
                false
            } else {
                *state = ConnectionState::Ready;
                true
            }
        });
        if changed {
            info!("Chat connection ready");
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Wait until the gate is ready. Returns immediately if it already is.
    pub async fn wait_ready(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|state| *state == ConnectionState::Ready).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn wait_blocks_until_marked() {
        let gate = ReadinessGate::new();
        assert_eq!(gate.state(), ConnectionState::NotReady);

        let waiter = gate.clone();
        let handle = tokio::spawn(async move { waiter.wait_ready().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        gate.mark_ready();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gate.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn ready_gate_does_not_block() {
        let gate = ReadinessGate::new();
        gate.mark_ready();
        gate.mark_ready();
        tokio::time::timeout(Duration::from_millis(50), gate.wait_ready())
            .await
            .unwrap();
    }
}
