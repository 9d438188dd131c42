//! The chat connection seam.
//!
//! The IRC host implements [`ChatConnection`]; the relay, the supervisor and
//! the command handlers only ever talk to chat through it.

use async_trait::async_trait;
use tracing::info;

/// A message could not be delivered to one destination.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Not connected to chat")]
    NotConnected,

    #[error("Delivery to {target} failed: {reason}")]
    Failed { target: String, reason: String },
}

/// Sends lines to chat. Implementations must tolerate concurrent callers.
#[async_trait]
pub trait ChatConnection: Send + Sync {
    async fn say(&self, target: &str, text: &str) -> Result<(), DeliveryError>;
}

/// Writes every line to the log instead of a chat server.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogChat;

#[async_trait]
impl ChatConnection for LogChat {
    async fn say(&self, target: &str, text: &str) -> Result<(), DeliveryError> {
        info!(channel = %target, text = %text, "say");
        Ok(())
    }
}
