//! Best-effort delivery of formatted messages.

use std::sync::Arc;

use tracing::{debug, warn};

use ocfbot_core::OutboundMessage;

use crate::chat::ChatConnection;

/// Fans an [`OutboundMessage`] out to each of its destinations.
#[derive(Clone)]
pub struct OutputSink {
    chat: Arc<dyn ChatConnection>,
}

impl OutputSink {
    pub fn new(chat: Arc<dyn ChatConnection>) -> Self {
        Self { chat }
    }

    /// Say `message` in every destination, in order. A failed destination is
    /// logged and skipped. Returns the number of successful deliveries.
    pub async fn send(&self, message: &OutboundMessage) -> usize {
        let mut delivered = 0;
        for target in &message.destinations {
            match self.chat.say(target, &message.text).await {
                Ok(()) => {
                    debug!(channel = %target, "Delivered message");
                    delivered += 1;
                }
                Err(e) => warn!(channel = %target, error = %e, "Failed to deliver message"),
            }
        }
        delivered
    }

    /// Say one line in one channel, best effort.
    pub async fn say(&self, target: &str, text: &str) -> bool {
        self.send(&OutboundMessage::to_channel(target, text.to_string()))
            .await
            == 1
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::chat::DeliveryError;

    /// Records lines; rejects one channel.
    #[derive(Default)]
    struct FlakyChat {
        lines: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChatConnection for FlakyChat {
        async fn say(&self, target: &str, text: &str) -> Result<(), DeliveryError> {
            if target == "#broken" {
                return Err(DeliveryError::Failed {
                    target: target.to_string(),
                    reason: "cannot send to channel".to_string(),
                });
            }
            self.lines
                .lock()
                .unwrap()
                .push((target.to_string(), text.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_destination_does_not_stop_the_rest() {
        let chat = Arc::new(FlakyChat::default());
        let sink = OutputSink::new(chat.clone());
        let message = OutboundMessage {
            destinations: BTreeSet::from(["#a".to_string(), "#broken".to_string(), "#c".to_string()]),
            text: "hello".to_string(),
        };

        assert_eq!(sink.send(&message).await, 2);
        let lines = chat.lines.lock().unwrap();
        assert_eq!(
            *lines,
            vec![
                ("#a".to_string(), "hello".to_string()),
                ("#c".to_string(), "hello".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn say_reports_delivery() {
        let sink = OutputSink::new(Arc::new(FlakyChat::default()));
        assert!(sink.say("#rebuild", "x").await);
        assert!(!sink.say("#broken", "x").await);
    }
}
