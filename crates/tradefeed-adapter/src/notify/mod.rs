/*
[INPUT]:  Human-readable alert text from sessions
[OUTPUT]: Out-of-band alerts (logs, in-process channel, webhook)
[POS]:    Notification layer - fire-and-forget side channel
[UPDATE]: When adding alert sinks
*/

pub mod webhook;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{FeedError, Result};

pub use webhook::WebhookNotifier;

/// Accepts a text message for out-of-band alerting.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<()>;
}

/// Send an alert, logging instead of propagating any failure.
pub async fn notify_quietly(notifier: &dyn Notifier, text: &str) {
    if let Err(err) = notifier.notify(text).await {
        warn!(error = %err, "notification delivery failed");
    }
}

/// Writes alerts to the log
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        info!(message = %text, "notification");
        Ok(())
    }
}

/// Forwards alerts into an mpsc channel
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        self.tx
            .send(text.to_string())
            .map_err(|_| FeedError::Config("notification receiver dropped".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_notifier_delivers_text() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify("reconnected").await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("reconnected"));
    }

    #[tokio::test]
    async fn test_notify_quietly_swallows_errors() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        assert!(notifier.notify("lost").await.is_err());
        notify_quietly(&notifier, "lost").await;
    }
}
