/*
[INPUT]:  Alert text and a webhook URL
[OUTPUT]: JSON POST `{"text": ...}` to the webhook
[POS]:    Notification layer - HTTP alert sink
[UPDATE]: When the webhook payload or client settings change
*/

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};

use super::Notifier;
use crate::error::{FeedError, Result};

const WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Posts alerts to an HTTP endpoint
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http_client: Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http_client,
            url: Url::parse(url)?,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        let body = serde_json::json!({ "text": text });
        let response = self
            .http_client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::transport(format!(
                "webhook responded with status {status}"
            )));
        }
        Ok(())
    }
}
