//! Webhook notification sender.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header::HeaderMap};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Delivery, NotificationMessage, NotificationSender};
use crate::{Error, Result};

/// Webhook configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Target URL; delivery is disabled when empty.
    #[serde(default)]
    pub url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

fn default_timeout() -> u64 {
    30
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_timeout(),
            headers: Vec::new(),
        }
    }
}

/// Posts completion messages as JSON to a configured URL.
pub struct WebhookSender {
    config: WebhookConfig,
    client: Client,
    headers: HeaderMap,
}

impl WebhookSender {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("failed to build webhook client: {}", e)))?;
        let headers = build_headers(&config.headers)?;

        Ok(Self {
            config,
            client,
            headers,
        })
    }

    pub fn is_enabled(&self) -> bool {
        !self.config.url.is_empty()
    }
}

fn build_headers(pairs: &[(String, String)]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = name
            .parse::<reqwest::header::HeaderName>()
            .map_err(|e| Error::config(format!("invalid webhook header name '{}': {}", name, e)))?;
        let value = value
            .parse::<reqwest::header::HeaderValue>()
            .map_err(|e| Error::config(format!("invalid webhook header value for '{}': {}", name, e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(&self, message: &NotificationMessage) -> Result<Delivery> {
        if !self.is_enabled() {
            return Ok(Delivery::Disabled);
        }

        let response = self
            .client
            .post(&self.config.url)
            .headers(self.headers.clone())
            .json(message)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Webhook failed: {} - {}", status, body);
            return Err(Error::Notification(format!(
                "webhook failed: {} - {}",
                status, body
            )));
        }

        debug!(
            document_id = %message.document_id,
            "Webhook notification sent: {}", message.event_type
        );
        Ok(Delivery::Sent)
    }
}
