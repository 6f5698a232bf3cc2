//! Notification sinks.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::Result;

/// Accepts a destination token and message text.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn sink_type(&self) -> &'static str;

    async fn send(&self, target: &str, message: &str) -> Result<()>;
}

/// Sink that only writes messages to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn sink_type(&self) -> &'static str {
        "log"
    }

    async fn send(&self, target: &str, message: &str) -> Result<()> {
        info!(target_token = %target, "{}", message);
        Ok(())
    }
}

/// Webhook sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Webhook URL.
    pub url: String,
    /// Extra headers sent with each request.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Optional bearer token.
    #[serde(default)]
    pub bearer_token: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            headers: Vec::new(),
            bearer_token: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Posts `{target, message, timestamp}` as JSON to a URL.
pub struct WebhookSink {
    config: WebhookConfig,
    client: Client,
}

impl WebhookSink {
    pub fn new(config: WebhookConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self { config, client }
    }

    fn build_payload(target: &str, message: &str) -> serde_json::Value {
        json!({
            "target": target,
            "message": message,
            "timestamp": Utc::now().to_rfc3339(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn sink_type(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, target: &str, message: &str) -> Result<()> {
        let mut request = self
            .client
            .post(&self.config.url)
            .json(&Self::build_payload(target, message));

        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| crate::Error::Notification(format!("webhook request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Webhook failed: {} - {}", status, body);
            return Err(crate::Error::Notification(format!(
                "webhook returned {status}"
            )));
        }

        debug!(target_token = %target, "Webhook notification sent");
        Ok(())
    }
}
