//! HTTP webhook publisher for processed-transaction events.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::instrument;

use crate::domain::{AppError, NotificationPublisher, PublishError};

/// Webhook publisher configuration
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Destination endpoint for event delivery
    pub endpoint: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl WebhookConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Serialize)]
struct WebhookEnvelope<'a> {
    topic: &'a str,
    key: &'a str,
    payload: &'a serde_json::Value,
}

/// Delivers events with a single HTTP POST per message. No retries here; the
/// dispatcher's at-most-once contract is the delivery guarantee.
pub struct WebhookPublisher {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookPublisher {
    pub fn new(config: WebhookConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Publish(PublishError::Transport(e.to_string())))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl NotificationPublisher for WebhookPublisher {
    #[instrument(skip(self, payload), fields(endpoint = %self.config.endpoint))]
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<(), AppError> {
        let envelope = WebhookEnvelope {
            topic,
            key,
            payload,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| AppError::Publish(PublishError::Transport(e.to_string())))?;

        if !response.status().is_success() {
            return Err(AppError::Publish(PublishError::Rejected(format!(
                "Webhook endpoint returned {}",
                response.status()
            ))));
        }

        Ok(())
    }
}
