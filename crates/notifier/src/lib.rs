use std::time::Duration;

use async_trait::async_trait;
use lifecycle::{
    DispatchError, DispatchReport, NotificationDispatcher, RecipientOutcome, RecipientResult,
    ResponsePayload,
};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: Option<Url>,
    pub bearer_token: Option<String>,
    /// Pause between two recipients of the same batch.
    pub recipient_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            bearer_token: None,
            recipient_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    phone: &'a str,
    message: &'a str,
    protocol: &'a str,
    status: &'a str,
    citizen_name: &'a str,
    resolution_description: &'a str,
}

/// Posts one JSON message per recipient to the messaging webhook.
pub struct WebhookDispatcher {
    client: Client,
    config: WebhookConfig,
}

impl WebhookDispatcher {
    pub fn new(config: WebhookConfig) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| DispatchError::Transport(err.to_string()))?;
        Ok(Self { client, config })
    }

    async fn post_one(&self, url: &Url, recipient: &str, payload: &ResponsePayload) -> RecipientOutcome {
        let body = WebhookMessage {
            phone: recipient,
            message: &payload.message,
            protocol: &payload.protocol,
            status: payload.status.label(),
            citizen_name: &payload.citizen_name,
            resolution_description: &payload.resolution_description,
        };

        let mut request = self.client.post(url.clone()).json(&body);
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => RecipientOutcome::Delivered,
            Ok(response) => RecipientOutcome::Failed(format!("HTTP {}", response.status().as_u16())),
            Err(err) => RecipientOutcome::Failed(err.to_string()),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn send(
        &self,
        recipients: &[String],
        payload: &ResponsePayload,
    ) -> Result<DispatchReport, DispatchError> {
        let url = self.config.url.as_ref().ok_or(DispatchError::NotConfigured)?;

        let mut results = Vec::with_capacity(recipients.len());
        for (index, recipient) in recipients.iter().enumerate() {
            if index > 0 && !self.config.recipient_delay.is_zero() {
                tokio::time::sleep(self.config.recipient_delay).await;
            }
            let outcome = self.post_one(url, recipient, payload).await;
            match &outcome {
                RecipientOutcome::Delivered => {
                    debug!(complaint_id = %payload.complaint_id, %recipient, "webhook accepted message")
                }
                RecipientOutcome::Failed(reason) => {
                    warn!(complaint_id = %payload.complaint_id, %recipient, %reason, "webhook rejected message")
                }
            }
            results.push(RecipientResult {
                recipient: recipient.clone(),
                outcome,
            });
        }

        Ok(DispatchReport::new(results))
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
