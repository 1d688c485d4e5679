//! Timeout notification dispatch

use std::time::Duration;

use async_trait::async_trait;
use chrono::FixedOffset;

use super::model::Alert;

/// Maximum number of response-body characters written to the log
const MAX_LOGGED_BODY: usize = 500;

/// Sends the timeout notification for a trigger.
///
/// Implementations never fail: errors are logged and swallowed so a bad
/// endpoint cannot take down the timer or sweeper that called them.
/// Callers are responsible for making sure `dispatch` runs at most once
/// per alert.
#[async_trait]
pub trait TimeoutNotifier: Send + Sync {
    async fn dispatch(&self, alert: &Alert);
}

/// Settings for the outbound workflow endpoint
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Endpoint URL; dispatch is a logged no-op when unset
    pub url: Option<String>,
    /// Bearer token
    pub api_key: Option<String>,
    /// Sender identity included in the payload
    pub user_id: String,
    pub timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            user_id: "alert-system".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Posts timeout notifications to a workflow webhook
pub struct WebhookNotifier {
    client: reqwest::Client,
    config: WebhookConfig,
    tz: FixedOffset,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig, tz: FixedOffset) -> Result<Self, NotifierError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NotifierError::Client(e.to_string()))?;
        Ok(Self { client, config, tz })
    }

    /// Build the workflow request body for an alert
    pub fn payload(&self, alert: &Alert) -> serde_json::Value {
        let time = alert
            .occurred_at
            .with_timezone(&self.tz)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        serde_json::json!({
            "inputs": {
                "input": alert.payload_text,
                "entity_name": alert.entity_name,
                "time": time,
            },
            "response_mode": "blocking",
            "user": self.config.user_id,
        })
    }

    /// Send the notification, reporting any failure to the caller
    pub async fn send(&self, alert: &Alert) -> Result<(), NotifierError> {
        let url = self
            .config
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(NotifierError::NotConfigured)?;

        let mut request = self.client.post(url).json(&self.payload(alert));

        match self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => request = request.bearer_auth(key),
            None => tracing::warn!(
                alert_id = alert.id,
                "No API key configured, sending timeout notification without auth"
            ),
        }

        tracing::info!(alert_id = alert.id, url = %url, "Sending timeout notification");

        let response = request
            .send()
            .await
            .map_err(|e| NotifierError::Webhook(format!("Failed to send webhook: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(MAX_LOGGED_BODY).collect();

        if !status.is_success() {
            return Err(NotifierError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(
            alert_id = alert.id,
            status = status.as_u16(),
            response = %body,
            "Timeout notification delivered"
        );

        Ok(())
    }
}

#[async_trait]
impl TimeoutNotifier for WebhookNotifier {
    async fn dispatch(&self, alert: &Alert) {
        if let Err(e) = self.send(alert).await {
            tracing::error!(
                alert_id = alert.id,
                entity = %alert.entity_name,
                alert_key = %alert.alert_key,
                error = %e,
                "Timeout notification failed"
            );
        }
    }
}

/// Notifier errors
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Notification endpoint is not configured")]
    NotConfigured,

    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Webhook returned status {status}: {body}")]
    Status { status: u16, body: String },
}
