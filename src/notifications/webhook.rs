//! Webhook notification channel
//!
//! Sends coordination events as JSON via HTTP POST, retrying server errors
//! with exponential backoff. Outbound requests are paced with a governor
//! quota so a burst of events cannot flood the receiver.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{CoordinationEvent, Notifier, NotifyError, NotifyResult};

/// Webhook channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Webhook URL endpoint
    pub url: String,
    /// Optional authentication token (sent as Bearer token)
    pub auth_token: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Maximum retry attempts on failure
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    /// Maximum notifications per minute
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,
}

fn default_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    3
}

fn default_per_minute() -> u32 {
    30
}

impl WebhookConfig {
    /// Create a new webhook configuration
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            timeout_secs: default_timeout(),
            max_retries: default_retries(),
            per_minute: default_per_minute(),
        }
    }

    /// Set authentication token
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set max retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Webhook URL cannot be empty".to_string());
        }

        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err("Webhook URL must start with http:// or https://".to_string());
        }

        if self.timeout_secs == 0 {
            return Err("Timeout must be greater than 0".to_string());
        }

        if self.per_minute == 0 {
            return Err("per_minute must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Webhook notifier
///
/// # Payload Format
///
/// ```json
/// {
///   "id": "2b1f...-uuid",
///   "event": "broadcast_completed",
///   "summary": "Broadcast wisdom@2025-09-26/daily completed: 120 sent, 3 failed",
///   "detail": { "event": "broadcast_completed", "slot": { ... }, "report": { ... } },
///   "sent_at": "2025-09-26T05:00:03Z"
/// }
/// ```
pub struct WebhookNotifier {
    config: WebhookConfig,
    client: Client,
    pacer: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl WebhookNotifier {
    /// Create a new webhook notifier
    pub fn new(config: WebhookConfig) -> NotifyResult<Self> {
        config.validate().map_err(NotifyError::InvalidConfig)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let per_minute = NonZeroU32::new(config.per_minute)
            .ok_or_else(|| NotifyError::InvalidConfig("per_minute must be positive".into()))?;
        let pacer = RateLimiter::direct(Quota::per_minute(per_minute));

        Ok(Self {
            config,
            client,
            pacer,
        })
    }

    /// Create a webhook notifier with just a URL
    pub fn from_url(url: impl Into<String>) -> NotifyResult<Self> {
        Self::new(WebhookConfig::new(url))
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn build_payload(&self, event: &CoordinationEvent) -> serde_json::Value {
        serde_json::json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "event": event.kind(),
            "summary": event.summary(),
            "detail": event,
            "sent_at": chrono::Utc::now().to_rfc3339(),
        })
    }

    async fn send_with_retry(&self, payload: &serde_json::Value) -> NotifyResult<()> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s...
                let delay = Duration::from_secs(2_u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
                tracing::debug!(
                    "Retrying webhook notification (attempt {}/{})",
                    attempt + 1,
                    self.config.max_retries + 1
                );
            }

            self.pacer.until_ready().await;

            let mut request = self.client.post(&self.config.url);
            if let Some(token) = &self.config.auth_token {
                request = request.bearer_auth(token);
            }

            match request.json(payload).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(url = %self.config.url, status = %response.status(), "Webhook delivered");
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unable to read response body".to_string());
                    last_error = Some(NotifyError::Rejected {
                        status: status.as_u16(),
                        body,
                    });

                    // Don't retry on client errors (4xx)
                    if status.is_client_error() {
                        break;
                    }
                }
                Err(e) => {
                    last_error = Some(NotifyError::Http(e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| NotifyError::Other("Unknown error".to_string())))
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &CoordinationEvent) -> NotifyResult<()> {
        let payload = self.build_payload(event);
        self.send_with_retry(&payload).await
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(WebhookConfig::new("https://hooks.example.com/x").validate().is_ok());
        assert!(WebhookConfig::new("").validate().is_err());
        assert!(WebhookConfig::new("hooks.example.com").validate().is_err());

        let mut config = WebhookConfig::new("https://hooks.example.com/x");
        config.per_minute = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let config: WebhookConfig =
            serde_json::from_str(r#"{"url": "https://hooks.example.com/x", "auth_token": null}"#)
                .unwrap();
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.per_minute, 30);
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(matches!(
            WebhookNotifier::from_url("not-a-url"),
            Err(NotifyError::InvalidConfig(_))
        ));
    }
}
