//! HTTP broadcast executor
//!
//! POSTs the broadcast request as JSON to a content service and parses
//! `{successCount, failedCount, topic}` from the response.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{BroadcastExecutor, BroadcastRequest, ExecutionReport, ExecutorError};

/// Executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Content service endpoint; `None` disables execution
    pub url: Option<String>,

    /// Optional bearer token
    pub auth_token: Option<String>,

    /// Execution timeout in seconds (applies after the gate, not to locks)
    pub timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            url: None,
            auth_token: None,
            timeout_secs: 600,
        }
    }
}

impl ExecutorConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if let Some(url) = &self.url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Executor URL must start with http:// or https://".to_string());
            }
        }

        if self.timeout_secs == 0 {
            return Err("Executor timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Executor that delegates to a remote content service
pub struct HttpBroadcastExecutor {
    url: String,
    auth_token: Option<String>,
    client: Client,
}

impl HttpBroadcastExecutor {
    /// Create a new executor; requires `config.url`
    pub fn new(config: &ExecutorConfig) -> Result<Self, ExecutorError> {
        config.validate().map_err(ExecutorError::InvalidConfig)?;
        let url = config.url.clone().ok_or(ExecutorError::NotConfigured)?;

        let client = Client::builder()
            .timeout(config.timeout())
            .gzip(true)
            .build()?;

        Ok(Self {
            url,
            auth_token: config.auth_token.clone(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl BroadcastExecutor for HttpBroadcastExecutor {
    async fn execute(&self, request: &BroadcastRequest) -> Result<ExecutionReport, ExecutorError> {
        let mut http = self.client.post(&self.url).json(request);
        if let Some(token) = &self.auth_token {
            http = http.bearer_auth(token);
        }

        let response = http.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(ExecutorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let report: ExecutionReport = response
            .json()
            .await
            .map_err(|e| ExecutorError::InvalidResponse(e.to_string()))?;

        tracing::info!(
            broadcast_type = %request.broadcast_type,
            date = %request.date,
            success_count = report.success_count,
            failed_count = report.failed_count,
            "Executor reported delivery"
        );

        Ok(report)
    }

    fn name(&self) -> &str {
        "http"
    }
}
