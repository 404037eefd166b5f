//! Request-response transport: one HTTP POST per sync message.

use std::time::Duration;

use async_trait::async_trait;

use super::{SyncAdapter, SyncMessage};
use crate::{error::Result, Error};

/// Configuration for [`HttpAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpAdapterConfig {
    /// Sync endpoint
    pub endpoint: String,
    /// Whole-request timeout
    pub timeout: Duration,
    /// Sent as `Authorization: Bearer ...` when set
    pub bearer_token: Option<String>,
}

impl Default for HttpAdapterConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000/api/sync".to_string(),
            timeout: Duration::from_secs(30),
            bearer_token: None,
        }
    }
}

impl HttpAdapterConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

/// Sync adapter that POSTs each message as JSON and decodes the reply.
#[derive(Debug, Clone)]
pub struct HttpAdapter {
    config: HttpAdapterConfig,
    client: reqwest::Client,
}

impl HttpAdapter {
    pub fn new(config: HttpAdapterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::sync(format!("failed to build http client: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &HttpAdapterConfig {
        &self.config
    }
}

#[async_trait]
impl SyncAdapter for HttpAdapter {
    fn name(&self) -> &str {
        "http"
    }

    async fn synchronize(&self, message: SyncMessage) -> Result<SyncMessage> {
        let table = message.table.clone();
        let mut request = self.client.post(&self.config.endpoint).json(&message);
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(self.config.timeout.as_millis() as u64)
            } else {
                Error::sync(format!("request to {} failed: {}", self.config.endpoint, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(table = %table, status = %status, "Sync request rejected");
            return Err(Error::sync(format!("authority returned {}: {}", status, body)));
        }

        let reply: SyncMessage = response
            .json()
            .await
            .map_err(|e| Error::sync(format!("undecodable sync reply: {}", e)))?;

        if reply.table != table {
            return Err(Error::sync(format!(
                "reply for table '{}' does not match request for '{}'",
                reply.table, table
            )));
        }

        tracing::debug!(
            table = %table,
            sent = message.items.len(),
            received = reply.items.len(),
            "HTTP sync completed"
        );
        Ok(reply)
    }
}
