use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Calculator usage event as delivered to the external data-collection endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub event_id: String,
    pub visitor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral_id: Option<String>,
    pub calculator: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    pub occurred_at_epoch_ms: i64,
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_backoff: Duration,
}

#[derive(Debug)]
pub enum CollectorError {
    Timeout,
    Http(reqwest::Error),
    BadStatus(reqwest::StatusCode),
}

impl std::fmt::Display for CollectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectorError::Timeout => write!(f, "collector request timed out"),
            CollectorError::Http(err) => write!(f, "collector HTTP error: {}", err),
            CollectorError::BadStatus(status) => write!(f, "collector returned status {}", status),
        }
    }
}

impl std::error::Error for CollectorError {}

impl From<reqwest::Error> for CollectorError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            CollectorError::Timeout
        } else {
            CollectorError::Http(value)
        }
    }
}

impl CollectorError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CollectorError::Timeout | CollectorError::Http(_) => true,
            CollectorError::BadStatus(status) => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
        }
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            CollectorError::Timeout => "timeout",
            CollectorError::Http(_) => "http_error",
            CollectorError::BadStatus(_) => "bad_status",
        }
    }
}

#[derive(Clone)]
pub struct UsageCollector {
    endpoint: String,
    http: reqwest::Client,
    retry_max_attempts: u32,
    retry_base_backoff: Duration,
}

impl UsageCollector {
    pub fn new(config: CollectorConfig) -> Result<Self, CollectorError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(CollectorError::Http)?;

        Ok(Self {
            endpoint: config.endpoint,
            http,
            retry_max_attempts: config.retry_max_attempts,
            retry_base_backoff: config.retry_base_backoff,
        })
    }

    /// Delivers one event, retrying transient failures with exponential backoff.
    pub async fn report(&self, event: &UsageEvent) -> Result<u32, CollectorError> {
        let mut attempt = 0u32;
        loop {
            match self.send_once(event).await {
                Ok(()) => return Ok(attempt + 1),
                Err(err) if err.is_retryable() && attempt < self.retry_max_attempts => {
                    let backoff = self
                        .retry_base_backoff
                        .saturating_mul(2u32.saturating_pow(attempt));
                    tracing::debug!(
                        event_id = %event.event_id,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "collector delivery failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once(&self, event: &UsageEvent) -> Result<(), CollectorError> {
        let resp = self.http.post(&self.endpoint).json(event).send().await?;
        if !resp.status().is_success() {
            return Err(CollectorError::BadStatus(resp.status()));
        }
        Ok(())
    }
}
