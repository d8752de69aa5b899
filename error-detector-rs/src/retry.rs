//! # Request Replay
//!
//! Delay schedules for retrying strategies and the HTTP collaborator that
//! re-sends a failed request.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{Error, Result};

/// Default timeout for a replayed request
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default ceiling for a single backoff pause
pub const DEFAULT_MAX_BACKOFF_DELAY_SECS: u64 = 300;

/// Delay before the 0-indexed `attempt` of an exponential backoff:
/// `base * factor^attempt`, never longer than `max_delay`.
pub fn backoff_delay(base: Duration, factor: f64, attempt: u32, max_delay: Duration) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = base.as_secs_f64() * factor.powi(exponent);
    if !secs.is_finite() || secs < 0.0 {
        return max_delay;
    }
    Duration::try_from_secs_f64(secs)
        .map(|delay| delay.min(max_delay))
        .unwrap_or(max_delay)
}

/// Re-sends a request body to an endpoint
#[async_trait]
pub trait RequestReplayer: Send + Sync {
    /// POSTs `body` to `url` and returns the response status code
    async fn post(&self, url: &str, body: &Value) -> Result<u16>;
}

/// `RequestReplayer` backed by a reqwest client
#[derive(Debug, Clone)]
pub struct HttpReplayer {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl HttpReplayer {
    /// Creates a replayer with the given per-request timeout. When an API key
    /// is set every request carries it as a bearer token.
    pub fn new(timeout: Duration, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Initialization(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, api_key })
    }
}

#[async_trait]
impl RequestReplayer for HttpReplayer {
    async fn post(&self, url: &str, body: &Value) -> Result<u16> {
        let mut request = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                debug!(url = %url, status, "Replayed request");
                Ok(status)
            }
            Err(e) => {
                let err = Error::from(e);
                warn!(url = %url, error = %err, transient = err.is_transient(), "Replay request failed");
                Err(err)
            }
        }
    }
}

/// Whether a status code counts as a successful replay
pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}
