//! # Tracked Error Events
//!
//! The record created for every failure reported through `track_error`, and
//! the key used to group occurrences of the same failure.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A single failure reported by the API client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Unique identifier of this occurrence
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// When the failure was reported
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// HTTP status code or error string, normalized to a string
    pub error_code: String,
    /// Human-readable error message
    pub error_message: String,
    /// Endpoint that was called
    pub endpoint: String,
    /// Request body of the failed call, needed to replay it
    #[serde(default)]
    pub request_data: Option<serde_json::Value>,
    /// Response body of the failed call
    #[serde(default)]
    pub response_data: Option<serde_json::Value>,
}

impl ErrorEvent {
    /// Creates an event stamped with the current time
    pub fn new(
        error_code: impl ToString,
        error_message: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::at(Utc::now(), error_code, error_message, endpoint)
    }

    /// Creates an event with an explicit timestamp
    pub fn at(
        timestamp: DateTime<Utc>,
        error_code: impl ToString,
        error_message: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            error_code: error_code.to_string(),
            error_message: error_message.into(),
            endpoint: endpoint.into(),
            request_data: None,
            response_data: None,
        }
    }

    /// Attaches the request body
    pub fn with_request(mut self, request_data: serde_json::Value) -> Self {
        self.request_data = Some(request_data);
        self
    }

    /// Attaches the response body
    pub fn with_response(mut self, response_data: serde_json::Value) -> Self {
        self.response_data = Some(response_data);
        self
    }

    /// The pattern this occurrence belongs to
    pub fn pattern_key(&self) -> PatternKey {
        PatternKey::new(&self.endpoint, &self.error_code)
    }
}

/// Groups occurrences of the same error code on the same endpoint.
///
/// Kept as a pair rather than a joined string so that endpoints containing
/// `:` (every absolute URL) round-trip without ambiguity. `Display` renders
/// the joined `endpoint:error_code` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatternKey {
    pub endpoint: String,
    pub error_code: String,
}

impl PatternKey {
    pub fn new(endpoint: impl Into<String>, error_code: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            error_code: error_code.into(),
        }
    }
}

impl fmt::Display for PatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.endpoint, self.error_code)
    }
}

/// Accepts RFC 3339 timestamps and naive ISO-8601 timestamps (read as UTC),
/// the latter being what older log files contain.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid timestamp '{}': {}", raw, e))
}
