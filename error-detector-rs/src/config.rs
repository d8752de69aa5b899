//! # Detector Configuration
//!
//! `DetectorConfig` is loaded in layers: built-in defaults, an optional file
//! (JSON, TOML or YAML) and `ERROR_DETECTOR_*` environment variables. The
//! portable subset can be exported to and imported from a JSON document
//! shared with other deployments of the detector.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

use crate::circuit_breaker::{CircuitBreakerConfig, DEFAULT_RESET_TIMEOUT_SECS, DEFAULT_THRESHOLD};
use crate::ledger::DEFAULT_CAPACITY;
use crate::retry::{DEFAULT_MAX_BACKOFF_DELAY_SECS, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::alerts::DEFAULT_WEBHOOK_TIMEOUT_SECS;
use crate::strategy::{StrategyRecord, DEFAULT_MAX_RETRIES};
use crate::types::{Error, Result};

/// Prefix of environment variables that override configuration
pub const ENV_PREFIX: &str = "ERROR_DETECTOR";

/// Default durable log file
pub const DEFAULT_LOG_FILE: &str = "error_log.jsonl";

/// Full runtime configuration of the detector
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Name used in alert payloads and email subjects
    pub service_name: String,
    /// Bearer token for replayed requests; never serialized
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Durable log location; `None` keeps history in memory only
    pub log_file: Option<PathBuf>,
    pub alert_email: Option<String>,
    pub alert_webhook: Option<String>,
    pub max_errors_to_track: usize,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_reset_timeout_secs: u64,
    /// Retry count for strategy records that leave it out
    pub max_retries: u32,
    /// Base of the exponential backoff, in seconds
    pub retry_base_delay_secs: f64,
    /// Pause before each plain retry, in seconds
    pub retry_delay_secs: f64,
    /// Ceiling for a single backoff pause, in seconds
    pub max_backoff_delay_secs: u64,
    pub tick_interval_secs: u64,
    /// How long `stop` waits for the scheduler before aborting it
    pub stop_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub webhook_timeout_secs: u64,
    /// UTC hour at which the daily report is sent
    pub daily_report_hour: u32,
    /// Minimum time between two recurring-pattern alerts for the same key.
    /// Unset means every qualifying scan alerts.
    pub recurring_alert_cooldown_secs: Option<u64>,
    /// Listen address of the Prometheus scrape endpoint
    pub metrics_addr: Option<SocketAddr>,
    pub recovery_strategies: BTreeMap<String, StrategyRecord>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            service_name: "error-detector".to_string(),
            api_key: None,
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            alert_email: None,
            alert_webhook: None,
            max_errors_to_track: DEFAULT_CAPACITY,
            circuit_breaker_threshold: DEFAULT_THRESHOLD,
            circuit_breaker_reset_timeout_secs: DEFAULT_RESET_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_secs: 1.0,
            retry_delay_secs: 1.0,
            max_backoff_delay_secs: DEFAULT_MAX_BACKOFF_DELAY_SECS,
            tick_interval_secs: 60,
            stop_timeout_secs: 60,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            webhook_timeout_secs: DEFAULT_WEBHOOK_TIMEOUT_SECS,
            daily_report_hour: 0,
            recurring_alert_cooldown_secs: None,
            metrics_addr: None,
            recovery_strategies: BTreeMap::new(),
        }
    }
}

impl fmt::Debug for DetectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectorConfig")
            .field("service_name", &self.service_name)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("log_file", &self.log_file)
            .field("alert_email", &self.alert_email)
            .field("alert_webhook", &self.alert_webhook)
            .field("max_errors_to_track", &self.max_errors_to_track)
            .field("circuit_breaker_threshold", &self.circuit_breaker_threshold)
            .field("circuit_breaker_reset_timeout_secs", &self.circuit_breaker_reset_timeout_secs)
            .field("tick_interval_secs", &self.tick_interval_secs)
            .field("recovery_strategies", &self.recovery_strategies.len())
            .finish_non_exhaustive()
    }
}

impl DetectorConfig {
    /// Loads defaults, then `path` if given, then `ERROR_DETECTOR_*`
    /// environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: DetectorConfig = settings.try_deserialize()?;
        config.validate()?;

        info!(
            service = %config.service_name,
            strategies = config.recovery_strategies.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Rejects values the detector cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.circuit_breaker_threshold == 0 {
            return Err(Error::configuration("circuit_breaker_threshold must be at least 1"));
        }
        if self.tick_interval_secs == 0 {
            return Err(Error::configuration("tick_interval_secs must be at least 1"));
        }
        if self.daily_report_hour > 23 {
            return Err(Error::configuration(format!(
                "daily_report_hour must be between 0 and 23, got {}",
                self.daily_report_hour
            )));
        }
        for (name, secs) in [
            ("retry_base_delay_secs", self.retry_base_delay_secs),
            ("retry_delay_secs", self.retry_delay_secs),
        ] {
            if Duration::try_from_secs_f64(secs).is_err() {
                return Err(Error::configuration(format!("{} must be a non-negative number of seconds", name)));
            }
        }
        Ok(())
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            threshold: self.circuit_breaker_threshold,
            reset_timeout: Duration::from_secs(self.circuit_breaker_reset_timeout_secs),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_base_delay_secs)
    }

    pub fn max_backoff_delay(&self) -> Duration {
        Duration::from_secs(self.max_backoff_delay_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn recurring_alert_cooldown(&self) -> Option<chrono::Duration> {
        self.recurring_alert_cooldown_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .map(chrono::Duration::seconds)
    }
}

/// The portable configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedConfig {
    pub log_file: Option<PathBuf>,
    pub alert_email: Option<String>,
    pub alert_webhook: Option<String>,
    pub circuit_breaker_threshold: u32,
    /// Seconds
    pub circuit_breaker_reset_timeout: u64,
    pub max_retries: u32,
    /// Seconds
    pub retry_base_delay: f64,
    pub recovery_strategies: BTreeMap<String, StrategyRecord>,
}

impl ExportedConfig {
    pub fn write_json_file(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_string_pretty(self)?;
        fs::write(path, body)?;
        Ok(())
    }
}

/// A configuration document being imported. Only the keys present in the
/// document are applied; an explicit `null` clears an optional value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConfigImport {
    #[serde(deserialize_with = "present")]
    pub log_file: Option<Option<PathBuf>>,
    #[serde(deserialize_with = "present")]
    pub alert_email: Option<Option<String>>,
    #[serde(deserialize_with = "present")]
    pub alert_webhook: Option<Option<String>>,
    pub circuit_breaker_threshold: Option<u32>,
    pub circuit_breaker_reset_timeout: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_base_delay: Option<f64>,
    pub recovery_strategies: Option<BTreeMap<String, StrategyRecord>>,
}

/// Marks a key as present even when its value is `null`
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl ConfigImport {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let body = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&body)?)
    }
}
