//! # Recovery Strategies
//!
//! The six recovery strategies as a sum type, the flat record they are
//! exchanged as in configuration files, and the per-error-code table the
//! detector consults.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{Error, Result};

/// Default attempts for retrying strategies
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default multiplier for exponential backoff
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Strategy discriminant as it appears in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Retry,
    ExponentialBackoff,
    CircuitBreaker,
    Fallback,
    RetryWithFallback,
    NotifyOnly,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::Retry => "retry",
            StrategyKind::ExponentialBackoff => "exponential_backoff",
            StrategyKind::CircuitBreaker => "circuit_breaker",
            StrategyKind::Fallback => "fallback",
            StrategyKind::RetryWithFallback => "retry_with_fallback",
            StrategyKind::NotifyOnly => "notify_only",
        };
        f.write_str(name)
    }
}

/// What to do when an error with a given code is tracked
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryStrategy {
    /// Replay the request up to `max_retries` times with a fixed delay
    Retry { max_retries: u32 },
    /// Replay the request with delays of `base * backoff_factor^i`
    ExponentialBackoff { max_retries: u32, backoff_factor: f64 },
    /// Count the error against the circuit breaker
    CircuitBreak,
    /// Send the request once to another endpoint
    Fallback { fallback_endpoint: String },
    /// Retry, then fall back if an endpoint is configured
    RetryWithFallback {
        max_retries: u32,
        fallback_endpoint: Option<String>,
    },
    /// Raise an alert and do nothing else
    NotifyOnly,
}

impl RecoveryStrategy {
    pub fn retry(max_retries: u32) -> Self {
        RecoveryStrategy::Retry { max_retries }
    }

    pub fn exponential_backoff(max_retries: u32, backoff_factor: f64) -> Self {
        RecoveryStrategy::ExponentialBackoff {
            max_retries,
            backoff_factor,
        }
    }

    pub fn fallback(endpoint: impl Into<String>) -> Self {
        RecoveryStrategy::Fallback {
            fallback_endpoint: endpoint.into(),
        }
    }

    pub fn retry_with_fallback(max_retries: u32, endpoint: Option<String>) -> Self {
        RecoveryStrategy::RetryWithFallback {
            max_retries,
            fallback_endpoint: endpoint,
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            RecoveryStrategy::Retry { .. } => StrategyKind::Retry,
            RecoveryStrategy::ExponentialBackoff { .. } => StrategyKind::ExponentialBackoff,
            RecoveryStrategy::CircuitBreak => StrategyKind::CircuitBreaker,
            RecoveryStrategy::Fallback { .. } => StrategyKind::Fallback,
            RecoveryStrategy::RetryWithFallback { .. } => StrategyKind::RetryWithFallback,
            RecoveryStrategy::NotifyOnly => StrategyKind::NotifyOnly,
        }
    }

    /// Rejects strategies that cannot run: a backoff factor that is not a
    /// positive number, or a fallback without an endpoint
    pub fn validate(&self) -> Result<()> {
        match self {
            RecoveryStrategy::ExponentialBackoff { backoff_factor, .. }
                if !backoff_factor.is_finite() || *backoff_factor <= 0.0 =>
            {
                Err(Error::InvalidStrategy(format!(
                    "backoff factor must be positive, got {}",
                    backoff_factor
                )))
            }
            RecoveryStrategy::Fallback { fallback_endpoint } if fallback_endpoint.is_empty() => {
                Err(Error::InvalidStrategy(
                    "fallback strategy requires a fallback_endpoint".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Flat form of a strategy used in exported configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub strategy: StrategyKind,
    /// Absent in hand-written files; filled from the configured default
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default)]
    pub fallback_endpoint: Option<String>,
}

fn default_backoff_factor() -> f64 {
    DEFAULT_BACKOFF_FACTOR
}

impl From<&RecoveryStrategy> for StrategyRecord {
    fn from(strategy: &RecoveryStrategy) -> Self {
        let mut record = StrategyRecord {
            strategy: strategy.kind(),
            max_retries: None,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            fallback_endpoint: None,
        };

        match strategy {
            RecoveryStrategy::Retry { max_retries } => record.max_retries = Some(*max_retries),
            RecoveryStrategy::ExponentialBackoff {
                max_retries,
                backoff_factor,
            } => {
                record.max_retries = Some(*max_retries);
                record.backoff_factor = *backoff_factor;
            }
            RecoveryStrategy::Fallback { fallback_endpoint } => {
                record.fallback_endpoint = Some(fallback_endpoint.clone());
            }
            RecoveryStrategy::RetryWithFallback {
                max_retries,
                fallback_endpoint,
            } => {
                record.max_retries = Some(*max_retries);
                record.fallback_endpoint = fallback_endpoint.clone();
            }
            RecoveryStrategy::CircuitBreak | RecoveryStrategy::NotifyOnly => {}
        }

        record
    }
}

impl StrategyRecord {
    /// Builds the strategy, using `default_max_retries` when the record
    /// leaves the retry count out
    pub fn into_strategy(self, default_max_retries: u32) -> Result<RecoveryStrategy> {
        let max_retries = self.max_retries.unwrap_or(default_max_retries);

        let strategy = match self.strategy {
            StrategyKind::Retry => RecoveryStrategy::Retry { max_retries },
            StrategyKind::ExponentialBackoff => RecoveryStrategy::ExponentialBackoff {
                max_retries,
                backoff_factor: self.backoff_factor,
            },
            StrategyKind::CircuitBreaker => RecoveryStrategy::CircuitBreak,
            StrategyKind::Fallback => RecoveryStrategy::Fallback {
                fallback_endpoint: self.fallback_endpoint.unwrap_or_default(),
            },
            StrategyKind::RetryWithFallback => RecoveryStrategy::RetryWithFallback {
                max_retries,
                fallback_endpoint: self.fallback_endpoint.filter(|e| !e.is_empty()),
            },
            StrategyKind::NotifyOnly => RecoveryStrategy::NotifyOnly,
        };

        strategy.validate()?;
        Ok(strategy)
    }
}

impl TryFrom<StrategyRecord> for RecoveryStrategy {
    type Error = Error;

    fn try_from(record: StrategyRecord) -> Result<Self> {
        record.into_strategy(DEFAULT_MAX_RETRIES)
    }
}

/// Recovery strategies keyed by error code
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyTable {
    strategies: BTreeMap<String, RecoveryStrategy>,
}

impl StrategyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a strategy, replacing any previous one for the code
    pub fn insert(&mut self, error_code: impl ToString, strategy: RecoveryStrategy) {
        self.strategies.insert(error_code.to_string(), strategy);
    }

    pub fn get(&self, error_code: &str) -> Option<&RecoveryStrategy> {
        self.strategies.get(error_code)
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Wire form of every entry
    pub fn to_records(&self) -> BTreeMap<String, StrategyRecord> {
        self.strategies
            .iter()
            .map(|(code, strategy)| (code.clone(), StrategyRecord::from(strategy)))
            .collect()
    }

    /// Builds a table from wire records. Invalid records are skipped with a
    /// warning so that one bad entry does not discard the rest.
    pub fn from_records<I>(records: I, default_max_retries: u32) -> Self
    where
        I: IntoIterator<Item = (String, StrategyRecord)>,
    {
        let mut table = StrategyTable::new();
        for (code, record) in records {
            match record.into_strategy(default_max_retries) {
                Ok(strategy) => table.insert(code, strategy),
                Err(e) => warn!(error_code = %code, error = %e, "Skipping invalid recovery strategy"),
            }
        }
        table
    }

    /// Number of configured strategies per kind
    pub fn counts_by_kind(&self) -> HashMap<StrategyKind, usize> {
        let mut counts = HashMap::new();
        for strategy in self.strategies.values() {
            *counts.entry(strategy.kind()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_table() -> StrategyTable {
        let mut table = StrategyTable::new();
        table.insert(429, RecoveryStrategy::exponential_backoff(4, 2.0));
        table.insert(500, RecoveryStrategy::retry(3));
        table.insert(502, RecoveryStrategy::fallback("https://backup.example.com/v1"));
        table.insert(
            503,
            RecoveryStrategy::retry_with_fallback(2, Some("https://backup.example.com/v1".into())),
        );
        table.insert(504, RecoveryStrategy::retry_with_fallback(5, None));
        table.insert(401, RecoveryStrategy::NotifyOnly);
        table.insert("ECONNRESET", RecoveryStrategy::CircuitBreak);
        table
    }

    #[test]
    fn test_json_round_trip_reproduces_table() {
        let table = sample_table();
        let encoded = serde_json::to_string(&table.to_records()).unwrap();
        let decoded: BTreeMap<String, StrategyRecord> = serde_json::from_str(&encoded).unwrap();

        assert_eq!(StrategyTable::from_records(decoded, 0), table);
    }

    #[test]
    fn test_record_wire_names() {
        let record = StrategyRecord::from(&RecoveryStrategy::exponential_backoff(4, 1.5));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "strategy": "exponential_backoff",
                "max_retries": 4,
                "backoff_factor": 1.5,
                "fallback_endpoint": null
            })
        );
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let record: StrategyRecord = serde_json::from_value(json!({"strategy": "retry"})).unwrap();
        assert_eq!(
            RecoveryStrategy::try_from(record.clone()).unwrap(),
            RecoveryStrategy::retry(DEFAULT_MAX_RETRIES)
        );
        assert_eq!(record.into_strategy(7).unwrap(), RecoveryStrategy::retry(7));

        let record: StrategyRecord =
            serde_json::from_value(json!({"strategy": "exponential_backoff", "max_retries": 2}))
                .unwrap();
        assert_eq!(
            RecoveryStrategy::try_from(record).unwrap(),
            RecoveryStrategy::exponential_backoff(2, DEFAULT_BACKOFF_FACTOR)
        );
    }

    #[test]
    fn test_fallback_without_endpoint_is_rejected() {
        let records = vec![
            (
                "502".to_string(),
                serde_json::from_value::<StrategyRecord>(json!({"strategy": "fallback"})).unwrap(),
            ),
            (
                "500".to_string(),
                serde_json::from_value::<StrategyRecord>(json!({"strategy": "notify_only"})).unwrap(),
            ),
        ];

        let table = StrategyTable::from_records(records, DEFAULT_MAX_RETRIES);
        assert_eq!(table.len(), 1);
        assert!(table.get("502").is_none());
        assert_eq!(table.get("500"), Some(&RecoveryStrategy::NotifyOnly));
    }

    #[test]
    fn test_counts_by_kind() {
        let counts = sample_table().counts_by_kind();
        assert_eq!(counts[&StrategyKind::RetryWithFallback], 2);
        assert_eq!(counts[&StrategyKind::NotifyOnly], 1);
        assert_eq!(counts[&StrategyKind::Retry], 1);
        assert_eq!(counts.values().sum::<usize>(), 7);
    }

    #[test]
    fn test_validate_rejects_unusable_strategies() {
        assert!(RecoveryStrategy::exponential_backoff(3, 2.0).validate().is_ok());
        assert!(matches!(
            RecoveryStrategy::exponential_backoff(3, -1.0).validate(),
            Err(Error::InvalidStrategy(_))
        ));
        assert!(RecoveryStrategy::exponential_backoff(3, f64::NAN).validate().is_err());
        assert!(RecoveryStrategy::exponential_backoff(3, 0.0).validate().is_err());
        assert!(RecoveryStrategy::fallback("").validate().is_err());
        assert!(RecoveryStrategy::NotifyOnly.validate().is_ok());
    }
}
