//! # Circuit Breaker
//!
//! Process-wide breaker that suspends recovery strategies once too many
//! failures have accumulated.
//!
//! - `Closed`: normal operation, recovery strategies execute
//! - `Open`: recovery strategies are skipped
//!
//! The breaker holds no lock of its own. It lives inside the detector's shared
//! state and every mutation happens under that state's lock. Auto-reset is
//! driven by the scheduler tick, not by callers.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Default number of failures that opens the breaker
pub const DEFAULT_THRESHOLD: u32 = 5;

/// Default time after the last failure before the breaker closes again
pub const DEFAULT_RESET_TIMEOUT_SECS: u64 = 60;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    /// Normal operation, recovery allowed
    Closed,
    /// Failing, recovery suspended
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
        }
    }
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures needed to open the circuit
    pub threshold: u32,
    /// Quiet period after the last failure before auto-reset
    pub reset_timeout: std::time::Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            reset_timeout: std::time::Duration::from_secs(DEFAULT_RESET_TIMEOUT_SECS),
        }
    }
}

/// Emitted by `increment` on the Closed -> Open transition only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerOpened {
    pub failure_count: u32,
    pub threshold: u32,
    pub reset_timeout: std::time::Duration,
}

/// Serializable view of the breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub is_open: bool,
    pub failure_count: u32,
    pub threshold: u32,
    /// Seconds
    pub reset_timeout: u64,
    pub last_failure: Option<DateTime<Utc>>,
}

/// Failure-count circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    /// Creates a closed breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Replaces threshold and timeout; counters are kept
    pub fn reconfigure(&mut self, config: CircuitBreakerConfig) {
        self.config = config;
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn last_failure_time(&self) -> Option<DateTime<Utc>> {
        self.last_failure_time
    }

    /// Records one failure at `now`. Returns `Some` exactly when this call
    /// opened the circuit.
    pub fn increment(&mut self, now: DateTime<Utc>) -> Option<BreakerOpened> {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_time = Some(now);

        if self.state == CircuitState::Closed && self.failure_count >= self.config.threshold {
            self.state = CircuitState::Open;

            warn!(
                failure_count = self.failure_count,
                threshold = self.config.threshold,
                "Circuit OPEN: failure threshold reached"
            );

            return Some(BreakerOpened {
                failure_count: self.failure_count,
                threshold: self.config.threshold,
                reset_timeout: self.config.reset_timeout,
            });
        }

        None
    }

    /// Closes the circuit if it is open and `reset_timeout` has passed since
    /// the last failure. Returns true when a reset happened.
    pub fn check_auto_reset(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != CircuitState::Open {
            return false;
        }

        let Some(last_failure) = self.last_failure_time else {
            return false;
        };

        let timeout = Duration::from_std(self.config.reset_timeout).unwrap_or(Duration::MAX);
        if now - last_failure > timeout {
            self.clear();
            info!("Circuit CLOSED: reset automatically after timeout");
            true
        } else {
            false
        }
    }

    /// Manually closes the circuit and clears the failure count
    pub fn reset(&mut self) {
        let previous = self.state;
        self.clear();
        info!(previous_state = %previous, "Circuit manually reset to closed");
    }

    fn clear(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.last_failure_time = None;
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            is_open: self.is_open(),
            failure_count: self.failure_count,
            threshold: self.config.threshold,
            reset_timeout: self.config.reset_timeout.as_secs(),
            last_failure: self.last_failure_time,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
