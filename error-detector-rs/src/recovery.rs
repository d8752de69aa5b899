//! # Recovery Execution
//!
//! Runs the network half of the recovery strategies: retrying the original
//! request, backing off exponentially and falling back to another endpoint.
//! Strategies that only touch detector state (circuit break, notify) are
//! handled by the detector under its lock; everything here runs without it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::monitoring;
use crate::retry::{backoff_delay, is_success, RequestReplayer, DEFAULT_MAX_BACKOFF_DELAY_SECS};
use crate::strategy::{RecoveryStrategy, StrategyKind};

/// Where a successful replay landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryRoute {
    /// The original endpoint
    Original,
    /// The configured fallback endpoint
    Fallback,
}

/// Result of applying the recovery policy to one tracked error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// No strategy is configured for the error code
    NoStrategy,
    /// The circuit breaker is open; nothing was attempted
    SkippedCircuitOpen,
    /// The strategy replays requests but none was supplied
    MissingPayload,
    /// A replay succeeded
    Recovered { route: RecoveryRoute, attempts: u32 },
    /// Every replay failed
    Failed {
        attempts: u32,
        fallback_attempted: bool,
    },
    /// The error was counted against the circuit breaker
    BreakerIncremented,
    /// An alert was raised for the error
    Notified,
}

impl RecoveryOutcome {
    pub fn is_recovered(&self) -> bool {
        matches!(self, RecoveryOutcome::Recovered { .. })
    }
}

/// The replaying strategies, detached from the detector's lock
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayPlan {
    Retry {
        max_retries: u32,
    },
    Backoff {
        max_retries: u32,
        backoff_factor: f64,
    },
    Fallback {
        fallback_endpoint: String,
    },
    RetryThenFallback {
        max_retries: u32,
        fallback_endpoint: Option<String>,
    },
}

impl ReplayPlan {
    /// The replay plan for a strategy, or `None` when it replays nothing
    pub fn for_strategy(strategy: &RecoveryStrategy) -> Option<Self> {
        match strategy {
            RecoveryStrategy::Retry { max_retries } => Some(ReplayPlan::Retry {
                max_retries: *max_retries,
            }),
            RecoveryStrategy::ExponentialBackoff {
                max_retries,
                backoff_factor,
            } => Some(ReplayPlan::Backoff {
                max_retries: *max_retries,
                backoff_factor: *backoff_factor,
            }),
            RecoveryStrategy::Fallback { fallback_endpoint } => Some(ReplayPlan::Fallback {
                fallback_endpoint: fallback_endpoint.clone(),
            }),
            RecoveryStrategy::RetryWithFallback {
                max_retries,
                fallback_endpoint,
            } => Some(ReplayPlan::RetryThenFallback {
                max_retries: *max_retries,
                fallback_endpoint: fallback_endpoint.clone(),
            }),
            RecoveryStrategy::CircuitBreak | RecoveryStrategy::NotifyOnly => None,
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            ReplayPlan::Retry { .. } => StrategyKind::Retry,
            ReplayPlan::Backoff { .. } => StrategyKind::ExponentialBackoff,
            ReplayPlan::Fallback { .. } => StrategyKind::Fallback,
            ReplayPlan::RetryThenFallback { .. } => StrategyKind::RetryWithFallback,
        }
    }
}

/// Executes replay plans against a `RequestReplayer`
#[derive(Clone)]
pub struct RecoveryExecutor {
    replayer: Arc<dyn RequestReplayer>,
    /// Fixed pause before each plain retry
    retry_delay: Duration,
    /// Base of the exponential backoff
    base_delay: Duration,
    /// Ceiling for any single backoff pause
    max_backoff_delay: Duration,
}

impl std::fmt::Debug for RecoveryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryExecutor")
            .field("retry_delay", &self.retry_delay)
            .field("base_delay", &self.base_delay)
            .field("max_backoff_delay", &self.max_backoff_delay)
            .finish_non_exhaustive()
    }
}

impl RecoveryExecutor {
    pub fn new(replayer: Arc<dyn RequestReplayer>, retry_delay: Duration, base_delay: Duration) -> Self {
        Self {
            replayer,
            retry_delay,
            base_delay,
            max_backoff_delay: Duration::from_secs(DEFAULT_MAX_BACKOFF_DELAY_SECS),
        }
    }

    pub fn with_max_backoff_delay(mut self, max_backoff_delay: Duration) -> Self {
        self.max_backoff_delay = max_backoff_delay;
        self
    }

    /// Runs a plan for a failed request. Without a payload nothing is sent.
    pub async fn execute(
        &self,
        plan: &ReplayPlan,
        endpoint: &str,
        payload: Option<&Value>,
    ) -> RecoveryOutcome {
        let Some(payload) = payload else {
            warn!(endpoint = %endpoint, strategy = %plan.kind(), "Cannot replay without request data");
            return RecoveryOutcome::MissingPayload;
        };

        let outcome = match plan {
            ReplayPlan::Retry { max_retries } => {
                match self.retry(endpoint, payload, *max_retries).await {
                    Some(attempts) => recovered(RecoveryRoute::Original, attempts),
                    None => failed(*max_retries, false),
                }
            }
            ReplayPlan::Backoff {
                max_retries,
                backoff_factor,
            } => match self
                .backoff(endpoint, payload, *max_retries, *backoff_factor)
                .await
            {
                Some(attempts) => recovered(RecoveryRoute::Original, attempts),
                None => failed(*max_retries, false),
            },
            ReplayPlan::Fallback { fallback_endpoint } => {
                if self.fallback(fallback_endpoint, payload).await {
                    recovered(RecoveryRoute::Fallback, 1)
                } else {
                    failed(0, true)
                }
            }
            ReplayPlan::RetryThenFallback {
                max_retries,
                fallback_endpoint,
            } => {
                if let Some(attempts) = self.retry(endpoint, payload, *max_retries).await {
                    recovered(RecoveryRoute::Original, attempts)
                } else if let Some(fallback_endpoint) = fallback_endpoint {
                    if self.fallback(fallback_endpoint, payload).await {
                        recovered(RecoveryRoute::Fallback, max_retries + 1)
                    } else {
                        failed(*max_retries, true)
                    }
                } else {
                    failed(*max_retries, false)
                }
            }
        };

        monitoring::record_recovery(plan.kind(), outcome.is_recovered());
        outcome
    }

    /// Replays up to `max_retries` times, pausing `retry_delay` before each
    /// attempt. Returns the 1-based attempt that succeeded.
    pub async fn retry(&self, endpoint: &str, payload: &Value, max_retries: u32) -> Option<u32> {
        for attempt in 1..=max_retries {
            info!(endpoint = %endpoint, attempt, max_retries, "Retry attempt");
            sleep(self.retry_delay).await;

            if self.attempt(endpoint, payload, attempt).await {
                info!(endpoint = %endpoint, attempt, "Retry succeeded");
                return Some(attempt);
            }
        }

        warn!(endpoint = %endpoint, max_retries, "All retry attempts failed");
        None
    }

    /// Replays up to `max_retries` times, pausing `base_delay * factor^i`
    /// (capped at `max_backoff_delay`) before attempt `i`. Returns the
    /// 1-based attempt that succeeded.
    pub async fn backoff(
        &self,
        endpoint: &str,
        payload: &Value,
        max_retries: u32,
        backoff_factor: f64,
    ) -> Option<u32> {
        for index in 0..max_retries {
            let attempt = index + 1;
            let delay = backoff_delay(self.base_delay, backoff_factor, index, self.max_backoff_delay);
            info!(
                endpoint = %endpoint,
                attempt,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                "Backoff retry attempt"
            );
            sleep(delay).await;

            if self.attempt(endpoint, payload, attempt).await {
                info!(endpoint = %endpoint, attempt, "Backoff retry succeeded");
                return Some(attempt);
            }
        }

        warn!(endpoint = %endpoint, max_retries, "All backoff retry attempts failed");
        None
    }

    /// Sends the payload once to the fallback endpoint
    pub async fn fallback(&self, fallback_endpoint: &str, payload: &Value) -> bool {
        info!(fallback_endpoint = %fallback_endpoint, "Attempting fallback");

        match self.replayer.post(fallback_endpoint, payload).await {
            Ok(status) if is_success(status) => {
                info!(fallback_endpoint = %fallback_endpoint, status, "Fallback succeeded");
                true
            }
            Ok(status) => {
                warn!(fallback_endpoint = %fallback_endpoint, status, "Fallback rejected");
                false
            }
            Err(e) => {
                warn!(fallback_endpoint = %fallback_endpoint, error = %e, "Fallback failed");
                false
            }
        }
    }

    async fn attempt(&self, endpoint: &str, payload: &Value, attempt: u32) -> bool {
        match self.replayer.post(endpoint, payload).await {
            Ok(status) if is_success(status) => true,
            Ok(status) => {
                debug!(endpoint = %endpoint, attempt, status, "Replay answered with non-success status");
                false
            }
            Err(e) => {
                warn!(endpoint = %endpoint, attempt, error = %e, "Replay attempt failed");
                false
            }
        }
    }
}

fn recovered(route: RecoveryRoute, attempts: u32) -> RecoveryOutcome {
    RecoveryOutcome::Recovered { route, attempts }
}

fn failed(attempts: u32, fallback_attempted: bool) -> RecoveryOutcome {
    RecoveryOutcome::Failed {
        attempts,
        fallback_attempted,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::time::Instant;

    use crate::types::{Error, Result};

    /// Replayer answering from a script, recording every call
    #[derive(Default)]
    pub(crate) struct ScriptedReplayer {
        responses: Mutex<VecDeque<Result<u16>>>,
        calls: Mutex<Vec<(String, Instant)>>,
    }

    impl ScriptedReplayer {
        pub(crate) fn new(responses: Vec<Result<u16>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn urls(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(url, _)| url.clone()).collect()
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn instants(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(_, at)| *at).collect()
        }
    }

    #[async_trait]
    impl RequestReplayer for ScriptedReplayer {
        async fn post(&self, url: &str, _body: &Value) -> Result<u16> {
            self.calls.lock().unwrap().push((url.to_string(), Instant::now()));
            // An exhausted script keeps failing
            self.responses.lock().unwrap().pop_front().unwrap_or(Ok(503))
        }
    }

    fn executor(replayer: Arc<ScriptedReplayer>) -> RecoveryExecutor {
        RecoveryExecutor::new(replayer, Duration::from_secs(1), Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_one_two_four_eight_seconds() {
        let replayer = Arc::new(ScriptedReplayer::default());
        let started = Instant::now();

        let result = executor(replayer.clone())
            .backoff("https://api.example.com/v1", &json!({"q": 1}), 4, 2.0)
            .await;
        assert!(result.is_none());

        let mut previous = started;
        let gaps: Vec<Duration> = replayer
            .instants()
            .into_iter()
            .map(|at| {
                let gap = at - previous;
                previous = at;
                gap
            })
            .collect();

        let expected: Vec<Duration> = [1, 2, 4, 8].into_iter().map(Duration::from_secs).collect();
        assert_eq!(gaps.len(), 4);
        for (gap, want) in gaps.iter().zip(expected) {
            assert!(*gap >= want && *gap < want + Duration::from_millis(50), "gap {:?}", gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_pauses_never_exceed_the_ceiling() {
        let replayer = Arc::new(ScriptedReplayer::default());
        let started = Instant::now();

        let result = executor(replayer.clone())
            .with_max_backoff_delay(Duration::from_secs(30))
            .backoff("https://api.example.com/v1", &json!({"q": 1}), 15, 10.0)
            .await;
        assert!(result.is_none());
        assert_eq!(replayer.call_count(), 15);

        let mut previous = started;
        for at in replayer.instants() {
            assert!(at - previous <= Duration::from_secs(30) + Duration::from_millis(50));
            previous = at;
        }
        // 1 + 10 + 13 capped pauses
        assert!(previous - started < Duration::from_secs(11 + 13 * 30 + 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_at_first_success() {
        let replayer = Arc::new(ScriptedReplayer::new(vec![
            Ok(500),
            Err(Error::notification("connection reset")),
            Ok(201),
        ]));

        let attempts = executor(replayer.clone())
            .retry("/x", &json!({}), 5)
            .await;
        assert_eq!(attempts, Some(3));
        assert_eq!(replayer.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_fallback_issues_one_fallback_after_exhaustion() {
        let replayer = Arc::new(ScriptedReplayer::new(vec![Ok(500), Ok(500), Ok(500), Ok(200)]));
        let plan = ReplayPlan::RetryThenFallback {
            max_retries: 3,
            fallback_endpoint: Some("/backup".to_string()),
        };

        let outcome = executor(replayer.clone())
            .execute(&plan, "/primary", Some(&json!({"q": 1})))
            .await;

        assert_eq!(
            outcome,
            RecoveryOutcome::Recovered {
                route: RecoveryRoute::Fallback,
                attempts: 4
            }
        );
        let urls = replayer.urls();
        assert_eq!(urls.iter().filter(|u| *u == "/backup").count(), 1);
        assert_eq!(urls.iter().filter(|u| *u == "/primary").count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_fallback_skips_fallback_when_retry_succeeds() {
        let replayer = Arc::new(ScriptedReplayer::new(vec![Ok(502), Ok(200)]));
        let plan = ReplayPlan::RetryThenFallback {
            max_retries: 3,
            fallback_endpoint: Some("/backup".to_string()),
        };

        let outcome = executor(replayer.clone())
            .execute(&plan, "/primary", Some(&json!({"q": 1})))
            .await;

        assert_eq!(
            outcome,
            RecoveryOutcome::Recovered {
                route: RecoveryRoute::Original,
                attempts: 2
            }
        );
        assert!(!replayer.urls().contains(&"/backup".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_fallback_without_endpoint() {
        let replayer = Arc::new(ScriptedReplayer::default());
        let plan = ReplayPlan::RetryThenFallback {
            max_retries: 2,
            fallback_endpoint: None,
        };

        let outcome = executor(replayer.clone())
            .execute(&plan, "/primary", Some(&json!({})))
            .await;

        assert_eq!(
            outcome,
            RecoveryOutcome::Failed {
                attempts: 2,
                fallback_attempted: false
            }
        );
        assert_eq!(replayer.call_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_payload_fails_closed() {
        let replayer = Arc::new(ScriptedReplayer::default());
        let plan = ReplayPlan::Fallback {
            fallback_endpoint: "/backup".to_string(),
        };

        let outcome = executor(replayer.clone()).execute(&plan, "/primary", None).await;
        assert_eq!(outcome, RecoveryOutcome::MissingPayload);
        assert_eq!(replayer.call_count(), 0);
    }

    #[test]
    fn test_state_only_strategies_have_no_plan() {
        assert!(ReplayPlan::for_strategy(&RecoveryStrategy::CircuitBreak).is_none());
        assert!(ReplayPlan::for_strategy(&RecoveryStrategy::NotifyOnly).is_none());
        assert_eq!(
            ReplayPlan::for_strategy(&RecoveryStrategy::retry(2)),
            Some(ReplayPlan::Retry { max_retries: 2 })
        );
    }
}
