//! # Error Detector
//!
//! The engine instance. It owns the ledger, pattern tracker, circuit breaker
//! and strategy table behind one mutex, the alert dispatcher and the
//! scheduler loop.
//!
//! Locking discipline: shared state is only touched while holding the state
//! mutex, and no network call (replay, webhook, email) is made while holding
//! it. Alerts produced under the lock are collected and dispatched after it
//! is released.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::alerts::{
    AlertDispatcher, AlertEvent, AlertKind, CallbackNotifier, EmailNotifier, MailTransport,
    Notifier, SmtpSettings, WebhookNotifier, EMAIL_CHANNEL, WEBHOOK_CHANNEL,
};
use crate::circuit_breaker::{
    BreakerOpened, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
use crate::config::{ConfigImport, DetectorConfig, ExportedConfig};
use crate::event::{ErrorEvent, PatternKey};
use crate::ledger::{DurableLog, ErrorLedger, ErrorRates, LedgerSummary, Ranked, SearchFilter};
use crate::monitoring;
use crate::patterns::{PatternStats, PatternTracker, RapidBurst, RecurringPattern, PATTERN_WINDOW_HOURS};
use crate::recovery::{RecoveryExecutor, RecoveryOutcome, ReplayPlan};
use crate::retry::{HttpReplayer, RequestReplayer};
use crate::scheduler::Scheduler;
use crate::strategy::{RecoveryStrategy, StrategyRecord, StrategyTable};
use crate::types::{Error, Result};

/// Summary of recent errors and detector health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    #[serde(flatten)]
    pub ledger: LedgerSummary,
    pub circuit_breaker_status: CircuitState,
    pub circuit_breaker_failure_count: u32,
    pub recovery_strategies_configured: usize,
    pub timestamp: DateTime<Utc>,
}

/// Detailed statistics about tracked errors and recovery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorStats {
    /// Lifetime occurrences per error code
    pub error_counts: HashMap<String, u64>,
    pub circuit_breaker: CircuitBreakerSnapshot,
    pub recovery_strategies: BTreeMap<String, StrategyRecord>,
    /// Keyed by `endpoint:error_code`
    pub error_patterns: HashMap<String, PatternStats>,
}

/// What one scheduler tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub breaker_reset: bool,
    pub recurring_alerts: usize,
    pub daily_report_sent: bool,
}

/// Settings that `import_config` may change at runtime
#[derive(Debug, Clone)]
struct RuntimeSettings {
    log_file: Option<PathBuf>,
    alert_email: Option<String>,
    alert_webhook: Option<String>,
    max_retries: u32,
    retry_base_delay: Duration,
    retry_delay: Duration,
}

/// Everything guarded by the detector's mutex
#[derive(Debug)]
struct DetectorState {
    ledger: ErrorLedger,
    patterns: PatternTracker,
    breaker: CircuitBreaker,
    strategies: StrategyTable,
    settings: RuntimeSettings,
    last_recurring_alert: HashMap<PatternKey, DateTime<Utc>>,
    last_daily_report: Option<NaiveDate>,
}

/// Recovery decided under the lock
enum RecoveryStep {
    Done(RecoveryOutcome),
    Replay(ReplayPlan, RecoveryExecutor),
}

/// Builder for [`ErrorDetector`]
pub struct ErrorDetectorBuilder {
    config: DetectorConfig,
    replayer: Option<Arc<dyn RequestReplayer>>,
    mail_transport: Option<Arc<dyn MailTransport>>,
    smtp_settings: Option<SmtpSettings>,
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl ErrorDetectorBuilder {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            replayer: None,
            mail_transport: None,
            smtp_settings: None,
            notifiers: Vec::new(),
        }
    }

    /// Replaces the HTTP client used to replay failed requests
    pub fn replayer(mut self, replayer: Arc<dyn RequestReplayer>) -> Self {
        self.replayer = Some(replayer);
        self
    }

    /// Transport for email alerts; without one, email alerts are disabled
    pub fn mail_transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.mail_transport = Some(transport);
        self
    }

    /// SMTP settings to use instead of the `SMTP_*` environment variables
    pub fn smtp_settings(mut self, settings: SmtpSettings) -> Self {
        self.smtp_settings = Some(settings);
        self
    }

    /// Registers an additional alert channel
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Builds the detector and replays the durable log into it
    pub fn build(self) -> Result<ErrorDetector> {
        let config = self.config;
        config.validate()?;

        let replayer: Arc<dyn RequestReplayer> = match self.replayer {
            Some(replayer) => replayer,
            None => Arc::new(HttpReplayer::new(config.request_timeout(), config.api_key.clone())?),
        };

        let mut ledger = ErrorLedger::new(
            config.max_errors_to_track,
            config.log_file.clone().map(DurableLog::new),
        );

        let mut patterns = PatternTracker::new();
        let now = Utc::now();
        for event in ledger.load(now, chrono::Duration::hours(PATTERN_WINDOW_HOURS)) {
            patterns.record(&event.pattern_key(), event.timestamp);
        }

        let state = DetectorState {
            ledger,
            patterns,
            breaker: CircuitBreaker::new(config.breaker_config()),
            strategies: StrategyTable::from_records(
                config.recovery_strategies.clone(),
                config.max_retries,
            ),
            settings: RuntimeSettings {
                log_file: config.log_file.clone(),
                alert_email: config.alert_email.clone(),
                alert_webhook: config.alert_webhook.clone(),
                max_retries: config.max_retries,
                retry_base_delay: config.retry_base_delay(),
                retry_delay: config.retry_delay(),
            },
            last_recurring_alert: HashMap::new(),
            last_daily_report: None,
        };

        let detector = ErrorDetector {
            state: Mutex::new(state),
            replayer,
            mail_transport: self.mail_transport,
            smtp_settings: self.smtp_settings.unwrap_or_else(SmtpSettings::from_env),
            dispatcher: AlertDispatcher::new(),
            scheduler: Scheduler::new("error-detector", config.tick_interval(), config.stop_timeout()),
            service_name: config.service_name.clone(),
            webhook_timeout: config.webhook_timeout(),
            max_backoff_delay: config.max_backoff_delay(),
            daily_report_hour: config.daily_report_hour,
            recurring_alert_cooldown: config.recurring_alert_cooldown(),
        };

        detector.configure_channels(config.alert_email.as_deref(), config.alert_webhook.as_deref());
        for notifier in self.notifiers {
            detector.dispatcher.add(notifier);
        }

        info!(
            service = %detector.service_name,
            strategies = detector.lock().strategies.len(),
            "Error detector initialized"
        );
        Ok(detector)
    }
}

/// Detects error patterns in a monitored API and reacts to them
pub struct ErrorDetector {
    state: Mutex<DetectorState>,
    replayer: Arc<dyn RequestReplayer>,
    mail_transport: Option<Arc<dyn MailTransport>>,
    smtp_settings: SmtpSettings,
    dispatcher: AlertDispatcher,
    scheduler: Scheduler,
    service_name: String,
    webhook_timeout: Duration,
    max_backoff_delay: Duration,
    daily_report_hour: u32,
    recurring_alert_cooldown: Option<chrono::Duration>,
}

impl std::fmt::Debug for ErrorDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorDetector")
            .field("service_name", &self.service_name)
            .field("dispatcher", &self.dispatcher)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl ErrorDetector {
    pub fn builder(config: DetectorConfig) -> ErrorDetectorBuilder {
        ErrorDetectorBuilder::new(config)
    }

    /// Builds a detector with the default HTTP replayer and no mail transport
    pub fn new(config: DetectorConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    fn lock(&self) -> MutexGuard<'_, DetectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tracks a failed API call and applies the recovery strategy configured
    /// for its code. Never fails; the outcome says what recovery did.
    pub async fn track_error(
        &self,
        error_code: impl ToString,
        error_message: impl Into<String>,
        endpoint: impl Into<String>,
        request_data: Option<Value>,
        response_data: Option<Value>,
    ) -> RecoveryOutcome {
        let mut event = ErrorEvent::new(error_code, error_message, endpoint);
        event.request_data = request_data;
        event.response_data = response_data;
        self.track_event(event).await
    }

    /// Tracks a prepared event; its timestamp is taken as the time of failure
    pub async fn track_event(&self, event: ErrorEvent) -> RecoveryOutcome {
        let now = event.timestamp;
        let key = event.pattern_key();
        let endpoint = event.endpoint.clone();
        let request_data = event.request_data.clone();
        let mut alerts = Vec::new();

        let step = {
            let mut state = self.lock();

            state.ledger.track(event.clone());
            state.patterns.record(&key, now);
            monitoring::record_tracked_error(&event.error_code);

            if let Some(burst) = state.patterns.rapid_burst(&key) {
                warn!(
                    error_code = %key.error_code,
                    endpoint = %key.endpoint,
                    "Rapid error sequence detected"
                );
                alerts.push(burst_alert(&burst, now));
                if let Some(opened) = state.breaker.increment(now) {
                    alerts.push(breaker_alert(&opened, now));
                }
            }

            self.plan_recovery(&mut state, &event, &mut alerts)
        };

        debug!(
            error_code = %event.error_code,
            endpoint = %endpoint,
            message = %event.error_message,
            "Tracked error"
        );

        self.dispatch(alerts).await;

        match step {
            RecoveryStep::Done(outcome) => outcome,
            RecoveryStep::Replay(plan, executor) => {
                executor.execute(&plan, &endpoint, request_data.as_ref()).await
            }
        }
    }

    fn plan_recovery(
        &self,
        state: &mut DetectorState,
        event: &ErrorEvent,
        alerts: &mut Vec<AlertEvent>,
    ) -> RecoveryStep {
        let Some(strategy) = state.strategies.get(&event.error_code).cloned() else {
            return RecoveryStep::Done(RecoveryOutcome::NoStrategy);
        };

        if state.breaker.is_open() {
            warn!(
                error_code = %event.error_code,
                strategy = %strategy.kind(),
                "Circuit breaker is open, skipping recovery strategy"
            );
            monitoring::record_recovery_skipped();
            return RecoveryStep::Done(RecoveryOutcome::SkippedCircuitOpen);
        }

        match strategy {
            RecoveryStrategy::CircuitBreak => {
                if let Some(opened) = state.breaker.increment(event.timestamp) {
                    alerts.push(breaker_alert(&opened, event.timestamp));
                }
                RecoveryStep::Done(RecoveryOutcome::BreakerIncremented)
            }
            RecoveryStrategy::NotifyOnly => {
                let details = serde_json::to_value(event).unwrap_or(Value::Null);
                alerts.push(
                    AlertEvent::new(
                        AlertKind::ErrorCode(event.error_code.clone()),
                        format!("Error detected: {} on {}", event.error_code, event.endpoint),
                        event.timestamp,
                    )
                    .with_details(details),
                );
                RecoveryStep::Done(RecoveryOutcome::Notified)
            }
            replaying => match ReplayPlan::for_strategy(&replaying) {
                Some(plan) => {
                    let executor = RecoveryExecutor::new(
                        self.replayer.clone(),
                        state.settings.retry_delay,
                        state.settings.retry_base_delay,
                    )
                    .with_max_backoff_delay(self.max_backoff_delay);
                    RecoveryStep::Replay(plan, executor)
                }
                None => RecoveryStep::Done(RecoveryOutcome::NoStrategy),
            },
        }
    }

    async fn dispatch(&self, alerts: Vec<AlertEvent>) {
        for alert in alerts {
            self.dispatcher.send(&alert).await;
        }
    }

    /// Registers or replaces the strategy for an error code. Strategies that
    /// cannot run are rejected and the table is left unchanged.
    pub fn add_recovery_strategy(&self, error_code: impl ToString, strategy: RecoveryStrategy) -> Result<()> {
        let error_code = error_code.to_string();
        if let Err(e) = strategy.validate() {
            warn!(error_code = %error_code, error = %e, "Rejected recovery strategy");
            return Err(e);
        }
        info!(error_code = %error_code, strategy = %strategy.kind(), "Added recovery strategy");
        self.lock().strategies.insert(error_code, strategy);
        Ok(())
    }

    /// Registers a callback invoked for every alert
    pub fn add_alert_handler<F>(&self, handler: F)
    where
        F: Fn(&AlertEvent) + Send + Sync + 'static,
    {
        self.dispatcher.add(Arc::new(CallbackNotifier::new("custom", handler)));
    }

    /// Manually closes the circuit breaker
    pub fn reset_circuit_breaker(&self) {
        self.lock().breaker.reset();
        monitoring::record_breaker_reset(false);
    }

    pub fn circuit_breaker(&self) -> CircuitBreakerSnapshot {
        self.lock().breaker.snapshot()
    }

    pub fn error_summary(&self) -> ErrorSummary {
        self.error_summary_at(Utc::now())
    }

    pub fn error_summary_at(&self, now: DateTime<Utc>) -> ErrorSummary {
        let state = self.lock();
        ErrorSummary {
            ledger: state.ledger.summary(now),
            circuit_breaker_status: state.breaker.state(),
            circuit_breaker_failure_count: state.breaker.failure_count(),
            recovery_strategies_configured: state.strategies.len(),
            timestamp: now,
        }
    }

    /// Tracked errors matching `filter`, oldest first, at most `limit`
    pub fn search_errors(&self, filter: &SearchFilter, limit: usize) -> Vec<ErrorEvent> {
        self.lock().ledger.search(filter, limit)
    }

    pub fn stats(&self) -> DetectorStats {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> DetectorStats {
        let state = self.lock();
        DetectorStats {
            error_counts: state.ledger.error_counts().clone(),
            circuit_breaker: state.breaker.snapshot(),
            recovery_strategies: state.strategies.to_records(),
            error_patterns: state.patterns.stats(now),
        }
    }

    /// Per-code error rates over the last `interval_minutes`
    pub fn error_rates(&self, interval_minutes: i64) -> ErrorRates {
        self.error_rates_at(Utc::now(), interval_minutes)
    }

    pub fn error_rates_at(&self, now: DateTime<Utc>, interval_minutes: i64) -> ErrorRates {
        self.lock()
            .ledger
            .error_rates(now, chrono::Duration::minutes(interval_minutes.max(1)))
    }

    /// Writes the portable configuration to a JSON file
    pub fn export_config(&self, path: &Path) -> Result<()> {
        let exported = {
            let state = self.lock();
            let breaker = state.breaker.config();
            ExportedConfig {
                log_file: state.settings.log_file.clone(),
                alert_email: state.settings.alert_email.clone(),
                alert_webhook: state.settings.alert_webhook.clone(),
                circuit_breaker_threshold: breaker.threshold,
                circuit_breaker_reset_timeout: breaker.reset_timeout.as_secs(),
                max_retries: state.settings.max_retries,
                retry_base_delay: state.settings.retry_base_delay.as_secs_f64(),
                recovery_strategies: state.strategies.to_records(),
            }
        };

        exported.write_json_file(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to export configuration");
            e
        })?;

        info!(path = %path.display(), "Exported configuration");
        Ok(())
    }

    /// Applies a configuration document written by `export_config`. Keys
    /// absent from the document keep their current values; strategies are
    /// merged into the table and invalid ones are skipped.
    pub fn import_config(&self, path: &Path) -> Result<()> {
        let import = ConfigImport::from_json_file(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to import configuration");
            e
        })?;

        if import.circuit_breaker_threshold == Some(0) {
            return Err(Error::configuration("circuit_breaker_threshold must be at least 1"));
        }
        let retry_base_delay = import
            .retry_base_delay
            .map(Duration::try_from_secs_f64)
            .transpose()
            .map_err(|_| Error::configuration("retry_base_delay must be a non-negative number of seconds"))?;

        let (email, webhook) = {
            let mut state = self.lock();

            if let Some(log_file) = import.log_file {
                state.ledger.set_log(log_file.clone().map(DurableLog::new));
                state.settings.log_file = log_file;
            }
            if let Some(email) = import.alert_email {
                state.settings.alert_email = email;
            }
            if let Some(webhook) = import.alert_webhook {
                state.settings.alert_webhook = webhook;
            }

            let current = state.breaker.config().clone();
            state.breaker.reconfigure(CircuitBreakerConfig {
                threshold: import.circuit_breaker_threshold.unwrap_or(current.threshold),
                reset_timeout: import
                    .circuit_breaker_reset_timeout
                    .map(Duration::from_secs)
                    .unwrap_or(current.reset_timeout),
            });

            if let Some(max_retries) = import.max_retries {
                state.settings.max_retries = max_retries;
            }
            if let Some(delay) = retry_base_delay {
                state.settings.retry_base_delay = delay;
            }

            if let Some(records) = import.recovery_strategies {
                let default_retries = state.settings.max_retries;
                for (code, record) in records {
                    match record.into_strategy(default_retries) {
                        Ok(strategy) => state.strategies.insert(code, strategy),
                        Err(e) => warn!(
                            error_code = %code,
                            error = %e,
                            "Failed to import recovery strategy"
                        ),
                    }
                }
            }

            (state.settings.alert_email.clone(), state.settings.alert_webhook.clone())
        };

        self.configure_channels(email.as_deref(), webhook.as_deref());
        info!(path = %path.display(), "Imported configuration");
        Ok(())
    }

    /// Installs (or removes) the email and webhook channels
    fn configure_channels(&self, alert_email: Option<&str>, alert_webhook: Option<&str>) {
        let webhook = alert_webhook.and_then(|url| {
            match WebhookNotifier::new(url, self.service_name.clone(), self.webhook_timeout) {
                Ok(notifier) => Some(Arc::new(notifier) as Arc<dyn Notifier>),
                Err(e) => {
                    error!(url = %url, error = %e, "Failed to configure webhook alerts");
                    None
                }
            }
        });
        self.dispatcher.replace(WEBHOOK_CHANNEL, webhook);

        let email = match (alert_email, &self.mail_transport) {
            (Some(recipient), Some(transport)) => Some(Arc::new(EmailNotifier::new(
                recipient,
                self.service_name.clone(),
                self.smtp_settings.clone(),
                transport.clone(),
            )) as Arc<dyn Notifier>),
            (Some(recipient), None) => {
                warn!(recipient = %recipient, "No mail transport configured, email alerts disabled");
                None
            }
            (None, _) => None,
        };
        self.dispatcher.replace(EMAIL_CHANNEL, email);
    }

    /// Starts the scheduler loop. Fails if it is already running.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let detector = Arc::downgrade(self);
        self.scheduler.start(move || {
            let detector = detector.clone();
            async move {
                if let Some(detector) = detector.upgrade() {
                    detector.run_tick(Utc::now()).await;
                }
            }
        })?;

        info!(service = %self.service_name, "Error detection started");
        Ok(())
    }

    /// Stops the scheduler loop, waiting at most the configured stop timeout
    pub async fn stop(&self) {
        self.scheduler.stop().await;
        info!(service = %self.service_name, "Error detection stopped");
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// One scheduler pass: breaker auto-reset, recurring pattern scan and
    /// the daily report
    pub async fn run_tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        let mut alerts = Vec::new();

        {
            let mut state = self.lock();

            if state.breaker.check_auto_reset(now) {
                monitoring::record_breaker_reset(true);
                report.breaker_reset = true;
            }

            state.patterns.prune(now);
            let tracked: Vec<PatternKey> = state.patterns.keys().cloned().collect();
            state
                .last_recurring_alert
                .retain(|key, _| tracked.contains(key));

            for pattern in state.patterns.recurring_patterns(now) {
                if let (Some(cooldown), Some(last)) = (
                    self.recurring_alert_cooldown,
                    state.last_recurring_alert.get(&pattern.key),
                ) {
                    if now - *last < cooldown {
                        continue;
                    }
                }

                warn!(
                    error_code = %pattern.key.error_code,
                    endpoint = %pattern.key.endpoint,
                    occurrences = pattern.occurrences,
                    "Recurring error pattern detected"
                );
                state.last_recurring_alert.insert(pattern.key.clone(), now);
                alerts.push(recurring_alert(&pattern, now));
                report.recurring_alerts += 1;
            }

            let today = now.date_naive();
            if now.hour() == self.daily_report_hour && state.last_daily_report != Some(today) {
                state.last_daily_report = Some(today);
                let summary = ErrorSummary {
                    ledger: state.ledger.summary(now),
                    circuit_breaker_status: state.breaker.state(),
                    circuit_breaker_failure_count: state.breaker.failure_count(),
                    recovery_strategies_configured: state.strategies.len(),
                    timestamp: now,
                };
                let by_kind: BTreeMap<String, usize> = state
                    .strategies
                    .counts_by_kind()
                    .into_iter()
                    .map(|(kind, count)| (kind.to_string(), count))
                    .collect();
                alerts.push(self.daily_report(&summary, &by_kind, now));
                report.daily_report_sent = true;
            }
        }

        self.dispatch(alerts).await;
        if report.daily_report_sent {
            info!("Daily error report generated and sent");
        }
        report
    }

    fn daily_report(
        &self,
        summary: &ErrorSummary,
        strategies_by_kind: &BTreeMap<String, usize>,
        now: DateTime<Utc>,
    ) -> AlertEvent {
        let by_kind = serde_json::to_string_pretty(strategies_by_kind).unwrap_or_default();
        let top_codes = serde_json::to_string_pretty(&Ranked(&summary.ledger.top_error_codes))
            .unwrap_or_default();
        let top_endpoints = serde_json::to_string_pretty(&Ranked(&summary.ledger.top_error_endpoints))
            .unwrap_or_default();

        let message = format!(
            "{service} Daily Error Report\n\
             Date: {date}\n\
             \n\
             Error Summary:\n\
             - Total errors tracked: {total}\n\
             - Errors in the last 24 hours: {last_day}\n\
             - Circuit breaker status: {breaker}\n\
             - Recovery strategies configured: {strategies}\n\
             \n\
             Recovery strategies by kind:\n\
             {by_kind}\n\
             \n\
             Top Error Codes:\n\
             {top_codes}\n\
             \n\
             Top Error Endpoints:\n\
             {top_endpoints}\n",
            service = self.service_name,
            date = now.format("%Y-%m-%d"),
            total = summary.ledger.total_errors_tracked,
            last_day = summary.ledger.errors_last_day,
            breaker = summary.circuit_breaker_status,
            strategies = summary.recovery_strategies_configured,
            by_kind = by_kind,
            top_codes = top_codes,
            top_endpoints = top_endpoints,
        );

        let mut details = serde_json::to_value(summary).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut details {
            map.insert("recovery_strategies_by_kind".to_string(), json!(strategies_by_kind));
        }
        AlertEvent::new(AlertKind::DailyReport, message, now).with_details(details)
    }
}

fn burst_alert(burst: &RapidBurst, now: DateTime<Utc>) -> AlertEvent {
    let intervals: Vec<f64> = burst
        .recent_intervals
        .iter()
        .map(|interval| interval.num_milliseconds() as f64 / 1000.0)
        .collect();

    AlertEvent::new(
        AlertKind::RapidSequence,
        format!(
            "Detected rapid error sequence: {} on {} (multiple errors within seconds)",
            burst.key.error_code, burst.key.endpoint
        ),
        now,
    )
    .with_details(json!({
        "pattern_key": burst.key.to_string(),
        "error_code": burst.key.error_code,
        "endpoint": burst.key.endpoint,
        "recent_intervals": intervals,
        "total_occurrences": burst.total_occurrences,
    }))
}

fn breaker_alert(opened: &BreakerOpened, now: DateTime<Utc>) -> AlertEvent {
    monitoring::record_breaker_opened();
    AlertEvent::new(
        AlertKind::CircuitBreakerOpened,
        format!("Circuit breaker opened after {} failures", opened.failure_count),
        now,
    )
    .with_details(json!({
        "failure_count": opened.failure_count,
        "threshold": opened.threshold,
        "reset_timeout": opened.reset_timeout.as_secs(),
    }))
}

fn recurring_alert(pattern: &RecurringPattern, now: DateTime<Utc>) -> AlertEvent {
    AlertEvent::new(
        AlertKind::RecurringPattern,
        format!(
            "Detected recurring error pattern: {} on {} ({} occurrences in the last hour)",
            pattern.key.error_code, pattern.key.endpoint, pattern.occurrences
        ),
        now,
    )
    .with_details(json!({
        "pattern_key": pattern.key.to_string(),
        "error_code": pattern.key.error_code,
        "endpoint": pattern.key.endpoint,
        "occurrences": pattern.occurrences,
        "first_occurrence": pattern.first_occurrence.to_rfc3339(),
        "last_occurrence": pattern.last_occurrence.to_rfc3339(),
    }))
}
