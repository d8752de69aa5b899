//! Metrics emitted by the error detector.
//!
//! Counters go through the `metrics` facade; without an installed recorder
//! they are no-ops. `install_prometheus_exporter` wires up a scrape endpoint.

use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::strategy::StrategyKind;
use crate::types::{Error, Result};

/// Counts a tracked error by code
pub fn record_tracked_error(error_code: &str) {
    counter!("error_detector.errors_tracked", 1, "error_code" => error_code.to_string());
}

/// Counts a failed append to the durable log
pub fn record_log_write_failure() {
    counter!("error_detector.log_write_failures", 1);
}

pub fn record_breaker_opened() {
    counter!("error_detector.circuit_breaker.opened", 1);
}

/// Counts a breaker reset, `automatic` distinguishing timeout from manual resets
pub fn record_breaker_reset(automatic: bool) {
    let trigger = if automatic { "timeout" } else { "manual" };
    counter!("error_detector.circuit_breaker.reset", 1, "trigger" => trigger);
}

/// Counts the outcome of a replaying recovery strategy
pub fn record_recovery(kind: StrategyKind, recovered: bool) {
    let outcome = if recovered { "recovered" } else { "failed" };
    counter!(
        "error_detector.recovery_attempts",
        1,
        "strategy" => kind.to_string(),
        "outcome" => outcome
    );
}

pub fn record_recovery_skipped() {
    counter!("error_detector.recovery_skipped", 1);
}

/// Counts an alert delivery attempt on one channel
pub fn record_alert(channel: &str, delivered: bool) {
    let outcome = if delivered { "delivered" } else { "failed" };
    counter!(
        "error_detector.alerts",
        1,
        "channel" => channel.to_string(),
        "outcome" => outcome
    );
}

pub fn record_tick_failure() {
    counter!("error_detector.scheduler.tick_failures", 1);
}

/// Installs the Prometheus recorder with an HTTP scrape listener on `addr`
pub fn install_prometheus_exporter(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| Error::Initialization(format!("failed to install Prometheus exporter: {}", e)))?;

    info!(addr = %addr, "Prometheus exporter listening");
    Ok(())
}
