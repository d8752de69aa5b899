//! # Error Detector
//!
//! Error detection and recovery engine for a client of a remote HTTP API.
//! The client reports each failed call to [`ErrorDetector::track_error`];
//! the engine records it, watches for recurring and rapid error patterns,
//! gates recovery behind a circuit breaker, replays or redirects failed
//! requests according to per-code recovery strategies, and alerts operators.
//!
//! ## Features
//!
//! - Bounded error history with a durable JSONL log replayed on startup
//! - Sliding-window pattern tracking (recurring patterns, rapid bursts)
//! - Process-wide circuit breaker with automatic and manual reset
//! - Retry, exponential backoff, fallback and notify-only recovery
//! - Independent alert channels (webhook, email, custom callbacks)
//! - Periodic scheduler for breaker reset, pattern scans and daily reports
//! - Structured logging and Prometheus metrics
//!

pub mod alerts;
pub mod circuit_breaker;
pub mod config;
pub mod detector;
pub mod event;
pub mod ledger;
pub mod logging;
pub mod monitoring;
pub mod patterns;
pub mod recovery;
pub mod retry;
pub mod sanitization;
pub mod scheduler;
pub mod strategy;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use alerts::{AlertDispatcher, AlertEvent, AlertKind, MailTransport, Notifier};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::DetectorConfig;
pub use detector::{DetectorStats, ErrorDetector, ErrorDetectorBuilder, ErrorSummary, TickReport};
pub use event::{ErrorEvent, PatternKey};
pub use ledger::SearchFilter;
pub use logging::{init_logging, LoggingConfig};
pub use recovery::RecoveryOutcome;
pub use retry::{HttpReplayer, RequestReplayer};
pub use strategy::RecoveryStrategy;
pub use types::{Error, Result};
