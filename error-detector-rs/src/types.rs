//! # Error Types
//!
//! Errors raised by the detector's own infrastructure. Failures reported by the
//! monitored API are data (`ErrorEvent`), never values of this type.

use thiserror::Error;

/// A type alias for Result with the error type defaulting to our Error
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Infrastructure error for the error detector
#[derive(Error, Debug)]
pub enum Error {
    /// Reading or writing the durable log or a config file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON document could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An outbound HTTP call failed before a status code was received
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Layered configuration could not be built
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A configuration value is missing or invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An alert channel refused or failed to deliver
    #[error("Notification error: {0}")]
    Notification(String),

    /// A recovery strategy record cannot be turned into a strategy
    #[error("Invalid recovery strategy: {0}")]
    InvalidStrategy(String),

    /// The engine was asked to do something its lifecycle state forbids
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Logging or metrics setup failed
    #[error("Initialization error: {0}")]
    Initialization(String),
}

impl Error {
    /// Creates a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    /// Creates a notification error
    pub fn notification(message: impl Into<String>) -> Self {
        Error::Notification(message.into())
    }

    /// Returns true if the failure might go away on its own (timeouts,
    /// refused connections, 5xx answers)
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err.status().map_or(false, |s| s.is_server_error())
            }
            Error::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::configuration("missing log file");
        assert_eq!(err.to_string(), "Configuration error: missing log file");

        let err = Error::InvalidStrategy("fallback requires an endpoint".to_string());
        assert!(err.to_string().contains("fallback requires an endpoint"));
    }

    #[test]
    fn test_transient_classification() {
        let io = Error::from(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk"));
        assert!(io.is_transient());

        let io = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(!io.is_transient());

        assert!(!Error::notification("smtp down").is_transient());
    }
}
