//! # Alert Dispatch
//!
//! Alerts raised by the detector and the channels they are delivered on.
//!
//! Every channel is a `Notifier`. The `AlertDispatcher` fans an alert out to
//! all registered notifiers concurrently; a failing channel is logged and
//! counted but never affects the others or the caller.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::monitoring;
use crate::sanitization::{sanitize_text, sanitize_value};
use crate::types::{Error, Result};

/// Channel name of the email notifier
pub const EMAIL_CHANNEL: &str = "email";

/// Channel name of the webhook notifier
pub const WEBHOOK_CHANNEL: &str = "webhook";

/// Default timeout for webhook deliveries
pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// What an alert is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertKind {
    RecurringPattern,
    RapidSequence,
    CircuitBreakerOpened,
    DailyReport,
    /// Raised by the notify-only strategy for an error code
    ErrorCode(String),
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::RecurringPattern => write!(f, "Recurring Error Pattern"),
            AlertKind::RapidSequence => write!(f, "Rapid Error Sequence"),
            AlertKind::CircuitBreakerOpened => write!(f, "Circuit Breaker Opened"),
            AlertKind::DailyReport => write!(f, "Daily Error Report"),
            AlertKind::ErrorCode(code) => write!(f, "Error {}", code),
        }
    }
}

/// A single alert, produced and dispatched immediately
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub message: String,
    pub details: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn new(kind: AlertKind, message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            timestamp,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Copy with credentials scrubbed from the message and details
    pub fn sanitized(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            message: sanitize_text(&self.message),
            details: self.details.as_ref().map(sanitize_value),
            timestamp: self.timestamp,
        }
    }
}

/// A delivery channel for alerts
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name used in logs and metrics
    fn name(&self) -> &str;

    /// Delivers one alert
    async fn notify(&self, alert: &AlertEvent) -> Result<()>;
}

/// Posts alerts as JSON to a webhook URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    service: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, service: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Initialization(format!("failed to build webhook client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            service: service.into(),
        })
    }

    /// The JSON body sent for an alert
    pub fn payload(&self, alert: &AlertEvent) -> Value {
        let mut payload = json!({
            "type": alert.kind.to_string(),
            "message": alert.message,
            "timestamp": alert.timestamp.to_rfc3339(),
            "service": self.service,
        });

        if let (Some(details), Some(body)) = (&alert.details, payload.as_object_mut()) {
            body.insert("details".to_string(), details.clone());
        }

        payload
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        WEBHOOK_CHANNEL
    }

    async fn notify(&self, alert: &AlertEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&self.payload(alert))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::notification(format!(
                "webhook returned non-success status: {}",
                status.as_u16()
            )));
        }

        debug!(url = %self.url, status = status.as_u16(), "Alert webhook notification sent");
        Ok(())
    }
}

/// SMTP settings read from the environment
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            port: 587,
            user: None,
            password: None,
        }
    }
}

impl SmtpSettings {
    /// Reads `SMTP_HOST`, `SMTP_PORT`, `SMTP_USER` and `SMTP_PASS`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let port = match lookup("SMTP_PORT") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(value = %raw, "Invalid SMTP_PORT, using default");
                defaults.port
            }),
            None => defaults.port,
        };

        Self {
            host: lookup("SMTP_HOST").unwrap_or(defaults.host),
            port,
            user: lookup("SMTP_USER").filter(|v| !v.is_empty()),
            password: lookup("SMTP_PASS").filter(|v| !v.is_empty()),
        }
    }

    /// User and password, when both are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Some((user.as_str(), password.as_str())),
            _ => None,
        }
    }
}

/// A plain-text email ready to hand to a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Sends email through an SMTP server
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, settings: &SmtpSettings, message: &EmailMessage) -> Result<()>;
}

/// Emails alerts to a single recipient through a `MailTransport`
#[derive(Clone)]
pub struct EmailNotifier {
    recipient: String,
    service: String,
    settings: SmtpSettings,
    transport: Arc<dyn MailTransport>,
}

impl fmt::Debug for EmailNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailNotifier")
            .field("recipient", &self.recipient)
            .field("service", &self.service)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl EmailNotifier {
    pub fn new(
        recipient: impl Into<String>,
        service: impl Into<String>,
        settings: SmtpSettings,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            service: service.into(),
            settings,
            transport,
        }
    }

    /// The message sent for an alert, or an error when no SMTP credentials
    /// are configured
    pub fn message(&self, alert: &AlertEvent) -> Result<EmailMessage> {
        let (user, _) = self.settings.credentials().ok_or_else(|| {
            Error::notification("SMTP credentials not configured, cannot send email alert")
        })?;

        Ok(EmailMessage {
            from: user.to_string(),
            to: self.recipient.clone(),
            subject: format!("{} Alert: {}", self.service, alert.kind),
            body: alert.message.clone(),
        })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &str {
        EMAIL_CHANNEL
    }

    async fn notify(&self, alert: &AlertEvent) -> Result<()> {
        let message = self.message(alert)?;
        self.transport.send(&self.settings, &message).await?;
        info!(recipient = %self.recipient, "Alert email sent");
        Ok(())
    }
}

type AlertHandler = dyn Fn(&AlertEvent) + Send + Sync;

/// Hands alerts to an in-process callback
#[derive(Clone)]
pub struct CallbackNotifier {
    name: String,
    handler: Arc<AlertHandler>,
}

impl CallbackNotifier {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&AlertEvent) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
        }
    }
}

impl fmt::Debug for CallbackNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackNotifier").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Notifier for CallbackNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, alert: &AlertEvent) -> Result<()> {
        (self.handler)(alert);
        Ok(())
    }
}

/// Per-channel results of one dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub failed: usize,
}

/// Fans alerts out to every registered notifier
#[derive(Default)]
pub struct AlertDispatcher {
    notifiers: RwLock<Vec<Arc<dyn Notifier>>>,
}

impl fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("channels", &self.channel_names())
            .finish()
    }
}

impl AlertDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a notifier next to the existing ones
    pub fn add(&self, notifier: Arc<dyn Notifier>) {
        info!(channel = %notifier.name(), "Alert channel added");
        self.notifiers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notifier);
    }

    /// Removes every notifier registered under `name`; returns how many
    pub fn remove(&self, name: &str) -> usize {
        let mut notifiers = self.notifiers.write().unwrap_or_else(PoisonError::into_inner);
        let before = notifiers.len();
        notifiers.retain(|notifier| notifier.name() != name);
        before - notifiers.len()
    }

    /// Replaces the notifiers registered under `name` with `notifier`, or
    /// just removes them when `None`
    pub fn replace(&self, name: &str, notifier: Option<Arc<dyn Notifier>>) {
        let mut notifiers = self.notifiers.write().unwrap_or_else(PoisonError::into_inner);
        notifiers.retain(|existing| existing.name() != name);
        if let Some(notifier) = notifier {
            notifiers.push(notifier);
        }
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.notifiers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|notifier| notifier.name().to_string())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Delivers a sanitized copy of `alert` on every channel. Failures are
    /// logged and counted, never returned.
    pub async fn send(&self, alert: &AlertEvent) -> DispatchSummary {
        let notifiers: Vec<Arc<dyn Notifier>> = self
            .notifiers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if notifiers.is_empty() {
            debug!(alert_type = %alert.kind, "No alert channels configured");
            return DispatchSummary::default();
        }

        let alert = alert.sanitized();
        let deliveries = notifiers.iter().map(|notifier| {
            let alert = &alert;
            async move { (notifier.name().to_string(), notifier.notify(alert).await) }
        });

        let mut summary = DispatchSummary::default();
        for (channel, result) in join_all(deliveries).await {
            match result {
                Ok(()) => {
                    summary.delivered += 1;
                    monitoring::record_alert(&channel, true);
                }
                Err(e) => {
                    summary.failed += 1;
                    monitoring::record_alert(&channel, false);
                    error!(
                        channel = %channel,
                        alert_type = %alert.kind,
                        error = %e,
                        "Failed to deliver alert"
                    );
                }
            }
        }

        info!(
            alert_type = %alert.kind,
            delivered = summary.delivered,
            failed = summary.failed,
            "Alert dispatched"
        );
        summary
    }
}
