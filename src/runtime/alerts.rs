//! Operator alert channel. Recoverable failures are absorbed where they
//! happen and surfaced here instead of propagating.

use crate::runtime::telemetry::Telemetry;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Warning,
    Error,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Warning => f.write_str("warning"),
            AlertSeverity::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub severity: AlertSeverity,
    /// Component or worker that raised the alert, e.g. `event 5/per-event`.
    pub source: String,
    pub message: String,
}

pub trait AlertSink: Send + Sync {
    fn send(&self, alert: Alert);
}

/// Sink that only writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn send(&self, alert: Alert) {
        match alert.severity {
            AlertSeverity::Warning => {
                tracing::warn!(target: "matchday::alert", source = %alert.source, "{}", alert.message)
            }
            AlertSeverity::Error => {
                tracing::error!(target: "matchday::alert", source = %alert.source, "{}", alert.message)
            }
        }
    }
}

/// Counts alerts before forwarding them to the configured sink.
#[derive(Clone)]
pub struct Alerter {
    sink: Arc<dyn AlertSink>,
    telemetry: Arc<Telemetry>,
}

impl Alerter {
    pub fn new(sink: Arc<dyn AlertSink>, telemetry: Arc<Telemetry>) -> Self {
        Self { sink, telemetry }
    }

    pub fn error(&self, source: impl fmt::Display, message: impl Into<String>) {
        self.raise(AlertSeverity::Error, source, message);
    }

    pub fn warning(&self, source: impl fmt::Display, message: impl Into<String>) {
        self.raise(AlertSeverity::Warning, source, message);
    }

    fn raise(&self, severity: AlertSeverity, source: impl fmt::Display, message: impl Into<String>) {
        self.telemetry.record_alert();
        self.sink.send(Alert {
            severity,
            source: source.to_string(),
            message: message.into(),
        });
    }
}
