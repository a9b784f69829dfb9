//! Operator alerts derived from decisions and breaker transitions.

use crate::data::{Action, Decision, Urgency};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl From<Urgency> for Severity {
    fn from(urgency: Urgency) -> Self {
        match urgency {
            Urgency::Immediate => Self::Critical,
            Urgency::High => Self::Warning,
            Urgency::Normal | Urgency::Low => Self::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    PositionClose,
    PositionRoll,
    PositionReduce,
    HedgeRequired,
    CircuitBreaker,
    EntryRejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub position_id: Option<String>,
    pub symbol: Option<String>,
    pub rule: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// Alert for an actionable decision. Hold produces nothing.
    pub fn from_decision(position_id: &str, symbol: &str, decision: &Decision) -> Option<Self> {
        let alert_type = match decision.action {
            Action::Hold => return None,
            Action::Close => AlertType::PositionClose,
            Action::Roll => AlertType::PositionRoll,
            Action::Reduce => AlertType::PositionReduce,
            Action::Hedge => AlertType::HedgeRequired,
        };

        Some(Self {
            alert_type,
            severity: decision.urgency.into(),
            message: format!("{} {}: {}", decision.action, position_id, decision.reason),
            position_id: Some(position_id.to_string()),
            symbol: Some(symbol.to_string()),
            rule: Some(decision.rule.clone()),
            timestamp: Utc::now(),
        })
    }

    pub fn circuit_opened(failures: usize, window_secs: u64) -> Self {
        Self::system(
            AlertType::CircuitBreaker,
            Severity::Critical,
            format!(
                "Circuit breaker opened after {} failures in {}s, trading halted",
                failures, window_secs
            ),
        )
    }

    pub fn entry_rejected(symbol: &str, reason: &str) -> Self {
        Self {
            symbol: Some(symbol.to_string()),
            ..Self::system(
                AlertType::EntryRejected,
                Severity::Warning,
                format!("Entry on {} rejected: {}", symbol, reason),
            )
        }
    }

    fn system(alert_type: AlertType, severity: Severity, message: String) -> Self {
        Self {
            alert_type,
            severity,
            message,
            position_id: None,
            symbol: None,
            rule: None,
            timestamp: Utc::now(),
        }
    }
}

/// Destination for alerts. Delivery must not block the evaluation cycle.
pub trait AlertSink: Send + Sync {
    fn send(&self, alert: &Alert);
}

/// Writes alerts to the tracing log at a level matching severity
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn send(&self, alert: &Alert) {
        let position_id = alert.position_id.as_deref().unwrap_or("-");
        match alert.severity {
            Severity::Critical => error!(
                alert = ?alert.alert_type,
                position_id,
                "🚨 {}",
                alert.message
            ),
            Severity::Warning => warn!(alert = ?alert.alert_type, position_id, "{}", alert.message),
            Severity::Info => info!(alert = ?alert.alert_type, position_id, "{}", alert.message),
        }
    }
}

/// Forwards alerts to an async consumer (notifier, dashboard feed)
pub struct ChannelAlertSink {
    tx: mpsc::Sender<Alert>,
}

impl ChannelAlertSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelAlertSink {
    fn send(&self, alert: &Alert) {
        if let Err(e) = self.tx.try_send(alert.clone()) {
            warn!(alert = ?alert.alert_type, error = %e, "Alert dropped");
        }
    }
}

/// In-process buffer, drained by the caller
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    pub fn drain(&self) -> Vec<Alert> {
        std::mem::take(&mut *self.alerts.lock())
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.lock().is_empty()
    }
}

impl AlertSink for MemoryAlertSink {
    fn send(&self, alert: &Alert) {
        self.alerts.lock().push(alert.clone());
    }
}

impl<T: AlertSink + ?Sized> AlertSink for std::sync::Arc<T> {
    fn send(&self, alert: &Alert) {
        (**self).send(alert)
    }
}
