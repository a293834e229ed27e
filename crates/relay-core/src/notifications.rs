//! Operational alerting contract.
//!
//! The delivery subsystem raises alerts (dead-letter growth, failed
//! dead-letter writes) through an [`AlertSink`]. Sinks are fire-and-forget
//! from the caller's point of view: a failing sink is logged and never
//! allowed to affect delivery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    DeadLetterAdded,
    DeadLetterThresholdExceeded,
    WebhookThresholdExceeded,
    DeadLetterWriteFailed,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeadLetterAdded => "dead_letter.added",
            Self::DeadLetterThresholdExceeded => "dead_letter.threshold_exceeded",
            Self::WebhookThresholdExceeded => "dead_letter.webhook_threshold_exceeded",
            Self::DeadLetterWriteFailed => "dead_letter.write_failed",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub alert_type: AlertType,
    /// Snapshot of the item the alert is about, if any
    pub item: Option<serde_json::Value>,
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn new(alert_type: AlertType) -> Self {
        Self {
            alert_type,
            item: None,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_item(mut self, item: serde_json::Value) -> Self {
        self.item = Some(item);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, alert: AlertEvent) -> Result<(), NotificationError>;
}

/// Default sink: writes alerts to the tracing pipeline.
#[derive(Debug, Default, Clone)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, alert: AlertEvent) -> Result<(), NotificationError> {
        match alert.alert_type {
            AlertType::DeadLetterAdded => {
                info!(alert = %alert.alert_type, metadata = ?alert.metadata, "Alert raised")
            }
            AlertType::DeadLetterThresholdExceeded | AlertType::WebhookThresholdExceeded => {
                warn!(alert = %alert.alert_type, metadata = ?alert.metadata, "Alert raised")
            }
            AlertType::DeadLetterWriteFailed => {
                error!(alert = %alert.alert_type, metadata = ?alert.metadata, "Alert raised")
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Failed to send notification: {0}")]
    SendError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

pub type DynAlertSink = Arc<dyn AlertSink>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_event_builder() {
        let alert = AlertEvent::new(AlertType::WebhookThresholdExceeded)
            .with_item(serde_json::json!({"id": "abc"}))
            .with_metadata("webhook_id", 42)
            .with_metadata("count", 11);

        assert_eq!(alert.alert_type, AlertType::WebhookThresholdExceeded);
        assert_eq!(alert.metadata.get("webhook_id").unwrap(), "42");
        assert_eq!(alert.item.unwrap()["id"], "abc");
    }

    #[test]
    fn test_alert_type_serialization() {
        let json = serde_json::to_string(&AlertType::DeadLetterWriteFailed).unwrap();
        assert_eq!(json, "\"dead_letter_write_failed\"");
        assert_eq!(AlertType::DeadLetterAdded.to_string(), "dead_letter.added");
    }

    #[tokio::test]
    async fn test_log_sink_never_fails() {
        let sink = LogAlertSink;
        let result = sink.notify(AlertEvent::new(AlertType::DeadLetterAdded)).await;
        assert!(result.is_ok());
    }
}
