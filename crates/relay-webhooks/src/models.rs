//! Domain records moved between the stores, the queue and the delivery path.

use crate::error::WebhookError;
use crate::events::WebhookEventType;
use chrono::{DateTime, Utc};
use relay_entities::{webhook_dead_letters, webhook_deliveries, webhook_queue_items, webhooks};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn parse_event(raw: &str) -> Result<WebhookEventType, WebhookError> {
    WebhookEventType::from_str(raw)
        .ok_or_else(|| WebhookError::InvalidConfiguration(format!("unknown event type '{}'", raw)))
}

/// A registered endpoint. `secret` holds ciphertext until signing time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: i32,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub active: bool,
    pub events: Vec<WebhookEventType>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Webhook {
    pub fn subscribes_to(&self, event: WebhookEventType) -> bool {
        self.events.contains(&event)
    }
}

impl TryFrom<webhooks::Model> for Webhook {
    type Error = WebhookError;

    fn try_from(model: webhooks::Model) -> Result<Self, Self::Error> {
        let events: Vec<WebhookEventType> = serde_json::from_str(&model.events)?;
        Ok(Self {
            id: model.id,
            url: model.url,
            secret: model.secret,
            active: model.active,
            events,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

/// Body sent to the endpoint. The signature covers every other field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: WebhookEventType,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl WebhookPayload {
    pub fn new(event: WebhookEventType, data: Value) -> Self {
        Self {
            event,
            data,
            timestamp: Utc::now(),
            idempotency_key: None,
            signature: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// A pending delivery in the durable queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub webhook_id: i32,
    pub event: WebhookEventType,
    pub payload: WebhookPayload,
    /// Lower values are claimed first
    pub priority: i32,
    pub retry_count: u32,
    /// Total attempts allowed before the item is dead-lettered
    pub max_retries: u32,
    pub scheduled_for: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    /// New item due immediately.
    pub fn new(webhook_id: i32, payload: WebhookPayload, max_retries: u32, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            webhook_id,
            event: payload.event,
            payload,
            priority,
            retry_count: 0,
            max_retries,
            scheduled_for: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for <= now
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Copy of this item under a fresh id, due at `scheduled_for`.
    pub fn rescheduled(&self, retry_count: u32, scheduled_for: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            retry_count,
            scheduled_for,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

impl TryFrom<webhook_queue_items::Model> for QueueItem {
    type Error = WebhookError;

    fn try_from(model: webhook_queue_items::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            event: parse_event(&model.event)?,
            payload: serde_json::from_str(&model.payload)?,
            id: model.id,
            webhook_id: model.webhook_id,
            priority: model.priority,
            retry_count: u32::try_from(model.retry_count).unwrap_or(0),
            max_retries: u32::try_from(model.max_retries).unwrap_or(0),
            scheduled_for: model.scheduled_for,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Audit record of one outbound attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: i32,
    pub webhook_id: i32,
    pub event: WebhookEventType,
    /// Exact JSON body that was sent
    pub payload: Value,
    pub status: DeliveryStatus,
    pub status_code: Option<u16>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub attempt_count: u32,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl TryFrom<webhook_deliveries::Model> for Delivery {
    type Error = WebhookError;

    fn try_from(model: webhook_deliveries::Model) -> Result<Self, Self::Error> {
        let status = DeliveryStatus::parse(&model.status).ok_or_else(|| {
            WebhookError::InvalidConfiguration(format!("unknown delivery status '{}'", model.status))
        })?;

        Ok(Self {
            event: parse_event(&model.event)?,
            payload: serde_json::from_str(&model.payload)?,
            status,
            id: model.id,
            webhook_id: model.webhook_id,
            status_code: model.status_code.and_then(|c| u16::try_from(c).ok()),
            response_body: model.response_body,
            error_message: model.error_message,
            attempt_count: u32::try_from(model.attempt_count).unwrap_or(1),
            idempotency_key: model.idempotency_key,
            created_at: model.created_at,
            delivered_at: model.delivered_at,
        })
    }
}

/// Fields needed to open a pending delivery record.
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub webhook_id: i32,
    pub event: WebhookEventType,
    pub payload: Value,
    pub attempt_count: u32,
    pub idempotency_key: Option<String>,
}

/// Final outcome written onto a pending delivery record.
#[derive(Debug, Clone)]
pub struct DeliveryCompletion {
    pub status: DeliveryStatus,
    pub status_code: u16,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
}

/// An item that exhausted its retries, kept for inspection and replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterItem {
    pub id: String,
    pub webhook_id: i32,
    pub event: WebhookEventType,
    pub payload: WebhookPayload,
    pub failure_reason: String,
    pub last_attempt_at: DateTime<Utc>,
    pub delivery_attempts: Vec<Delivery>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<webhook_dead_letters::Model> for DeadLetterItem {
    type Error = WebhookError;

    fn try_from(model: webhook_dead_letters::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            event: parse_event(&model.event)?,
            payload: serde_json::from_str(&model.payload)?,
            delivery_attempts: serde_json::from_str(&model.delivery_attempts)?,
            id: model.id,
            webhook_id: model.webhook_id,
            failure_reason: model.failure_reason,
            last_attempt_at: model.last_attempt_at,
            created_at: model.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_omits_empty_optional_fields() {
        let payload = WebhookPayload::new(WebhookEventType::ResourceCreated, json!({"id": 1}));
        let value = serde_json::to_value(&payload).unwrap();

        assert!(value.get("signature").is_none());
        assert!(value.get("idempotency_key").is_none());
        assert_eq!(value["event"], "resource_created");
    }

    #[test]
    fn test_queue_item_reschedule_keeps_payload() {
        let payload = WebhookPayload::new(WebhookEventType::ReviewCreated, json!({}))
            .with_idempotency_key("key-1");
        let item = QueueItem::new(7, payload, 3, 0);
        let later = item.scheduled_for + chrono::Duration::seconds(5);

        let next = item.rescheduled(1, later);

        assert_ne!(next.id, item.id);
        assert_eq!(next.retry_count, 1);
        assert_eq!(next.payload, item.payload);
        assert!(!next.is_due(item.scheduled_for));
        assert!(next.is_due(later));
    }

    #[test]
    fn test_retries_exhausted() {
        let payload = WebhookPayload::new(WebhookEventType::WebhookTest, json!(null));
        let mut item = QueueItem::new(1, payload, 2, 0);
        assert!(!item.retries_exhausted());
        item.retry_count = 2;
        assert!(item.retries_exhausted());
    }

    #[test]
    fn test_webhook_from_model() {
        let now = Utc::now();
        let model = webhooks::Model {
            id: 3,
            url: "https://example.com/hook".to_string(),
            secret: "ciphertext".to_string(),
            active: true,
            events: r#"["resource_created","review_deleted"]"#.to_string(),
            created_at: now,
            updated_at: now,
        };

        let webhook = Webhook::try_from(model).unwrap();
        assert!(webhook.subscribes_to(WebhookEventType::ReviewDeleted));
        assert!(!webhook.subscribes_to(WebhookEventType::UserRegistered));
    }
}
