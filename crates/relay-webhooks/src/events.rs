//! Webhook event types.

use serde::{Deserialize, Serialize};

/// All supported webhook event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    // Resource events
    ResourceCreated,
    ResourceUpdated,
    ResourceDeleted,

    // Review events
    ReviewCreated,
    ReviewDeleted,

    // User events
    UserRegistered,

    /// Sent by operators to check an endpoint
    WebhookTest,
}

impl WebhookEventType {
    /// Returns all available event types
    pub fn all() -> Vec<Self> {
        vec![
            Self::ResourceCreated,
            Self::ResourceUpdated,
            Self::ResourceDeleted,
            Self::ReviewCreated,
            Self::ReviewDeleted,
            Self::UserRegistered,
            Self::WebhookTest,
        ]
    }

    /// Returns the string representation of the event type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceCreated => "resource.created",
            Self::ResourceUpdated => "resource.updated",
            Self::ResourceDeleted => "resource.deleted",
            Self::ReviewCreated => "review.created",
            Self::ReviewDeleted => "review.deleted",
            Self::UserRegistered => "user.registered",
            Self::WebhookTest => "webhook.test",
        }
    }

    /// Parse event type from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "resource.created" | "resource_created" => Some(Self::ResourceCreated),
            "resource.updated" | "resource_updated" => Some(Self::ResourceUpdated),
            "resource.deleted" | "resource_deleted" => Some(Self::ResourceDeleted),
            "review.created" | "review_created" => Some(Self::ReviewCreated),
            "review.deleted" | "review_deleted" => Some(Self::ReviewDeleted),
            "user.registered" | "user_registered" => Some(Self::UserRegistered),
            "webhook.test" | "webhook_test" => Some(Self::WebhookTest),
            _ => None,
        }
    }
}

impl std::fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
