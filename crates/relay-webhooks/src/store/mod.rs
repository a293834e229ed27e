//! Storage contracts used by the delivery pipeline, and their sea-orm
//! implementations.

mod dead_letters;
mod deliveries;
mod queue;
mod webhooks;

pub use dead_letters::SeaOrmDeadLetterStore;
pub use deliveries::SeaOrmDeliveryStore;
pub use queue::SeaOrmQueueStore;
pub use webhooks::{CreateWebhookRequest, SeaOrmWebhookRegistry, UpdateWebhookRequest};

use crate::error::WebhookError;
use crate::events::WebhookEventType;
use crate::models::{DeadLetterItem, Delivery, DeliveryCompletion, NewDelivery, QueueItem, Webhook};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Read access to registered webhooks.
#[async_trait]
pub trait WebhookRegistry: Send + Sync {
    async fn get_webhook_by_id(&self, id: i32) -> Result<Option<Webhook>, WebhookError>;

    /// Active webhooks subscribed to `event`.
    async fn get_webhooks_by_event(
        &self,
        event: WebhookEventType,
    ) -> Result<Vec<Webhook>, WebhookError>;
}

/// Durable queue of pending deliveries.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert an item. Enqueueing an id that already exists is a no-op.
    async fn enqueue(&self, item: &QueueItem) -> Result<(), WebhookError>;

    /// Claim the next due item for `worker_id`. Concurrent callers never
    /// receive the same item.
    async fn dequeue_atomic(&self, worker_id: &str) -> Result<Option<QueueItem>, WebhookError>;

    /// Drop the claim on an item so it can be picked up again.
    async fn release(&self, id: &str) -> Result<(), WebhookError>;

    /// Free claims held longer than `max_age`. Returns how many were freed.
    async fn release_stale_claims(&self, max_age: Duration) -> Result<u64, WebhookError>;

    /// Remove an item. Removing twice is a no-op.
    async fn remove(&self, id: &str) -> Result<(), WebhookError>;

    /// Live items ordered by priority, then schedule.
    async fn list(&self) -> Result<Vec<QueueItem>, WebhookError>;
}

/// Durable store for exhausted items.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn add(&self, item: &DeadLetterItem) -> Result<(), WebhookError>;

    /// Returns false when nothing was removed.
    async fn remove(&self, id: &str) -> Result<bool, WebhookError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<DeadLetterItem>, WebhookError>;

    /// Newest first, optionally limited to one webhook.
    async fn list(&self, webhook_id: Option<i32>) -> Result<Vec<DeadLetterItem>, WebhookError>;

    async fn count(&self) -> Result<u64, WebhookError>;

    async fn count_since(&self, since: DateTime<Utc>) -> Result<u64, WebhookError>;

    /// Entry counts per webhook, optionally only entries created since `since`.
    async fn count_by_webhook(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<HashMap<i32, u64>, WebhookError>;

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, WebhookError>;
}

/// Delivery audit trail.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Open a pending record for an attempt.
    async fn create(&self, delivery: NewDelivery) -> Result<Delivery, WebhookError>;

    /// Record the outcome of a pending attempt.
    async fn complete(
        &self,
        id: i32,
        completion: DeliveryCompletion,
    ) -> Result<Delivery, WebhookError>;

    async fn find_successful_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Delivery>, WebhookError>;

    /// Mark attempts left `pending` for `idempotency_key` as failed.
    async fn fail_pending(
        &self,
        webhook_id: i32,
        idempotency_key: &str,
        error_message: &str,
    ) -> Result<u64, WebhookError>;

    /// Most recent failed attempts of a webhook in chronological order.
    async fn list_failed(
        &self,
        webhook_id: i32,
        idempotency_key: Option<&str>,
        limit: u64,
    ) -> Result<Vec<Delivery>, WebhookError>;
}
