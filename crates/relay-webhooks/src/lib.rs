//! # relay-webhooks
//!
//! Reliable webhook delivery.
//!
//! This crate provides:
//! - HMAC-SHA256 payload signing and verification
//! - Exponential backoff with jitter and typed retryability rules
//! - Per-endpoint circuit breakers held in a bounded registry
//! - A durable, priority-ordered delivery queue with atomic claims
//! - A dead letter queue with threshold alerts and replay
//! - `QueueSystem`, which drives synchronous and queued delivery

pub mod circuit_breaker;
pub mod dead_letter;
pub mod delivery;
mod error;
mod events;
pub mod models;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod signer;
pub mod store;
mod system;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStatus,
    CircuitState,
};
pub use dead_letter::{BulkReplayResult, DeadLetterConfig, DeadLetterManager, DeadLetterMetrics};
pub use delivery::{DeliveryConfig, DeliveryOutcome, DeliveryService};
pub use error::{DeliveryFailure, NetworkErrorKind, WebhookError};
pub use events::WebhookEventType;
pub use models::{DeadLetterItem, Delivery, DeliveryStatus, QueueItem, Webhook, WebhookPayload};
pub use queue::{ProcessOutcome, QueueConfig, QueueItemHandler, QueueManager};
pub use retry::{
    classify, compute_delay, is_retryable, retry_with_result, FailureClass, RetryPolicy,
    RetryResult, RetryableReason,
};
pub use store::{
    CreateWebhookRequest, DeadLetterStore, DeliveryStore, QueueStore, SeaOrmDeadLetterStore,
    SeaOrmDeliveryStore, SeaOrmQueueStore, SeaOrmWebhookRegistry, UpdateWebhookRequest,
    WebhookRegistry,
};
pub use system::{
    DeliveryOptions, DeliveryReport, EventDeliveryReport, QueueItemProcessor, QueueSystem,
    QueueSystemConfig, QueueSystemDeps,
};
