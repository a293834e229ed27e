//! Orchestrator wiring breaker, retry, delivery, queue and dead letters
//! into synchronous and queued delivery.

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::dead_letter::{BulkReplayResult, DeadLetterConfig, DeadLetterManager};
use crate::delivery::{DeliveryConfig, DeliveryService};
use crate::error::WebhookError;
use crate::events::WebhookEventType;
use crate::models::{Delivery, QueueItem, Webhook, WebhookPayload};
use crate::queue::{QueueConfig, QueueItemHandler, QueueManager};
use crate::registry::BoundedMap;
use crate::retry::{classify, retry_with_result, RetryPolicy, RetryResult};
use crate::store::{
    DeadLetterStore, DeliveryStore, QueueStore, SeaOrmDeadLetterStore, SeaOrmDeliveryStore,
    SeaOrmQueueStore, SeaOrmWebhookRegistry, WebhookRegistry,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use relay_core::{DynAlertSink, EncryptionService};
use sea_orm::DatabaseConnection;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Component configuration for a `QueueSystem`.
#[derive(Debug, Clone, Default)]
pub struct QueueSystemConfig {
    pub retry_policy: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    pub delivery: DeliveryConfig,
    pub queue: QueueConfig,
    pub dead_letter: DeadLetterConfig,
}

/// Stores and sinks a `QueueSystem` talks to.
#[derive(Clone)]
pub struct QueueSystemDeps {
    pub webhooks: Arc<dyn WebhookRegistry>,
    pub queue: Arc<dyn QueueStore>,
    pub dead_letters: Arc<dyn DeadLetterStore>,
    pub deliveries: Arc<dyn DeliveryStore>,
    pub encryption_service: Arc<EncryptionService>,
    pub alerts: Option<DynAlertSink>,
}

impl QueueSystemDeps {
    /// All stores on one sea-orm connection.
    pub fn sea_orm(
        db: Arc<DatabaseConnection>,
        encryption_service: Arc<EncryptionService>,
    ) -> Self {
        Self {
            webhooks: Arc::new(SeaOrmWebhookRegistry::new(
                db.clone(),
                encryption_service.clone(),
            )),
            queue: Arc::new(SeaOrmQueueStore::new(db.clone())),
            dead_letters: Arc::new(SeaOrmDeadLetterStore::new(db.clone())),
            deliveries: Arc::new(SeaOrmDeliveryStore::new(db)),
            encryption_service,
            alerts: None,
        }
    }

    pub fn with_alerts(mut self, sink: DynAlertSink) -> Self {
        self.alerts = Some(sink);
        self
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    /// Total attempts
    pub max_retries: u32,
    /// Lower is claimed first
    pub priority: i32,
    /// Queue the delivery instead of sending it now
    pub asynchronous: bool,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            priority: 0,
            asynchronous: false,
        }
    }
}

impl DeliveryOptions {
    pub fn queued() -> Self {
        Self {
            asynchronous: true,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone)]
pub enum DeliveryReport {
    /// Sent synchronously
    Delivered { delivery: Delivery, attempts: u32 },
    /// Accepted into the durable queue
    Queued { item_id: String },
}

/// Per-webhook result of an event fan-out.
#[derive(Debug)]
pub struct EventDeliveryReport {
    pub webhook_id: i32,
    pub result: Result<DeliveryReport, WebhookError>,
}

/// Bounded webhook id to breaker key map.
struct BreakerKeys {
    keys: Mutex<BoundedMap<i32, String>>,
}

impl BreakerKeys {
    fn new(capacity: usize) -> Self {
        Self {
            keys: Mutex::new(BoundedMap::new(capacity)),
        }
    }

    fn key_for(&self, webhook: &Webhook) -> String {
        let key = CircuitBreakerRegistry::key_for(webhook.id, &webhook.url);
        let mut keys = self.keys.lock().unwrap_or_else(|p| p.into_inner());
        if keys.get(&webhook.id) != Some(&key) {
            keys.insert(webhook.id, key.clone());
        }
        key
    }
}

/// The breaker-guarded delivery path shared by both modes, and the
/// handler for claimed queue items.
pub struct QueueItemProcessor {
    webhooks: Arc<dyn WebhookRegistry>,
    queue: Arc<QueueManager>,
    delivery: Arc<DeliveryService>,
    deliveries: Arc<dyn DeliveryStore>,
    dead_letters: Arc<DeadLetterManager>,
    breakers: Arc<CircuitBreakerRegistry>,
    breaker_keys: BreakerKeys,
    retry_policy: RetryPolicy,
}

impl QueueItemProcessor {
    async fn guarded_attempt(
        &self,
        webhook: &Webhook,
        payload: &WebhookPayload,
        attempt: u32,
    ) -> Result<Delivery, WebhookError> {
        let key = self.breaker_keys.key_for(webhook);
        let breaker = self.breakers.get(&key);
        breaker
            .execute(|| async {
                self.delivery
                    .deliver_attempt(webhook, payload, attempt)
                    .await?
                    .into_result()
            })
            .await
    }

    /// The item's webhook if it can still receive deliveries. Otherwise
    /// the item is discarded.
    async fn live_webhook(&self, item: &QueueItem) -> Result<Option<Webhook>, WebhookError> {
        match self.webhooks.get_webhook_by_id(item.webhook_id).await? {
            Some(webhook) if webhook.active => Ok(Some(webhook)),
            Some(_) => {
                info!(item_id = %item.id, webhook_id = item.webhook_id, "Webhook inactive, discarding item");
                self.queue.remove(&item.id).await?;
                Ok(None)
            }
            None => {
                info!(item_id = %item.id, webhook_id = item.webhook_id, "Webhook not found, discarding item");
                self.queue.remove(&item.id).await?;
                Ok(None)
            }
        }
    }

    fn at(delay: Duration) -> chrono::DateTime<Utc> {
        Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// Enqueue `next` then drop `item`. A crash in between leaves a
    /// duplicate rather than losing the delivery.
    async fn replace(&self, item: &QueueItem, next: QueueItem) -> Result<(), WebhookError> {
        self.queue.enqueue(&next).await?;
        self.queue.remove(&item.id).await
    }

    async fn handle_failure(
        &self,
        item: QueueItem,
        webhook: &Webhook,
        failure: WebhookError,
    ) -> Result<(), WebhookError> {
        let retry_count = item.retry_count + 1;
        let retryable = self.retry_policy.should_retry(&failure);

        if !retryable || retry_count >= item.max_retries {
            let mut exhausted = item.clone();
            exhausted.retry_count = retry_count;
            // On failure the item stays claimed and is recovered as stale
            self.dead_letters
                .add_to_dead_letter(&exhausted, webhook, &failure)
                .await?;
            return self.queue.remove(&item.id).await;
        }

        let delay = self.retry_policy.delay_for(item.retry_count);
        let next = item.rescheduled(retry_count, Self::at(delay));
        debug!(
            item_id = %item.id,
            next_item_id = %next.id,
            webhook_id = webhook.id,
            retry_count,
            delay_ms = delay.as_millis() as u64,
            "Scheduling webhook retry"
        );
        self.replace(&item, next).await
    }
}

#[async_trait]
impl QueueItemHandler for QueueItemProcessor {
    async fn handle(&self, item: QueueItem) -> Result<(), WebhookError> {
        let Some(webhook) = self.live_webhook(&item).await? else {
            return Ok(());
        };

        let attempt = item.retry_count + 1;
        match self.guarded_attempt(&webhook, &item.payload, attempt).await {
            Ok(delivery) => {
                debug!(item_id = %item.id, delivery_id = delivery.id, "Queue item delivered");
                self.queue.remove(&item.id).await
            }
            Err(e) if e.is_circuit_open() => {
                let delay = self.retry_policy.delay_for(item.retry_count);
                let next = item.rescheduled(item.retry_count, Self::at(delay));
                debug!(item_id = %item.id, webhook_id = webhook.id, "Circuit open, rescheduling item");
                self.replace(&item, next).await
            }
            Err(WebhookError::Database(e)) => {
                error!(item_id = %item.id, webhook_id = webhook.id, error = %e, "Store failure during delivery, releasing item");
                self.queue.store().release(&item.id).await?;
                Err(WebhookError::Database(e))
            }
            Err(e) => self.handle_failure(item, &webhook, e).await,
        }
    }

    /// A timed out attempt is a server-class failure: it consumes an
    /// attempt and counts against the endpoint's breaker.
    async fn handle_timeout(&self, item: QueueItem, timeout: Duration) -> Result<(), WebhookError> {
        let Some(webhook) = self.live_webhook(&item).await? else {
            return Ok(());
        };

        let failure = WebhookError::Timeout(timeout);
        if let Some(key) = item.payload.idempotency_key.as_deref() {
            // The attempt may have landed before the cut-off
            if self
                .deliveries
                .find_successful_by_idempotency_key(key)
                .await?
                .is_some()
            {
                debug!(item_id = %item.id, "Timed out item was already delivered");
                return self.queue.remove(&item.id).await;
            }
            self.deliveries
                .fail_pending(webhook.id, key, &failure.to_string())
                .await?;
        }

        self.breakers
            .get(&self.breaker_keys.key_for(&webhook))
            .record_failure(&failure);
        self.handle_failure(item, &webhook, failure).await
    }
}

/// Entry point for delivering webhooks.
pub struct QueueSystem {
    webhooks: Arc<dyn WebhookRegistry>,
    queue: Arc<QueueManager>,
    dead_letters: Arc<DeadLetterManager>,
    breakers: Arc<CircuitBreakerRegistry>,
    processor: Arc<QueueItemProcessor>,
}

impl QueueSystem {
    pub fn new(deps: QueueSystemDeps, config: QueueSystemConfig) -> Result<Self, WebhookError> {
        let delivery = Arc::new(DeliveryService::new(
            deps.deliveries.clone(),
            deps.encryption_service.clone(),
            config.delivery.clone(),
        )?);

        let queue = Arc::new(QueueManager::new(deps.queue.clone(), config.queue.clone()));

        let mut dead_letters = DeadLetterManager::new(
            deps.dead_letters.clone(),
            deps.deliveries.clone(),
            config.dead_letter.clone(),
        );
        if let Some(sink) = deps.alerts.clone() {
            dead_letters = dead_letters.with_alerts(sink);
        }
        let dead_letters = Arc::new(dead_letters);

        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));

        let processor = Arc::new(QueueItemProcessor {
            webhooks: deps.webhooks.clone(),
            queue: queue.clone(),
            delivery,
            deliveries: deps.deliveries.clone(),
            dead_letters: dead_letters.clone(),
            breakers: breakers.clone(),
            breaker_keys: BreakerKeys::new(config.circuit_breaker.max_breakers),
            retry_policy: config.retry_policy.clone(),
        });

        Ok(Self {
            webhooks: deps.webhooks,
            queue,
            dead_letters,
            breakers,
            processor,
        })
    }

    pub fn queue(&self) -> &Arc<QueueManager> {
        &self.queue
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterManager> {
        &self.dead_letters
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Handler used by the background processor.
    pub fn processor(&self) -> Arc<dyn QueueItemHandler> {
        self.processor.clone()
    }

    /// Deliver `payload` to `webhook`, now or through the queue.
    ///
    /// Synchronous exhaustion returns `RetriesExhausted`; a rejected call
    /// returns `CircuitOpen`.
    pub async fn deliver_webhook(
        &self,
        webhook: &Webhook,
        payload: WebhookPayload,
        options: DeliveryOptions,
    ) -> Result<DeliveryReport, WebhookError> {
        if !webhook.active {
            return Err(WebhookError::InvalidConfiguration(format!(
                "webhook {} is inactive",
                webhook.id
            )));
        }

        if options.asynchronous {
            return self.enqueue(webhook, payload, &options).await;
        }

        let policy = self
            .processor
            .retry_policy
            .clone()
            .with_max_retries(options.max_retries);

        let RetryResult { result, attempts } = retry_with_result(&policy, |attempt| {
            self.processor.guarded_attempt(webhook, &payload, attempt)
        })
        .await;

        match result {
            Ok(delivery) => Ok(DeliveryReport::Delivered { delivery, attempts }),
            Err(e) if classify(&e).is_some() => {
                warn!(webhook_id = webhook.id, attempts, error = %e, "Synchronous delivery failed");
                Err(WebhookError::RetriesExhausted {
                    attempts,
                    last: Box::new(e),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn enqueue(
        &self,
        webhook: &Webhook,
        payload: WebhookPayload,
        options: &DeliveryOptions,
    ) -> Result<DeliveryReport, WebhookError> {
        let mut item = QueueItem::new(webhook.id, payload, options.max_retries, options.priority);
        if item.payload.idempotency_key.is_none() {
            item.payload.idempotency_key = Some(item.id.clone());
        }

        self.queue.enqueue(&item).await?;
        self.start().await;

        Ok(DeliveryReport::Queued { item_id: item.id })
    }

    /// Deliver an event to every active webhook subscribed to it.
    pub async fn deliver_event(
        &self,
        event: WebhookEventType,
        data: Value,
        options: DeliveryOptions,
    ) -> Result<Vec<EventDeliveryReport>, WebhookError> {
        let webhooks = self.webhooks.get_webhooks_by_event(event).await?;
        debug!(event = %event, webhooks = webhooks.len(), "Fanning out event");

        let deliveries = webhooks.iter().map(|webhook| {
            let payload = WebhookPayload::new(event, data.clone());
            let options = options.clone();
            async move {
                EventDeliveryReport {
                    webhook_id: webhook.id,
                    result: self.deliver_webhook(webhook, payload, options).await,
                }
            }
        });
        Ok(join_all(deliveries).await)
    }

    /// Replay one dead letter entry into the queue.
    pub async fn retry_dead_letter(&self, id: &str) -> Result<QueueItem, WebhookError> {
        let queue = self.queue.clone();
        self.dead_letters
            .retry(id, |item| async move { queue.enqueue(&item).await })
            .await
    }

    /// Replay every dead letter entry of one webhook.
    pub async fn retry_dead_letters_for_webhook(
        &self,
        webhook_id: i32,
    ) -> Result<BulkReplayResult, WebhookError> {
        self.dead_letters
            .retry_all_for_webhook(webhook_id, |item| {
                let queue = self.queue.clone();
                async move { queue.enqueue(&item).await }
            })
            .await
    }

    /// Start the background processor. No-op when already running.
    pub async fn start(&self) {
        self.queue.start(self.processor()).await;
    }

    pub async fn stop(&self) {
        self.queue.stop().await;
    }

    pub async fn is_running(&self) -> bool {
        self.queue.is_running().await
    }
}
