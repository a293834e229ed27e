//! Dead letter queue: terminal storage for deliveries that ran out of
//! retries, with threshold alerting and replay back into the queue.

use crate::error::WebhookError;
use crate::models::{DeadLetterItem, QueueItem, Webhook};
use crate::retry::compute_delay;
use crate::store::{DeadLetterStore, DeliveryStore};
use chrono::Utc;
use relay_core::{AlertEvent, AlertType, DynAlertSink};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct DeadLetterConfig {
    /// Total entries at which `DeadLetterThresholdExceeded` fires
    pub alert_threshold: u64,
    /// Entries of one webhook within the metrics window at which
    /// `WebhookThresholdExceeded` fires
    pub webhook_alert_threshold: u64,
    pub metrics_window: Duration,
    /// Failed deliveries copied into an entry
    pub history_limit: u64,
    pub replay_max_retries: u32,
    pub replay_initial_delay: Duration,
    pub replay_jitter_factor: f64,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            alert_threshold: 100,
            webhook_alert_threshold: 10,
            metrics_window: Duration::from_secs(24 * 60 * 60),
            history_limit: 50,
            replay_max_retries: 3,
            replay_initial_delay: Duration::from_secs(1),
            replay_jitter_factor: 0.5,
        }
    }
}

impl DeadLetterConfig {
    pub fn with_alert_threshold(mut self, threshold: u64) -> Self {
        self.alert_threshold = threshold;
        self
    }

    pub fn with_webhook_alert_threshold(mut self, threshold: u64) -> Self {
        self.webhook_alert_threshold = threshold;
        self
    }

    pub fn with_metrics_window(mut self, window: Duration) -> Self {
        self.metrics_window = window;
        self
    }

    pub fn with_replay_initial_delay(mut self, delay: Duration) -> Self {
        self.replay_initial_delay = delay;
        self
    }

    pub fn with_replay_max_retries(mut self, max_retries: u32) -> Self {
        self.replay_max_retries = max_retries;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterMetrics {
    pub total: u64,
    /// Entries created within the window
    pub recent: u64,
    /// Entries per webhook within the window
    pub by_webhook: HashMap<i32, u64>,
    /// Total is at or above the global alert threshold
    pub threshold_exceeded: bool,
    /// Webhooks at or above the per-webhook threshold, ascending
    pub exceeded_webhooks: Vec<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkReplayResult {
    /// Ids of the new queue items
    pub replayed: Vec<String>,
    /// Dead letter ids that stayed, with the reason
    pub failed: Vec<(String, String)>,
}

pub struct DeadLetterManager {
    store: Arc<dyn DeadLetterStore>,
    deliveries: Arc<dyn DeliveryStore>,
    alerts: Option<DynAlertSink>,
    config: DeadLetterConfig,
}

impl DeadLetterManager {
    pub fn new(
        store: Arc<dyn DeadLetterStore>,
        deliveries: Arc<dyn DeliveryStore>,
        config: DeadLetterConfig,
    ) -> Self {
        Self {
            store,
            deliveries,
            alerts: None,
            config,
        }
    }

    pub fn with_alerts(mut self, sink: DynAlertSink) -> Self {
        self.alerts = Some(sink);
        self
    }

    pub fn config(&self) -> &DeadLetterConfig {
        &self.config
    }

    /// Move an exhausted item into the dead letter store.
    ///
    /// A store failure is logged as critical, alerted and returned; the
    /// caller must then keep the queue item.
    pub async fn add_to_dead_letter(
        &self,
        item: &QueueItem,
        webhook: &Webhook,
        reason: &WebhookError,
    ) -> Result<DeadLetterItem, WebhookError> {
        match self.persist(item, webhook, reason).await {
            Ok(entry) => {
                warn!(
                    dead_letter_id = %entry.id,
                    item_id = %item.id,
                    webhook_id = webhook.id,
                    event = %item.event,
                    attempts = entry.delivery_attempts.len(),
                    reason = %entry.failure_reason,
                    "Webhook delivery moved to dead letter queue"
                );
                self.notify(
                    AlertEvent::new(AlertType::DeadLetterAdded)
                        .with_item(serde_json::to_value(&entry).unwrap_or_default())
                        .with_metadata("webhook_id", webhook.id)
                        .with_metadata("event", item.event),
                );
                if let Err(e) = self.check_thresholds(webhook.id).await {
                    warn!(webhook_id = webhook.id, error = %e, "Dead letter threshold check failed");
                }
                Ok(entry)
            }
            Err(e) => {
                error!(
                    item_id = %item.id,
                    webhook_id = webhook.id,
                    event = %item.event,
                    retry_count = item.retry_count,
                    reason = %reason,
                    error = %e,
                    "CRITICAL: failed to write dead letter entry"
                );
                self.notify(
                    AlertEvent::new(AlertType::DeadLetterWriteFailed)
                        .with_item(serde_json::to_value(item).unwrap_or_default())
                        .with_metadata("webhook_id", webhook.id)
                        .with_metadata("error", &e),
                );
                Err(e)
            }
        }
    }

    async fn persist(
        &self,
        item: &QueueItem,
        webhook: &Webhook,
        reason: &WebhookError,
    ) -> Result<DeadLetterItem, WebhookError> {
        let attempts = self
            .deliveries
            .list_failed(
                webhook.id,
                item.payload.idempotency_key.as_deref(),
                self.config.history_limit,
            )
            .await?;

        let now = Utc::now();
        let last_attempt_at = attempts
            .last()
            .map(|d| d.delivered_at.unwrap_or(d.created_at))
            .unwrap_or(now);

        let entry = DeadLetterItem {
            id: uuid::Uuid::new_v4().to_string(),
            webhook_id: webhook.id,
            event: item.event,
            payload: item.payload.clone(),
            failure_reason: reason.to_string(),
            last_attempt_at,
            delivery_attempts: attempts,
            created_at: now,
        };

        self.store.add(&entry).await?;
        Ok(entry)
    }

    async fn check_thresholds(&self, webhook_id: i32) -> Result<(), WebhookError> {
        let metrics = self.get_metrics(None).await?;

        if metrics.threshold_exceeded {
            self.notify(
                AlertEvent::new(AlertType::DeadLetterThresholdExceeded)
                    .with_metadata("total", metrics.total)
                    .with_metadata("threshold", self.config.alert_threshold),
            );
        }

        if metrics.exceeded_webhooks.contains(&webhook_id) {
            let count = metrics.by_webhook.get(&webhook_id).copied().unwrap_or(0);
            self.notify(
                AlertEvent::new(AlertType::WebhookThresholdExceeded)
                    .with_metadata("webhook_id", webhook_id)
                    .with_metadata("count", count)
                    .with_metadata("threshold", self.config.webhook_alert_threshold),
            );
        }
        Ok(())
    }

    /// Replay one entry through `enqueue`. The entry is removed only after
    /// the new queue item was accepted.
    pub async fn retry<F, Fut>(&self, id: &str, enqueue: F) -> Result<QueueItem, WebhookError>
    where
        F: FnOnce(QueueItem) -> Fut,
        Fut: Future<Output = Result<(), WebhookError>>,
    {
        let entry = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| WebhookError::DeadLetterNotFound(id.to_string()))?;

        let item = self.replay_item(&entry);

        if let Err(e) = enqueue(item.clone()).await {
            error!(
                dead_letter_id = %id,
                webhook_id = entry.webhook_id,
                error = %e,
                "Dead letter replay enqueue failed, entry kept"
            );
            return Err(e);
        }

        self.store.remove(id).await.map_err(|e| {
            error!(
                dead_letter_id = %id,
                item_id = %item.id,
                error = %e,
                "Replay enqueued but dead letter entry could not be removed"
            );
            e
        })?;

        info!(
            dead_letter_id = %id,
            item_id = %item.id,
            webhook_id = entry.webhook_id,
            "Replayed dead letter entry"
        );
        Ok(item)
    }

    /// Replay every entry of a webhook, skipping entries that fail.
    pub async fn retry_all_for_webhook<F, Fut>(
        &self,
        webhook_id: i32,
        enqueue: F,
    ) -> Result<BulkReplayResult, WebhookError>
    where
        F: Fn(QueueItem) -> Fut,
        Fut: Future<Output = Result<(), WebhookError>>,
    {
        let entries = self.store.list(Some(webhook_id)).await?;
        let mut result = BulkReplayResult::default();

        for entry in entries {
            match self.retry(&entry.id, &enqueue).await {
                Ok(item) => result.replayed.push(item.id),
                Err(e) => {
                    warn!(dead_letter_id = %entry.id, webhook_id, error = %e, "Skipping dead letter entry");
                    result.failed.push((entry.id, e.to_string()));
                }
            }
        }

        info!(
            webhook_id,
            replayed = result.replayed.len(),
            failed = result.failed.len(),
            "Bulk dead letter replay finished"
        );
        Ok(result)
    }

    fn replay_item(&self, entry: &DeadLetterItem) -> QueueItem {
        let delay = compute_delay(
            0,
            self.config.replay_initial_delay,
            self.config.replay_initial_delay,
            true,
            self.config.replay_jitter_factor,
        );
        let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

        let mut item = QueueItem::new(
            entry.webhook_id,
            entry.payload.clone(),
            self.config.replay_max_retries,
            0,
        );
        item.scheduled_for = item.created_at + delay;
        item
    }

    /// Counts over all entries and over the last `window` (default: the
    /// configured metrics window).
    pub async fn get_metrics(
        &self,
        window: Option<Duration>,
    ) -> Result<DeadLetterMetrics, WebhookError> {
        let window = window.unwrap_or(self.config.metrics_window);
        let since = Utc::now()
            - chrono::Duration::from_std(window)
                .map_err(|e| WebhookError::InvalidConfiguration(e.to_string()))?;

        let total = self.store.count().await?;
        let recent = self.store.count_since(since).await?;
        let by_webhook = self.store.count_by_webhook(Some(since)).await?;

        let mut exceeded_webhooks: Vec<i32> = by_webhook
            .iter()
            .filter(|(_, count)| **count >= self.config.webhook_alert_threshold)
            .map(|(webhook_id, _)| *webhook_id)
            .collect();
        exceeded_webhooks.sort_unstable();

        Ok(DeadLetterMetrics {
            total,
            recent,
            threshold_exceeded: total >= self.config.alert_threshold,
            by_webhook,
            exceeded_webhooks,
        })
    }

    /// Delete entries older than `retention_days`.
    pub async fn cleanup_old_items(&self, retention_days: u32) -> Result<u64, WebhookError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let deleted = self.store.delete_older_than(cutoff).await?;
        if deleted > 0 {
            info!(deleted, retention_days, "Cleaned up old dead letter entries");
        }
        Ok(deleted)
    }

    pub async fn list(&self, webhook_id: Option<i32>) -> Result<Vec<DeadLetterItem>, WebhookError> {
        self.store.list(webhook_id).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<DeadLetterItem>, WebhookError> {
        self.store.get_by_id(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, WebhookError> {
        let removed = self.store.remove(id).await?;
        if removed {
            info!(dead_letter_id = %id, "Deleted dead letter entry");
        }
        Ok(removed)
    }

    fn notify(&self, event: AlertEvent) {
        let Some(sink) = self.alerts.clone() else {
            return;
        };
        tokio::spawn(async move {
            let alert_type = event.alert_type;
            if let Err(e) = sink.notify(event).await {
                warn!(alert = %alert_type, error = %e, "Alert sink failed");
            }
        });
    }
}
