//! Durable queue front-end and the background processor that drains it.

use crate::error::WebhookError;
use crate::models::QueueItem;
use crate::store::QueueStore;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub poll_interval: Duration,
    /// Hard limit on handling one claimed item
    pub processing_timeout: Duration,
    /// Claims older than this are considered abandoned
    pub max_processing_age: Duration,
    /// Items claimed per poll tick
    pub batch_size: usize,
    pub worker_id: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            processing_timeout: Duration::from_secs(45),
            max_processing_age: Duration::from_secs(300),
            batch_size: 10,
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
        }
    }
}

impl QueueConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    pub fn with_max_processing_age(mut self, age: Duration) -> Self {
        self.max_processing_age = age;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }
}

/// Processes one claimed item. The handler owns the item's fate: it must
/// remove or replace it in the store.
#[async_trait]
pub trait QueueItemHandler: Send + Sync + 'static {
    async fn handle(&self, item: QueueItem) -> Result<(), WebhookError>;

    /// Called with the claimed item after `handle` ran past the processing
    /// timeout and was dropped. An error leaves the item to be released
    /// unchanged.
    async fn handle_timeout(
        &self,
        _item: QueueItem,
        timeout: Duration,
    ) -> Result<(), WebhookError> {
        Err(WebhookError::Timeout(timeout))
    }
}

/// What one `process_next` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Nothing due
    Idle,
    /// Claimed but not due yet, claim released
    Deferred(String),
    /// Handed to the handler on a tracked task
    Dispatched(String),
}

struct Processor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct QueueManager {
    store: Arc<dyn QueueStore>,
    config: QueueConfig,
    tracker: TaskTracker,
    processor: Mutex<Option<Processor>>,
}

impl QueueManager {
    pub fn new(store: Arc<dyn QueueStore>, config: QueueConfig) -> Self {
        Self {
            store,
            config,
            tracker: TaskTracker::new(),
            processor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn QueueStore> {
        self.store.clone()
    }

    pub async fn enqueue(&self, item: &QueueItem) -> Result<(), WebhookError> {
        self.store.enqueue(item).await.map_err(|e| {
            error!(
                item_id = %item.id,
                webhook_id = item.webhook_id,
                event = %item.event,
                error = %e,
                "CRITICAL: failed to enqueue webhook delivery"
            );
            e
        })?;
        debug!(item_id = %item.id, webhook_id = item.webhook_id, "Enqueued webhook delivery");
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<(), WebhookError> {
        self.store.remove(id).await
    }

    pub async fn list(&self) -> Result<Vec<QueueItem>, WebhookError> {
        self.store.list().await
    }

    pub async fn dequeue_atomic(&self) -> Result<Option<QueueItem>, WebhookError> {
        self.store.dequeue_atomic(&self.config.worker_id).await
    }

    pub async fn is_running(&self) -> bool {
        self.processor.lock().await.is_some()
    }

    /// Start the poll loop. A second call while running is a no-op.
    pub async fn start(self: &Arc<Self>, handler: Arc<dyn QueueItemHandler>) {
        let mut processor = self.processor.lock().await;
        if processor.is_some() {
            debug!("Queue processor already running");
            return;
        }

        let cancel = CancellationToken::new();
        let manager = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { manager.run(handler, token).await });

        *processor = Some(Processor { cancel, task });
        info!(
            worker_id = %self.config.worker_id,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "🚀 Queue processor started"
        );
    }

    /// Stop the poll loop and wait for in-flight items. Safe to call when
    /// not running.
    pub async fn stop(&self) {
        let processor = self.processor.lock().await.take();
        let Some(processor) = processor else {
            return;
        };

        processor.cancel.cancel();
        if let Err(e) = processor.task.await {
            warn!(error = %e, "Queue processor task ended abnormally");
        }

        self.wait_idle().await;

        info!(worker_id = %self.config.worker_id, "🛑 Queue processor stopped");
    }

    async fn run(&self, handler: Arc<dyn QueueItemHandler>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick(&handler, &cancel).await {
                        error!(error = %e, "Queue poll failed");
                    }
                }
            }
        }
    }

    /// One poll: recover abandoned claims, then claim up to `batch_size` items.
    pub async fn tick(
        &self,
        handler: &Arc<dyn QueueItemHandler>,
        cancel: &CancellationToken,
    ) -> Result<usize, WebhookError> {
        self.store
            .release_stale_claims(self.config.max_processing_age)
            .await?;

        let mut dispatched = 0;
        for _ in 0..self.config.batch_size.max(1) {
            if cancel.is_cancelled() {
                break;
            }
            match self.process_next(handler.clone()).await? {
                ProcessOutcome::Idle => break,
                ProcessOutcome::Deferred(_) => {}
                ProcessOutcome::Dispatched(_) => dispatched += 1,
            }
        }
        Ok(dispatched)
    }

    /// Claim the next item and hand it to `handler` on a tracked task
    /// bounded by the processing timeout.
    pub async fn process_next(
        &self,
        handler: Arc<dyn QueueItemHandler>,
    ) -> Result<ProcessOutcome, WebhookError> {
        let Some(item) = self.dequeue_atomic().await? else {
            return Ok(ProcessOutcome::Idle);
        };

        if !item.is_due(Utc::now()) {
            debug!(item_id = %item.id, scheduled_for = %item.scheduled_for, "Item not due, deferring");
            self.store.release(&item.id).await?;
            return Ok(ProcessOutcome::Deferred(item.id));
        }

        let item_id = item.id.clone();
        let timeout = self.config.processing_timeout;
        let store = self.store.clone();

        self.tracker.spawn(async move {
            let item_id = item.id.clone();
            let webhook_id = item.webhook_id;
            let claimed = item.clone();
            match tokio::time::timeout(timeout, handler.handle(item)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(item_id = %item_id, webhook_id, error = %e, "Failed to process queue item");
                }
                Err(_) => {
                    warn!(
                        item_id = %item_id,
                        webhook_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Queue item processing timed out"
                    );
                    if let Err(e) = handler.handle_timeout(claimed, timeout).await {
                        warn!(item_id = %item_id, error = %e, "Timed out item not settled, releasing claim");
                        if let Err(e) = store.release(&item_id).await {
                            error!(item_id = %item_id, error = %e, "Failed to release timed out item");
                        }
                    }
                }
            }
        });

        Ok(ProcessOutcome::Dispatched(item_id))
    }

    /// Wait until every dispatched item task has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
