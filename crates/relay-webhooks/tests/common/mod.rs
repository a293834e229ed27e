//! Shared fixtures for relay-webhooks integration tests.
//!
//! Every fixture runs against a private in-memory sqlite database with the
//! relay schema applied; outbound HTTP goes to wiremock servers.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::{AlertEvent, AlertSink, AlertType, EncryptionService, NotificationError};
use relay_database::test_utils::TestDatabase;
use relay_webhooks::{
    CreateWebhookRequest, DeadLetterItem, DeadLetterStore, QueueItem, QueueStore, RetryPolicy,
    SeaOrmDeadLetterStore, SeaOrmDeliveryStore, SeaOrmQueueStore, SeaOrmWebhookRegistry, Webhook,
    WebhookError, WebhookEventType,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::{Request, Respond, ResponseTemplate};

pub const SECRET: &str = "whsec_test_secret_key_12345";
pub const TEST_KEY: &str = "0000000000000000000000000000000000000000000000000000000000000000";

pub struct TestEnv {
    pub db: TestDatabase,
    pub encryption: Arc<EncryptionService>,
    pub registry: Arc<SeaOrmWebhookRegistry>,
    pub queue_store: Arc<SeaOrmQueueStore>,
    pub dead_letter_store: Arc<SeaOrmDeadLetterStore>,
    pub delivery_store: Arc<SeaOrmDeliveryStore>,
}

impl TestEnv {
    pub async fn new() -> anyhow::Result<Self> {
        let db = TestDatabase::with_migrations().await?;
        let conn = db.connection();
        let encryption = Arc::new(EncryptionService::new(TEST_KEY)?);

        Ok(Self {
            registry: Arc::new(SeaOrmWebhookRegistry::new(conn.clone(), encryption.clone())),
            queue_store: Arc::new(SeaOrmQueueStore::new(conn.clone())),
            dead_letter_store: Arc::new(SeaOrmDeadLetterStore::new(conn.clone())),
            delivery_store: Arc::new(SeaOrmDeliveryStore::new(conn)),
            encryption,
            db,
        })
    }

    pub async fn create_webhook(&self, url: &str) -> anyhow::Result<Webhook> {
        self.create_webhook_for(url, vec![WebhookEventType::ResourceCreated])
            .await
    }

    pub async fn create_webhook_for(
        &self,
        url: &str,
        events: Vec<WebhookEventType>,
    ) -> anyhow::Result<Webhook> {
        Ok(self
            .registry
            .create_webhook(CreateWebhookRequest {
                url: url.to_string(),
                secret: SECRET.to_string(),
                events,
                active: true,
            })
            .await?)
    }
}

/// Retry policy with no waiting between attempts.
pub fn instant_retry_policy() -> RetryPolicy {
    RetryPolicy::default()
        .with_base_delay(Duration::ZERO)
        .with_max_delay(Duration::ZERO)
        .with_jitter(false, 0.0)
}

/// URL on a port nothing listens on.
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("http://127.0.0.1:{}/hook", port)
}

pub fn ago(seconds: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::seconds(seconds)
}

// ---------------------------------------------------------------------------
// SequenceResponder - answers with a fixed sequence of status codes
// ---------------------------------------------------------------------------

/// Replies with `statuses` in order, repeating the last one.
#[derive(Clone)]
pub struct SequenceResponder {
    statuses: Arc<Vec<u16>>,
    calls: Arc<AtomicUsize>,
}

impl SequenceResponder {
    pub fn new(statuses: Vec<u16>) -> Self {
        Self {
            statuses: Arc::new(statuses),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Respond for SequenceResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .statuses
            .get(n)
            .or_else(|| self.statuses.last())
            .copied()
            .unwrap_or(200);
        ResponseTemplate::new(status).set_body_string(format!("response {}", n + 1))
    }
}

// ---------------------------------------------------------------------------
// RecordingAlertSink - keeps every alert it receives
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct RecordingAlertSink {
    alerts: Arc<Mutex<Vec<AlertEvent>>>,
    fail: bool,
}

impl RecordingAlertSink {
    pub fn failing() -> Self {
        Self {
            alerts: Arc::default(),
            fail: true,
        }
    }

    pub fn types(&self) -> Vec<AlertType> {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.alert_type)
            .collect()
    }

    pub fn alerts(&self) -> Vec<AlertEvent> {
        self.alerts.lock().unwrap().clone()
    }

    /// Alerts are spawned; give them a chance to land.
    pub async fn wait_for(&self, alert_type: AlertType) -> bool {
        for _ in 0..100 {
            if self.types().contains(&alert_type) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn notify(&self, alert: AlertEvent) -> Result<(), NotificationError> {
        self.alerts.lock().unwrap().push(alert);
        if self.fail {
            return Err(NotificationError::ServiceUnavailable(
                "pager down".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Failing stores - wrap the real stores and fail on demand
// ---------------------------------------------------------------------------

fn injected() -> WebhookError {
    WebhookError::Database(sea_orm::DbErr::Custom("injected failure".to_string()))
}

pub struct FlakyQueueStore {
    pub inner: Arc<SeaOrmQueueStore>,
    pub fail_enqueue: AtomicBool,
}

impl FlakyQueueStore {
    pub fn new(inner: Arc<SeaOrmQueueStore>) -> Self {
        Self {
            inner,
            fail_enqueue: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl QueueStore for FlakyQueueStore {
    async fn enqueue(&self, item: &QueueItem) -> Result<(), WebhookError> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.enqueue(item).await
    }

    async fn dequeue_atomic(&self, worker_id: &str) -> Result<Option<QueueItem>, WebhookError> {
        self.inner.dequeue_atomic(worker_id).await
    }

    async fn release(&self, id: &str) -> Result<(), WebhookError> {
        self.inner.release(id).await
    }

    async fn release_stale_claims(&self, max_age: Duration) -> Result<u64, WebhookError> {
        self.inner.release_stale_claims(max_age).await
    }

    async fn remove(&self, id: &str) -> Result<(), WebhookError> {
        self.inner.remove(id).await
    }

    async fn list(&self) -> Result<Vec<QueueItem>, WebhookError> {
        self.inner.list().await
    }
}

pub struct FlakyDeadLetterStore {
    pub inner: Arc<SeaOrmDeadLetterStore>,
    pub fail_add: AtomicBool,
}

impl FlakyDeadLetterStore {
    pub fn new(inner: Arc<SeaOrmDeadLetterStore>) -> Self {
        Self {
            inner,
            fail_add: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl DeadLetterStore for FlakyDeadLetterStore {
    async fn add(&self, item: &DeadLetterItem) -> Result<(), WebhookError> {
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.add(item).await
    }

    async fn remove(&self, id: &str) -> Result<bool, WebhookError> {
        self.inner.remove(id).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<DeadLetterItem>, WebhookError> {
        self.inner.get_by_id(id).await
    }

    async fn list(&self, webhook_id: Option<i32>) -> Result<Vec<DeadLetterItem>, WebhookError> {
        self.inner.list(webhook_id).await
    }

    async fn count(&self) -> Result<u64, WebhookError> {
        self.inner.count().await
    }

    async fn count_since(&self, since: DateTime<Utc>) -> Result<u64, WebhookError> {
        self.inner.count_since(since).await
    }

    async fn count_by_webhook(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<HashMap<i32, u64>, WebhookError> {
        self.inner.count_by_webhook(since).await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, WebhookError> {
        self.inner.delete_older_than(cutoff).await
    }
}
