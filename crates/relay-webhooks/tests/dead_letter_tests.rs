mod common;

use common::{FlakyDeadLetterStore, FlakyQueueStore, RecordingAlertSink, TestEnv};
use relay_core::AlertType;
use relay_webhooks::models::{DeliveryCompletion, NewDelivery};
use relay_webhooks::{
    DeadLetterConfig, DeadLetterManager, DeadLetterStore, DeliveryFailure, DeliveryStatus,
    DeliveryStore, QueueItem, QueueStore, Webhook, WebhookError, WebhookEventType, WebhookPayload,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn exhausted_item(webhook: &Webhook, key: &str) -> QueueItem {
    let payload = WebhookPayload::new(WebhookEventType::ResourceCreated, json!({ "id": 9 }))
        .with_idempotency_key(key);
    let mut item = QueueItem::new(webhook.id, payload, 3, 0);
    item.retry_count = 3;
    item
}

fn reason() -> WebhookError {
    WebhookError::Delivery(DeliveryFailure::Http {
        status: 503,
        body: "unavailable".to_string(),
    })
}

async fn record_failure(
    env: &TestEnv,
    webhook: &Webhook,
    key: &str,
    attempt: u32,
) -> anyhow::Result<()> {
    let pending = env
        .delivery_store
        .create(NewDelivery {
            webhook_id: webhook.id,
            event: WebhookEventType::ResourceCreated,
            payload: json!({ "id": 9 }),
            attempt_count: attempt,
            idempotency_key: Some(key.to_string()),
        })
        .await?;
    env.delivery_store
        .complete(
            pending.id,
            DeliveryCompletion {
                status: DeliveryStatus::Failed,
                status_code: 503,
                response_body: Some("unavailable".to_string()),
                error_message: Some("HTTP 503".to_string()),
            },
        )
        .await?;
    Ok(())
}

fn manager(env: &TestEnv, config: DeadLetterConfig) -> DeadLetterManager {
    DeadLetterManager::new(
        env.dead_letter_store.clone(),
        env.delivery_store.clone(),
        config,
    )
}

fn fast_replay() -> DeadLetterConfig {
    DeadLetterConfig::default().with_replay_initial_delay(Duration::ZERO)
}

#[tokio::test]
async fn test_entry_snapshots_attempts_of_the_same_delivery() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let webhook = env.create_webhook("http://localhost/hook").await?;
    for attempt in 1..=3 {
        record_failure(&env, &webhook, "k1", attempt).await?;
    }
    record_failure(&env, &webhook, "k2", 1).await?;

    let alerts = RecordingAlertSink::default();
    let manager = manager(&env, DeadLetterConfig::default()).with_alerts(Arc::new(alerts.clone()));

    let item = exhausted_item(&webhook, "k1");
    let entry = manager.add_to_dead_letter(&item, &webhook, &reason()).await?;

    assert_eq!(entry.webhook_id, webhook.id);
    assert_eq!(entry.payload, item.payload);
    assert_eq!(entry.failure_reason, reason().to_string());
    let attempts: Vec<u32> = entry.delivery_attempts.iter().map(|d| d.attempt_count).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert_eq!(
        Some(entry.last_attempt_at),
        entry.delivery_attempts.last().and_then(|d| d.delivered_at)
    );

    let stored = manager.get(&entry.id).await?.expect("stored entry");
    assert_eq!(stored.payload, entry.payload);
    assert_eq!(stored.delivery_attempts.len(), 3);
    assert!(alerts.wait_for(AlertType::DeadLetterAdded).await);
    Ok(())
}

#[tokio::test]
async fn test_threshold_alerts() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let webhook = env.create_webhook("http://localhost/hook").await?;
    let alerts = RecordingAlertSink::default();
    let manager = manager(
        &env,
        DeadLetterConfig::default()
            .with_alert_threshold(3)
            .with_webhook_alert_threshold(2),
    )
    .with_alerts(Arc::new(alerts.clone()));

    manager
        .add_to_dead_letter(&exhausted_item(&webhook, "a"), &webhook, &reason())
        .await?;
    assert!(alerts.wait_for(AlertType::DeadLetterAdded).await);
    assert!(!alerts.types().contains(&AlertType::WebhookThresholdExceeded));

    manager
        .add_to_dead_letter(&exhausted_item(&webhook, "b"), &webhook, &reason())
        .await?;
    assert!(alerts.wait_for(AlertType::WebhookThresholdExceeded).await);
    assert!(!alerts.types().contains(&AlertType::DeadLetterThresholdExceeded));

    manager
        .add_to_dead_letter(&exhausted_item(&webhook, "c"), &webhook, &reason())
        .await?;
    assert!(alerts.wait_for(AlertType::DeadLetterThresholdExceeded).await);

    let webhook_alert = alerts
        .alerts()
        .into_iter()
        .find(|a| a.alert_type == AlertType::WebhookThresholdExceeded)
        .unwrap();
    assert_eq!(
        webhook_alert.metadata.get("webhook_id"),
        Some(&webhook.id.to_string())
    );
    Ok(())
}

#[tokio::test]
async fn test_write_failure_is_alerted_and_returned() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let webhook = env.create_webhook("http://localhost/hook").await?;
    let store = Arc::new(FlakyDeadLetterStore::new(env.dead_letter_store.clone()));
    store.fail_add.store(true, Ordering::SeqCst);

    let alerts = RecordingAlertSink::default();
    let manager = DeadLetterManager::new(
        store.clone(),
        env.delivery_store.clone(),
        DeadLetterConfig::default(),
    )
    .with_alerts(Arc::new(alerts.clone()));

    let result = manager
        .add_to_dead_letter(&exhausted_item(&webhook, "a"), &webhook, &reason())
        .await;
    assert!(matches!(result, Err(WebhookError::Database(_))));
    assert!(alerts.wait_for(AlertType::DeadLetterWriteFailed).await);
    assert!(!alerts.types().contains(&AlertType::DeadLetterAdded));
    assert_eq!(store.count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_failing_alert_sink_does_not_fail_add() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let webhook = env.create_webhook("http://localhost/hook").await?;
    let alerts = RecordingAlertSink::failing();
    let manager = manager(&env, DeadLetterConfig::default()).with_alerts(Arc::new(alerts.clone()));

    manager
        .add_to_dead_letter(&exhausted_item(&webhook, "a"), &webhook, &reason())
        .await?;
    assert!(alerts.wait_for(AlertType::DeadLetterAdded).await);
    assert_eq!(manager.list(None).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_retry_removes_entry_only_after_enqueue() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let webhook = env.create_webhook("http://localhost/hook").await?;
    let manager = manager(&env, fast_replay().with_replay_max_retries(5));
    let entry = manager
        .add_to_dead_letter(&exhausted_item(&webhook, "replay"), &webhook, &reason())
        .await?;

    let queue = Arc::new(FlakyQueueStore::new(env.queue_store.clone()));
    queue.fail_enqueue.store(true, Ordering::SeqCst);

    let failed = {
        let queue = queue.clone();
        manager
            .retry(&entry.id, |item| async move { queue.enqueue(&item).await })
            .await
    };
    assert!(failed.is_err());
    assert!(manager.get(&entry.id).await?.is_some());
    assert!(env.queue_store.list().await?.is_empty());

    queue.fail_enqueue.store(false, Ordering::SeqCst);
    let replayed = {
        let queue = queue.clone();
        manager
            .retry(&entry.id, |item| async move { queue.enqueue(&item).await })
            .await?
    };

    assert_eq!(replayed.retry_count, 0);
    assert_eq!(replayed.max_retries, 5);
    assert_eq!(replayed.webhook_id, webhook.id);
    assert_eq!(replayed.payload.idempotency_key.as_deref(), Some("replay"));
    assert!(manager.get(&entry.id).await?.is_none());

    let queued = env.queue_store.list().await?;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, replayed.id);
    Ok(())
}

#[tokio::test]
async fn test_retry_unknown_entry() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let manager = manager(&env, fast_replay());
    let result = manager
        .retry("missing", |_| async { Ok::<(), WebhookError>(()) })
        .await;
    assert!(matches!(result, Err(WebhookError::DeadLetterNotFound(id)) if id == "missing"));
    Ok(())
}

#[tokio::test]
async fn test_retry_all_for_webhook() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let first = env.create_webhook("http://localhost/a").await?;
    let second = env.create_webhook("http://localhost/b").await?;
    let manager = manager(&env, fast_replay());

    for key in ["a", "b", "c"] {
        manager
            .add_to_dead_letter(&exhausted_item(&first, key), &first, &reason())
            .await?;
    }
    manager
        .add_to_dead_letter(&exhausted_item(&second, "d"), &second, &reason())
        .await?;

    let queue = env.queue_store.clone();
    let result = manager
        .retry_all_for_webhook(first.id, |item| {
            let queue = queue.clone();
            async move { queue.enqueue(&item).await }
        })
        .await?;

    assert_eq!(result.replayed.len(), 3);
    assert!(result.failed.is_empty());
    assert!(manager.list(Some(first.id)).await?.is_empty());
    assert_eq!(manager.list(Some(second.id)).await?.len(), 1);
    assert_eq!(env.queue_store.list().await?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_metrics_and_cleanup() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let first = env.create_webhook("http://localhost/a").await?;
    let second = env.create_webhook("http://localhost/b").await?;
    let manager = manager(
        &env,
        DeadLetterConfig::default()
            .with_alert_threshold(3)
            .with_webhook_alert_threshold(2),
    );

    let mut old = manager
        .add_to_dead_letter(&exhausted_item(&first, "old"), &first, &reason())
        .await?;
    // Age the first entry past the window and the retention period
    env.dead_letter_store.remove(&old.id).await?;
    old.created_at = common::ago(10 * 86_400);
    env.dead_letter_store.add(&old).await?;

    manager
        .add_to_dead_letter(&exhausted_item(&first, "x"), &first, &reason())
        .await?;
    manager
        .add_to_dead_letter(&exhausted_item(&first, "y"), &first, &reason())
        .await?;
    manager
        .add_to_dead_letter(&exhausted_item(&second, "z"), &second, &reason())
        .await?;

    let metrics = manager.get_metrics(None).await?;
    assert_eq!(metrics.total, 4);
    assert_eq!(metrics.recent, 3);
    assert_eq!(metrics.by_webhook.get(&first.id), Some(&2));
    assert_eq!(metrics.by_webhook.get(&second.id), Some(&1));
    assert!(metrics.threshold_exceeded);
    assert_eq!(metrics.exceeded_webhooks, vec![first.id]);

    let wide = manager
        .get_metrics(Some(Duration::from_secs(30 * 86_400)))
        .await?;
    assert_eq!(wide.recent, 4);
    assert_eq!(wide.by_webhook.get(&first.id), Some(&3));

    assert_eq!(manager.cleanup_old_items(7).await?, 1);
    assert_eq!(manager.cleanup_old_items(7).await?, 0);
    assert_eq!(manager.get_metrics(None).await?.total, 3);

    let remaining = manager.list(Some(second.id)).await?;
    assert!(manager.delete(&remaining[0].id).await?);
    assert!(!manager.delete(&remaining[0].id).await?);
    Ok(())
}
