use relay_webhooks::{
    compute_delay, retry_with_result, DeliveryFailure, NetworkErrorKind, RetryPolicy,
    RetryableReason, WebhookError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn http(status: u16) -> WebhookError {
    WebhookError::Delivery(DeliveryFailure::Http {
        status,
        body: String::new(),
    })
}

#[test]
fn test_backoff_sequence_without_jitter() {
    let delays: Vec<u64> = (0..7)
        .map(|attempt| {
            compute_delay(
                attempt,
                Duration::from_secs(1),
                Duration::from_secs(30),
                false,
                0.0,
            )
            .as_millis() as u64
        })
        .collect();

    assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
}

#[test]
fn test_zero_base_delay_is_zero() {
    assert_eq!(
        compute_delay(5, Duration::ZERO, Duration::from_secs(30), true, 0.5),
        Duration::ZERO
    );
}

#[tokio::test(start_paused = true)]
async fn test_succeeds_after_transient_failures() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::default().with_max_retries(5);

    let started = tokio::time::Instant::now();
    let outcome = retry_with_result(&policy, |attempt| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt < 3 {
                Err(http(502))
            } else {
                Ok(attempt)
            }
        }
    })
    .await;

    assert_eq!(outcome.result.unwrap(), 3);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // ~1s + ~2s of backoff with 10% jitter
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(2700), "waited {:?}", waited);
    assert!(waited <= Duration::from_millis(3300), "waited {:?}", waited);
}

#[tokio::test(start_paused = true)]
async fn test_stops_at_attempt_budget() {
    let policy = RetryPolicy::default().with_max_retries(3);
    let outcome = retry_with_result(&policy, |_| async { Err::<(), _>(http(500)) }).await;

    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.result.unwrap_err().code(), "http_500");
}

#[tokio::test(start_paused = true)]
async fn test_client_error_is_not_retried() {
    let policy = RetryPolicy::default().with_max_retries(5);
    let outcome = retry_with_result(&policy, |_| async { Err::<(), _>(http(400)) }).await;
    assert_eq!(outcome.attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_open_is_not_retried() {
    let policy = RetryPolicy::default().with_max_retries(5);
    let outcome = retry_with_result(&policy, |_| async {
        Err::<(), _>(WebhookError::CircuitOpen {
            key: "1:http://a".to_string(),
        })
    })
    .await;
    assert_eq!(outcome.attempts, 1);
    assert!(outcome.result.unwrap_err().is_circuit_open());
}

#[tokio::test(start_paused = true)]
async fn test_retryable_set_limits_retries() {
    let policy = RetryPolicy::default()
        .with_max_retries(5)
        .with_retryable(vec![
            RetryableReason::HttpStatus(503),
            RetryableReason::NetworkError(NetworkErrorKind::Timeout),
        ]);

    let outcome = retry_with_result(&policy, |_| async { Err::<(), _>(http(500)) }).await;
    assert_eq!(outcome.attempts, 1);

    let outcome = retry_with_result(&policy, |_| async { Err::<(), _>(http(503)) }).await;
    assert_eq!(outcome.attempts, 5);
}

#[tokio::test(start_paused = true)]
async fn test_zero_budget_still_makes_one_attempt() {
    let policy = RetryPolicy::default().with_max_retries(0);
    let outcome = retry_with_result(&policy, |_| async { Err::<(), _>(http(500)) }).await;
    assert_eq!(outcome.attempts, 1);
}
