//! Backoff computation, retryability rules and the generic retry driver.

use crate::error::{DeliveryFailure, NetworkErrorKind, WebhookError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// What kind of failure an error represents for retry and breaker purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 5xx, transport errors and timeouts: endpoint health problems
    Server,
    /// 4xx: the request itself is wrong
    Client,
}

/// Classify an error. `None` means the error is not an endpoint outcome
/// (store failures, open circuits, bad configuration).
pub fn classify(error: &WebhookError) -> Option<FailureClass> {
    match error {
        WebhookError::Delivery(failure) => Some(classify_failure(failure)),
        WebhookError::Timeout(_) => Some(FailureClass::Server),
        WebhookError::RetriesExhausted { last, .. } => classify(last),
        _ => None,
    }
}

pub fn classify_failure(failure: &DeliveryFailure) -> FailureClass {
    if failure.is_client_error() {
        FailureClass::Client
    } else {
        FailureClass::Server
    }
}

/// A condition under which a failed attempt may be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryableReason {
    HttpStatus(u16),
    NetworkError(NetworkErrorKind),
    /// Matches `WebhookError::code()`
    Custom(String),
}

impl RetryableReason {
    fn matches(&self, error: &WebhookError) -> bool {
        match (self, error.delivery_failure()) {
            (Self::HttpStatus(code), Some(DeliveryFailure::Http { status, .. })) => code == status,
            (Self::NetworkError(kind), Some(DeliveryFailure::Network { kind: actual, .. })) => {
                kind == actual
            }
            (Self::NetworkError(NetworkErrorKind::Timeout), None) => {
                matches!(error, WebhookError::Timeout(_))
            }
            (Self::Custom(tag), _) => *tag == error.code(),
            _ => false,
        }
    }
}

/// An empty set makes every error retryable.
pub fn is_retryable(error: &WebhookError, retryable: &[RetryableReason]) -> bool {
    retryable.is_empty() || retryable.iter().any(|reason| reason.matches(error))
}

/// Exponential backoff: `min(base * 2^attempt, max)`, then optionally moved
/// by a uniform offset in `±delay * jitter_factor / 2`, never below zero.
pub fn compute_delay(
    attempt: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_enabled: bool,
    jitter_factor: f64,
) -> Duration {
    let base_ms = u64::try_from(base_delay.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max_delay.as_millis()).unwrap_or(u64::MAX);

    let exponential = 2u64
        .checked_pow(attempt)
        .and_then(|factor| base_ms.checked_mul(factor))
        .unwrap_or(u64::MAX);
    let delay_ms = exponential.min(max_ms);

    if !jitter_enabled || jitter_factor <= 0.0 || delay_ms == 0 {
        return Duration::from_millis(delay_ms);
    }

    let spread = delay_ms as f64 * jitter_factor / 2.0;
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    let jittered = (delay_ms as f64 + offset).max(0.0);
    Duration::from_millis(jittered.round() as u64)
}

/// Retry settings for one delivery.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_enabled: bool,
    pub jitter_factor: f64,
    pub retryable: Vec<RetryableReason>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_enabled: true,
            jitter_factor: 0.1,
            retryable: Vec::new(),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, enabled: bool, factor: f64) -> Self {
        self.jitter_enabled = enabled;
        self.jitter_factor = factor;
        self
    }

    pub fn with_retryable(mut self, reasons: Vec<RetryableReason>) -> Self {
        self.retryable = reasons;
        self
    }

    /// Delay before the attempt that follows failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        compute_delay(
            attempt,
            self.base_delay,
            self.max_delay,
            self.jitter_enabled,
            self.jitter_factor,
        )
    }

    /// Server-class failures in the retryable set are retried. Client
    /// failures and open circuits never are.
    pub fn should_retry(&self, error: &WebhookError) -> bool {
        classify(error) == Some(FailureClass::Server) && is_retryable(error, &self.retryable)
    }
}

/// Final result of a retried operation.
#[derive(Debug)]
pub struct RetryResult<T> {
    pub result: Result<T, WebhookError>,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-retryable error or the
/// attempt budget is spent. `op` receives the 1-based attempt number.
pub async fn retry_with_result<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> RetryResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, WebhookError>>,
{
    let max_attempts = policy.max_retries.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => {
                return RetryResult {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) => {
                if attempt >= max_attempts || !policy.should_retry(&e) {
                    return RetryResult {
                        result: Err(e),
                        attempts: attempt,
                    };
                }
                let delay = policy.delay_for(attempt - 1);
                debug!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
