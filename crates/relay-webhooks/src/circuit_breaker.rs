//! Per-endpoint circuit breaker.
//!
//! Each breaker protects one `(webhook id, url)` endpoint. Consecutive
//! server-class failures open the circuit; after the monitoring window a
//! single trial call is admitted (half-open) and enough trial successes
//! close it again. Client-class failures (4xx) never move the breaker.

use crate::error::WebhookError;
use crate::registry::BoundedMap;
use crate::retry::{classify, FailureClass};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - deliveries proceed.
    #[default]
    Closed,
    /// Circuit tripped - deliveries rejected immediately.
    Open,
    /// Testing recovery - one trial call at a time.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive server failures before opening the circuit.
    pub failure_threshold: u32,
    /// Trial successes needed to close a half-open circuit.
    pub success_threshold: u32,
    /// Time an open circuit waits before admitting a trial call.
    pub monitoring_window: Duration,
    /// Upper bound on breakers held by a registry.
    pub max_breakers: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            monitoring_window: Duration::from_secs(60),
            max_breakers: 1000,
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_monitoring_window(mut self, window: Duration) -> Self {
        self.monitoring_window = window;
        self
    }

    #[must_use]
    pub fn with_max_breakers(mut self, max: usize) -> Self {
        self.max_breakers = max;
        self
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub key: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

/// Circuit breaker for a single endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    key: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

/// Admission granted by the breaker. Dropping it without recording an
/// outcome (a cancelled call) frees the half-open trial slot.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Admission<'_> {
    fn record<T>(mut self, outcome: &Result<T, WebhookError>) {
        self.settled = true;
        match outcome {
            Ok(_) => self.breaker.on_success(self.trial),
            Err(e) => self.breaker.on_failure(self.trial, classify(e)),
        }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            key: key.into(),
            config,
            inner: Mutex::new(BreakerState::default()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        let state = self.lock();
        CircuitBreakerStatus {
            key: self.key.clone(),
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            last_failure_time: state.last_failure_time,
        }
    }

    /// Force the breaker back to closed.
    pub fn reset(&self) {
        *self.lock() = BreakerState::default();
        info!(key = %self.key, "Circuit breaker reset");
    }

    /// Run `call` through the breaker; rejected calls return `CircuitOpen`.
    pub async fn execute<T, F, Fut>(&self, call: F) -> Result<T, WebhookError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, WebhookError>>,
    {
        let admission = self.admit().ok_or_else(|| WebhookError::CircuitOpen {
            key: self.key.clone(),
        })?;

        let outcome = call().await;
        admission.record(&outcome);
        outcome
    }

    /// Like `execute`, but a rejected call yields `fallback()` instead of an error.
    pub async fn execute_with_fallback<T, F, Fut, FB>(
        &self,
        call: F,
        fallback: FB,
    ) -> Result<T, WebhookError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, WebhookError>>,
        FB: FnOnce() -> T,
    {
        let Some(admission) = self.admit() else {
            debug!(key = %self.key, "Circuit open, using fallback");
            return Ok(fallback());
        };

        let outcome = call().await;
        admission.record(&outcome);
        outcome
    }

    /// Count a failure of a call whose admission was already dropped, such
    /// as one cut off by the queue's processing timeout.
    pub fn record_failure(&self, error: &WebhookError) {
        self.on_failure(false, classify(error));
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admit(&self) -> Option<Admission<'_>> {
        let mut state = self.lock();
        let trial = match state.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let elapsed = state
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.monitoring_window)
                    .unwrap_or(true);
                if !elapsed {
                    return None;
                }
                state.state = CircuitState::HalfOpen;
                state.success_count = 0;
                info!(key = %self.key, "Circuit breaker half-open, admitting trial call");
                true
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    return None;
                }
                true
            }
        };

        if trial {
            state.trial_in_flight = true;
        }

        Some(Admission {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn on_success(&self, trial: bool) {
        let mut state = self.lock();
        if trial {
            state.trial_in_flight = false;
        }

        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    *state = BreakerState {
                        last_failure_time: state.last_failure_time,
                        ..BreakerState::default()
                    };
                    info!(key = %self.key, "Circuit breaker closed");
                }
            }
            // Reset while the call was running
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, trial: bool, class: Option<FailureClass>) {
        let mut state = self.lock();
        if trial {
            state.trial_in_flight = false;
        }

        if class != Some(FailureClass::Server) {
            return;
        }

        state.last_failure_time = Some(Utc::now());
        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    warn!(
                        key = %self.key,
                        failures = state.failure_count,
                        "Circuit breaker opened"
                    );
                    Self::open(&mut state);
                }
            }
            CircuitState::HalfOpen => {
                warn!(key = %self.key, "Trial call failed, circuit breaker reopened");
                Self::open(&mut state);
            }
            CircuitState::Open => {}
        }
    }

    fn open(state: &mut BreakerState) {
        state.state = CircuitState::Open;
        state.opened_at = Some(Instant::now());
        state.failure_count = 0;
        state.success_count = 0;
        state.trial_in_flight = false;
    }
}

/// Bounded set of breakers keyed by endpoint.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<BoundedMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let breakers = Mutex::new(BoundedMap::new(config.max_breakers));
        Self { config, breakers }
    }

    /// Breaker key for an endpoint.
    pub fn key_for(webhook_id: i32, url: &str) -> String {
        format!("{}:{}", webhook_id, url)
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BoundedMap<String, Arc<CircuitBreaker>>> {
        self.breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Breaker for `key`, created closed on first use.
    pub fn get(&self, key: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.lock();
        if let Some(breaker) = breakers.get(&key.to_string()) {
            return breaker.clone();
        }

        let breaker = Arc::new(CircuitBreaker::new(key, self.config.clone()));
        if let Some((evicted, _)) = breakers.insert(key.to_string(), breaker.clone()) {
            debug!(key = %evicted, "Evicted circuit breaker");
        }
        breaker
    }

    pub fn existing(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.lock().get(&key.to_string()).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn statuses(&self) -> Vec<CircuitBreakerStatus> {
        self.lock().values().map(|b| b.status()).collect()
    }

    /// Reset one breaker. Returns false if the key is unknown.
    pub fn reset(&self, key: &str) -> bool {
        match self.existing(key) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> = self.lock().values().cloned().collect();
        for breaker in breakers {
            breaker.reset();
        }
    }
}
