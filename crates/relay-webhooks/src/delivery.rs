//! One signed HTTP attempt per call, each recorded in the delivery store.

use crate::error::{DeliveryFailure, NetworkErrorKind, WebhookError};
use crate::models::{
    Delivery, DeliveryCompletion, DeliveryStatus, NewDelivery, Webhook, WebhookPayload,
};
use crate::retry::{retry_with_result, RetryPolicy, RetryResult};
use crate::signer;
use crate::store::DeliveryStore;
use chrono::Utc;
use relay_core::EncryptionService;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const HEADER_EVENT: &str = "X-Webhook-Event";
pub const HEADER_SIGNATURE: &str = "X-Webhook-Signature";
pub const HEADER_TIMESTAMP: &str = "X-Webhook-Timestamp";
pub const HEADER_IDEMPOTENCY_KEY: &str = "X-Webhook-Idempotency-Key";

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub request_timeout: Duration,
    pub user_agent: String,
    /// Response bodies and error messages are cut to this many characters
    pub max_response_body: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            user_agent: "Relay-Webhook/1.0".to_string(),
            max_response_body: 1000,
        }
    }
}

impl DeliveryConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_max_response_body(mut self, max: usize) -> Self {
        self.max_response_body = max;
        self
    }
}

/// Result of a delivery call.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub delivery: Delivery,
    pub failure: Option<DeliveryFailure>,
    /// True when an earlier successful delivery with the same idempotency
    /// key was returned instead of sending again
    pub replayed: bool,
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn into_result(self) -> Result<Delivery, WebhookError> {
        match self.failure {
            None => Ok(self.delivery),
            Some(failure) => Err(WebhookError::Delivery(failure)),
        }
    }
}

/// Sends signed payloads to webhook endpoints
pub struct DeliveryService {
    http_client: reqwest::Client,
    deliveries: Arc<dyn DeliveryStore>,
    encryption_service: Arc<EncryptionService>,
    config: DeliveryConfig,
}

impl DeliveryService {
    pub fn new(
        deliveries: Arc<dyn DeliveryStore>,
        encryption_service: Arc<EncryptionService>,
        config: DeliveryConfig,
    ) -> Result<Self, WebhookError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                WebhookError::InvalidConfiguration(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            deliveries,
            encryption_service,
            config,
        })
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Deliver once, as the first attempt.
    pub async fn deliver(
        &self,
        webhook: &Webhook,
        payload: &WebhookPayload,
    ) -> Result<DeliveryOutcome, WebhookError> {
        self.deliver_attempt(webhook, payload, 1).await
    }

    /// Deliver once, recording `attempt` on the delivery record.
    ///
    /// An `Err` means the attempt could not be made or recorded (store,
    /// encryption or serialization problems). Endpoint failures come back
    /// as `Ok` with `failure` set.
    pub async fn deliver_attempt(
        &self,
        webhook: &Webhook,
        payload: &WebhookPayload,
        attempt: u32,
    ) -> Result<DeliveryOutcome, WebhookError> {
        if let Some(key) = payload.idempotency_key.as_deref() {
            if let Some(previous) = self.deliveries.find_successful_by_idempotency_key(key).await? {
                debug!(
                    webhook_id = webhook.id,
                    idempotency_key = key,
                    delivery_id = previous.id,
                    "Idempotency key already delivered, returning recorded delivery"
                );
                return Ok(DeliveryOutcome {
                    delivery: previous,
                    failure: None,
                    replayed: true,
                });
            }
        }

        let secret = self.encryption_service.decrypt_string(&webhook.secret)?;

        let mut signed = payload.clone();
        signed.signature = None;
        let signature = signer::sign(&signed, &secret)?;
        signed.signature = Some(signature.clone());
        let body = serde_json::to_string(&signed)?;

        let record = self
            .deliveries
            .create(NewDelivery {
                webhook_id: webhook.id,
                event: payload.event,
                payload: serde_json::to_value(&signed)?,
                attempt_count: attempt,
                idempotency_key: payload.idempotency_key.clone(),
            })
            .await?;

        let timestamp = Utc::now().timestamp().to_string();
        let mut request = self
            .http_client
            .post(&webhook.url)
            .header("Content-Type", "application/json")
            .header(HEADER_EVENT, payload.event.as_str())
            .header(HEADER_SIGNATURE, &signature)
            .header(HEADER_TIMESTAMP, &timestamp);

        if let Some(key) = &payload.idempotency_key {
            request = request.header(HEADER_IDEMPOTENCY_KEY, key);
        }

        let (completion, failure) = match request.body(body).send().await {
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                let text = self.truncate(&text);

                if status.is_success() {
                    (
                        DeliveryCompletion {
                            status: DeliveryStatus::Success,
                            status_code: status.as_u16(),
                            response_body: Some(text),
                            error_message: None,
                        },
                        None,
                    )
                } else {
                    let failure = DeliveryFailure::Http {
                        status: status.as_u16(),
                        body: text.clone(),
                    };
                    (
                        DeliveryCompletion {
                            status: DeliveryStatus::Failed,
                            status_code: status.as_u16(),
                            response_body: Some(text),
                            error_message: Some(self.truncate(&failure.to_string())),
                        },
                        Some(failure),
                    )
                }
            }
            Err(e) => {
                let failure = DeliveryFailure::Network {
                    kind: NetworkErrorKind::from_reqwest(&e),
                    message: self.truncate(&e.to_string()),
                };
                (
                    DeliveryCompletion {
                        status: DeliveryStatus::Failed,
                        status_code: 0,
                        response_body: None,
                        error_message: Some(self.truncate(&failure.to_string())),
                    },
                    Some(failure),
                )
            }
        };

        let delivery = self.deliveries.complete(record.id, completion).await?;

        match &failure {
            None => info!(
                webhook_id = webhook.id,
                delivery_id = delivery.id,
                event = %payload.event,
                attempt,
                "Webhook delivered"
            ),
            Some(failure) => warn!(
                webhook_id = webhook.id,
                delivery_id = delivery.id,
                event = %payload.event,
                attempt,
                status_code = failure.status_code(),
                error = %failure,
                "Webhook delivery failed"
            ),
        }

        Ok(DeliveryOutcome {
            delivery,
            failure,
            replayed: false,
        })
    }

    /// Deliver with retries and backoff, stopping at the first success.
    pub async fn deliver_with_retry(
        &self,
        webhook: &Webhook,
        payload: &WebhookPayload,
        policy: &RetryPolicy,
    ) -> RetryResult<Delivery> {
        retry_with_result(policy, |attempt| async move {
            self.deliver_attempt(webhook, payload, attempt)
                .await?
                .into_result()
        })
        .await
    }

    fn truncate(&self, text: &str) -> String {
        text.chars().take(self.config.max_response_body).collect()
    }
}
