//! Error types for webhook delivery.

use relay_core::EncryptionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Transport-level failure categories, derived from the HTTP client error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorKind {
    Timeout,
    Connect,
    Request,
    Body,
    Other,
}

impl NetworkErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Request => "request",
            Self::Body => "body",
            Self::Other => "other",
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect
        } else if err.is_body() || err.is_decode() {
            Self::Body
        } else if err.is_request() || err.is_builder() || err.is_redirect() {
            Self::Request
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single outbound attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryFailure {
    /// The endpoint answered with a non-2xx status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// No response was received
    #[error("{kind} error: {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },
}

impl DeliveryFailure {
    /// HTTP status, 0 when the request never got a response.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Http { status, .. } => *status,
            Self::Network { .. } => 0,
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Http { status, .. } if (400..500).contains(status))
    }

    pub fn code(&self) -> String {
        match self {
            Self::Http { status, .. } => format!("http_{}", status),
            Self::Network { kind, .. } => format!("network_{}", kind),
        }
    }
}

/// Webhook subsystem errors
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Webhook not found: {0}")]
    WebhookNotFound(i32),

    #[error("Dead letter item not found: {0}")]
    DeadLetterNotFound(String),

    #[error("Circuit breaker open for {key}")]
    CircuitOpen { key: String },

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryFailure),

    #[error("Delivery failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<WebhookError>,
    },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl WebhookError {
    /// Stable machine-readable tag, matched by `RetryableReason::Custom`.
    pub fn code(&self) -> String {
        match self {
            Self::Database(_) => "database_error".to_string(),
            Self::Serialization(_) => "serialization_error".to_string(),
            Self::Encryption(_) => "encryption_error".to_string(),
            Self::WebhookNotFound(_) => "webhook_not_found".to_string(),
            Self::DeadLetterNotFound(_) => "dead_letter_not_found".to_string(),
            Self::CircuitOpen { .. } => "circuit_open".to_string(),
            Self::Delivery(failure) => failure.code(),
            Self::RetriesExhausted { .. } => "retries_exhausted".to_string(),
            Self::Timeout(_) => "timeout".to_string(),
            Self::InvalidConfiguration(_) => "invalid_configuration".to_string(),
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// The delivery failure behind this error, looking through exhaustion.
    pub fn delivery_failure(&self) -> Option<&DeliveryFailure> {
        match self {
            Self::Delivery(failure) => Some(failure),
            Self::RetriesExhausted { last, .. } => last.delivery_failure(),
            _ => None,
        }
    }
}
