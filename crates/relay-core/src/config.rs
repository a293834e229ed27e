//! Configuration management utilities

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ServiceError, ServiceResult};

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 20,
            min_connections: 2,
        }
    }
}

/// Process-level settings for the relay worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub database: DatabaseConfig,
    /// 64 hex chars (or 32 raw bytes) used to decrypt webhook secrets
    pub encryption_key: String,
    pub poll_interval_ms: u64,
    /// Per-request HTTP timeout for outbound deliveries
    pub request_timeout_secs: u64,
    /// Must exceed the request timeout so a hung endpoint surfaces as a
    /// failed attempt rather than a cut-off one
    pub processing_timeout_secs: u64,
    pub max_processing_age_secs: u64,
    pub batch_size: u64,
    pub dead_letter_alert_threshold: u64,
    pub webhook_alert_threshold: u64,
    pub retention_days: u32,
}

impl RelayConfig {
    pub fn new(database_url: impl Into<String>, encryption_key: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::new(database_url),
            encryption_key: encryption_key.into(),
            poll_interval_ms: 1_000,
            request_timeout_secs: 30,
            processing_timeout_secs: 45,
            max_processing_age_secs: 300,
            batch_size: 10,
            dead_letter_alert_threshold: 100,
            webhook_alert_threshold: 10,
            retention_days: 30,
        }
    }

    pub fn validate(&self) -> ServiceResult<()> {
        if self.database.url.trim().is_empty() {
            return Err(ServiceError::Configuration {
                message: "database url must not be empty".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ServiceError::Configuration {
                message: "poll interval must be greater than zero".to_string(),
            });
        }
        if self.processing_timeout_secs <= self.request_timeout_secs {
            return Err(ServiceError::Configuration {
                message: format!(
                    "processing timeout ({}s) must be longer than the request timeout ({}s)",
                    self.processing_timeout_secs, self.request_timeout_secs
                ),
            });
        }
        if self.max_processing_age_secs < self.processing_timeout_secs {
            return Err(ServiceError::Configuration {
                message: format!(
                    "max processing age ({}s) must not be shorter than the processing timeout ({}s)",
                    self.max_processing_age_secs, self.processing_timeout_secs
                ),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    pub fn max_processing_age(&self) -> Duration {
        Duration::from_secs(self.max_processing_age_secs)
    }
}
