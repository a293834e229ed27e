//! Core utilities and types shared across all relay crates

pub mod config;
pub mod error;
pub mod notifications;
pub mod types;
mod encryption;

// Re-export commonly used types
pub use config::*;
pub use error::*;
pub use notifications::*;
pub use types::*;
pub use encryption::{EncryptionError, EncryptionService};

// Re-export external dependencies
pub use anyhow;
pub use async_trait;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tokio;
pub use tracing;
pub use uuid;
