use clap::Args;
use relay_core::{EncryptionService, LogAlertSink, RelayConfig};
use relay_webhooks::{
    CircuitBreakerConfig, DeadLetterConfig, DeliveryConfig, QueueConfig, QueueSystem,
    QueueSystemConfig, QueueSystemDeps,
};
use std::sync::Arc;
use tracing::debug;

/// Connection settings shared by every command
#[derive(Args, Clone)]
pub struct ConnectionArgs {
    /// Database connection URL
    #[arg(long, env = "RELAY_DATABASE_URL")]
    pub database_url: String,

    /// Key used to decrypt webhook secrets (64 hex chars)
    #[arg(long, env = "RELAY_ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: String,

    /// Maximum pooled database connections
    #[arg(long, env = "RELAY_DATABASE_MAX_CONNECTIONS", default_value = "20")]
    pub max_connections: u32,
}

impl ConnectionArgs {
    pub fn config(&self) -> RelayConfig {
        let mut config = RelayConfig::new(self.database_url.clone(), self.encryption_key.clone());
        config.database.max_connections = self.max_connections;
        config
    }
}

/// Connect, migrate and assemble a `QueueSystem` from `config`.
pub async fn build_system(config: &RelayConfig) -> anyhow::Result<QueueSystem> {
    config.validate()?;

    debug!("Initializing database connection...");
    let db = relay_database::establish_connection(&config.database).await?;
    let encryption_service = Arc::new(EncryptionService::new(&config.encryption_key)?);

    let deps = QueueSystemDeps::sea_orm(db, encryption_service)
        .with_alerts(Arc::new(LogAlertSink));

    let system_config = QueueSystemConfig {
        circuit_breaker: CircuitBreakerConfig::default(),
        delivery: DeliveryConfig::default().with_request_timeout(config.request_timeout()),
        queue: QueueConfig::default()
            .with_poll_interval(config.poll_interval())
            .with_processing_timeout(config.processing_timeout())
            .with_max_processing_age(config.max_processing_age())
            .with_batch_size(usize::try_from(config.batch_size).unwrap_or(usize::MAX)),
        dead_letter: DeadLetterConfig::default()
            .with_alert_threshold(config.dead_letter_alert_threshold)
            .with_webhook_alert_threshold(config.webhook_alert_threshold),
        ..Default::default()
    };

    Ok(QueueSystem::new(deps, system_config)?)
}
