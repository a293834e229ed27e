use super::context::{build_system, ConnectionArgs};
use clap::Args;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Args)]
pub struct ServeCommand {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Milliseconds between queue polls
    #[arg(long, env = "RELAY_POLL_INTERVAL_MS", default_value = "1000")]
    pub poll_interval_ms: u64,

    /// Seconds an outbound delivery request may take
    #[arg(long, env = "RELAY_REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Seconds one queue item may be processed before the attempt counts as failed
    #[arg(long, env = "RELAY_PROCESSING_TIMEOUT_SECS", default_value = "45")]
    pub processing_timeout_secs: u64,

    /// Seconds after which a claim is considered abandoned
    #[arg(long, env = "RELAY_MAX_PROCESSING_AGE_SECS", default_value = "300")]
    pub max_processing_age_secs: u64,

    /// Items claimed per poll
    #[arg(long, env = "RELAY_BATCH_SIZE", default_value = "10")]
    pub batch_size: u64,

    /// Dead letter entries at which an alert is raised
    #[arg(long, env = "RELAY_DEAD_LETTER_ALERT_THRESHOLD", default_value = "100")]
    pub dead_letter_alert_threshold: u64,

    /// Dead letter entries of one webhook within 24h at which an alert is raised
    #[arg(long, env = "RELAY_WEBHOOK_ALERT_THRESHOLD", default_value = "10")]
    pub webhook_alert_threshold: u64,

    /// Days dead letter entries are kept
    #[arg(long, env = "RELAY_RETENTION_DAYS", default_value = "30")]
    pub retention_days: u32,
}

impl ServeCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let mut config = self.connection.config();
        config.poll_interval_ms = self.poll_interval_ms;
        config.request_timeout_secs = self.request_timeout_secs;
        config.processing_timeout_secs = self.processing_timeout_secs;
        config.max_processing_age_secs = self.max_processing_age_secs;
        config.batch_size = self.batch_size;
        config.dead_letter_alert_threshold = self.dead_letter_alert_threshold;
        config.webhook_alert_threshold = self.webhook_alert_threshold;
        config.retention_days = self.retention_days;

        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async move {
            let system = Arc::new(build_system(&config).await?);
            system.start().await;
            info!(
                poll_interval_ms = config.poll_interval_ms,
                batch_size = config.batch_size,
                "🚀 Relay worker running, press Ctrl+C to stop"
            );

            let cancel = CancellationToken::new();
            let cleanup = {
                let system = system.clone();
                let cancel = cancel.clone();
                let retention_days = config.retention_days;
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = interval.tick() => {
                                if let Err(e) = system.dead_letters().cleanup_old_items(retention_days).await {
                                    error!(error = %e, "Dead letter cleanup failed");
                                }
                            }
                        }
                    }
                })
            };

            tokio::signal::ctrl_c().await?;
            info!("🛑 Shutdown requested, draining in-flight deliveries...");

            cancel.cancel();
            if let Err(e) = cleanup.await {
                error!(error = %e, "Cleanup task ended abnormally");
            }
            system.stop().await;

            info!("Relay worker stopped");
            Ok::<(), anyhow::Error>(())
        })
    }
}
