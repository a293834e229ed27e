use super::context::{build_system, ConnectionArgs};
use clap::{Args, Subcommand};
use colored::Colorize;
use relay_webhooks::DeadLetterItem;
use std::time::Duration;
use tracing::info;

#[derive(Args)]
pub struct DeadLetterCommand {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: DeadLetterCommands,
}

#[derive(Subcommand)]
enum DeadLetterCommands {
    /// List dead letter entries, newest first
    List {
        /// Only entries of this webhook
        #[arg(long)]
        webhook_id: Option<i32>,
    },
    /// Replay one entry into the delivery queue
    Retry {
        /// Dead letter entry id
        id: String,
    },
    /// Replay every entry of one webhook
    RetryWebhook {
        webhook_id: i32,
    },
    /// Delete one entry without replaying it
    Delete {
        /// Dead letter entry id
        id: String,
    },
    /// Show dead letter counts and threshold state
    Metrics {
        /// Window for the recent counts, in hours
        #[arg(long, default_value = "24")]
        window_hours: u64,
    },
    /// Delete entries older than the retention period
    Cleanup {
        #[arg(long, env = "RELAY_RETENTION_DAYS", default_value = "30")]
        retention_days: u32,
    },
}

impl DeadLetterCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let config = self.connection.config();
        let rt = tokio::runtime::Runtime::new()?;

        rt.block_on(async move {
            let system = build_system(&config).await?;
            let dead_letters = system.dead_letters();

            match self.command {
                DeadLetterCommands::List { webhook_id } => {
                    let entries = dead_letters.list(webhook_id).await?;
                    print_entries(&entries);
                }
                DeadLetterCommands::Retry { id } => {
                    let item = system.retry_dead_letter(&id).await?;
                    info!(dead_letter_id = %id, item_id = %item.id, "Dead letter entry requeued");
                    println!(
                        "{} {} {} {}",
                        "Requeued".bright_green().bold(),
                        id.bright_cyan(),
                        "as".bright_white(),
                        item.id.bright_yellow()
                    );
                }
                DeadLetterCommands::RetryWebhook { webhook_id } => {
                    let result = system.retry_dead_letters_for_webhook(webhook_id).await?;
                    println!(
                        "{} {} {}",
                        "Requeued".bright_green().bold(),
                        result.replayed.len().to_string().bright_cyan(),
                        "entries".bright_white()
                    );
                    for (id, reason) in &result.failed {
                        println!(
                            "  {} {} {}",
                            "Skipped".bright_red(),
                            id.bright_cyan(),
                            reason.bright_white()
                        );
                    }
                }
                DeadLetterCommands::Delete { id } => {
                    if dead_letters.delete(&id).await? {
                        println!("{} {}", "Deleted".bright_green().bold(), id.bright_cyan());
                    } else {
                        println!("{} {}", "Not found:".bright_yellow(), id);
                    }
                }
                DeadLetterCommands::Metrics { window_hours } => {
                    let metrics = dead_letters
                        .get_metrics(Some(Duration::from_secs(window_hours * 60 * 60)))
                        .await?;
                    println!("{}", serde_json::to_string_pretty(&metrics)?);
                }
                DeadLetterCommands::Cleanup { retention_days } => {
                    let deleted = dead_letters.cleanup_old_items(retention_days).await?;
                    println!(
                        "{} {} {}",
                        "Deleted".bright_green().bold(),
                        deleted.to_string().bright_cyan(),
                        format!("entries older than {} days", retention_days).bright_white()
                    );
                }
            }

            Ok::<(), anyhow::Error>(())
        })
    }
}

fn print_entries(entries: &[DeadLetterItem]) {
    if entries.is_empty() {
        println!();
        println!("{}", "No dead letter entries.".bright_yellow());
        println!();
        return;
    }

    println!();
    for entry in entries {
        println!(
            "{} {} (webhook {})",
            "Entry:".bright_white().bold(),
            entry.id.bright_cyan(),
            entry.webhook_id.to_string().bright_yellow()
        );
        println!("  {} {}", "Event:".bright_white(), entry.event);
        println!(
            "  {} {}",
            "Reason:".bright_white(),
            entry.failure_reason.bright_red()
        );
        println!(
            "  {} {}",
            "Attempts:".bright_white(),
            entry.delivery_attempts.len()
        );
        println!(
            "  {} {}",
            "Last attempt:".bright_white(),
            entry.last_attempt_at.to_rfc3339()
        );
        println!(
            "  {} {}",
            "Created:".bright_white(),
            entry.created_at.to_rfc3339()
        );
        println!();
    }
    println!(
        "{} {}",
        "Total entries:".bright_white().bold(),
        entries.len().to_string().bright_cyan()
    );
    println!();
}
