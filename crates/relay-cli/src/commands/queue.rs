use super::context::{build_system, ConnectionArgs};
use chrono::Utc;
use clap::{Args, Subcommand};
use colored::Colorize;

#[derive(Args)]
pub struct QueueCommand {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: QueueCommands,
}

#[derive(Subcommand)]
enum QueueCommands {
    /// List pending items in claim order
    List,
}

impl QueueCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let config = self.connection.config();
        let rt = tokio::runtime::Runtime::new()?;

        rt.block_on(async move {
            let system = build_system(&config).await?;

            match self.command {
                QueueCommands::List => {
                    let items = system.queue().list().await?;
                    if items.is_empty() {
                        println!("{}", "Queue is empty.".bright_yellow());
                        return Ok(());
                    }

                    let now = Utc::now();
                    for item in &items {
                        let due = if item.is_due(now) {
                            "due".bright_green()
                        } else {
                            item.scheduled_for.to_rfc3339().bright_white()
                        };
                        println!(
                            "{} webhook={} event={} priority={} attempts={}/{} {}",
                            item.id.bright_cyan(),
                            item.webhook_id.to_string().bright_yellow(),
                            item.event,
                            item.priority,
                            item.retry_count,
                            item.max_retries,
                            due
                        );
                    }
                    println!(
                        "{} {}",
                        "Total items:".bright_white().bold(),
                        items.len().to_string().bright_cyan()
                    );
                }
            }

            Ok::<(), anyhow::Error>(())
        })
    }
}
