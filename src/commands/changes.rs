//! Change log maintenance commands.

use clap::{Args, Subcommand};
use sheetsync_core::SyncContext;
use std::time::Duration;

use super::OutputFormat;

/// Process and maintain the change log
#[derive(Debug, Args)]
pub struct ChangesCommand {
    #[command(subcommand)]
    command: ChangesSubcommand,
}

#[derive(Debug, Subcommand)]
enum ChangesSubcommand {
    /// Drain one batch of pending entries
    Process,

    /// Purge applied entries older than the retention period
    Cleanup {
        /// Days to keep (default: engine.retention_days)
        #[arg(long)]
        retention_days: Option<u32>,
    },

    /// Show entry counts per status
    Stats {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Keep draining until interrupted
    Watch {
        /// Polling interval in seconds (default: engine.polling_interval_secs)
        #[arg(long)]
        interval: Option<u64>,
    },
}

impl ChangesCommand {
    /// Whether the command writes to spreadsheets.
    pub fn needs_sheets(&self) -> bool {
        matches!(
            self.command,
            ChangesSubcommand::Process | ChangesSubcommand::Watch { .. }
        )
    }

    pub async fn run(&self, ctx: &SyncContext) -> Result<(), Box<dyn std::error::Error>> {
        let processor = ctx.change_log_processor();
        match &self.command {
            ChangesSubcommand::Process => {
                let report = processor.process_pending_changes().await?;
                println!(
                    "Processed {} entr{}, {} error{}.",
                    report.processed_count,
                    if report.processed_count == 1 { "y" } else { "ies" },
                    report.error_count,
                    if report.error_count == 1 { "" } else { "s" }
                );
            }
            ChangesSubcommand::Cleanup { retention_days } => {
                let days = retention_days.unwrap_or(ctx.settings().retention_days);
                let purged = processor.cleanup_old_records(days).await?;
                println!("Purged {} applied entries older than {} days.", purged, days);
            }
            ChangesSubcommand::Stats { format } => {
                let stats = processor.get_stats().await?;
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                    OutputFormat::Text => {
                        println!("pending:    {}", stats.pending);
                        println!("processing: {}", stats.processing);
                        println!("applied:    {}", stats.applied);
                        println!("failed:     {}", stats.failed);
                        println!(
                            "exhausted:  {} (reached {} attempts)",
                            stats.exhausted, stats.max_attempts
                        );
                        match stats.oldest_pending {
                            Some(oldest) => println!("oldest pending: {}", oldest.to_rfc3339()),
                            None => println!("oldest pending: -"),
                        }
                    }
                }
            }
            ChangesSubcommand::Watch { interval } => {
                let interval = interval
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| ctx.settings().polling_interval());
                processor.start_processing(interval).await?;
                println!(
                    "Watching the change log every {}s. Press Ctrl-C to stop.",
                    interval.as_secs()
                );
                tokio::signal::ctrl_c().await?;
                processor.stop_processing().await;
                println!("Stopped.");
            }
        }
        Ok(())
    }
}
