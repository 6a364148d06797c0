use clap::Args;
use serde::Serialize;
use sheetsync_core::{ChangeLogStats, LedgerRecord, SyncContext};

use super::OutputFormat;

/// Show ledger flags and change log statistics
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Serialize)]
struct Status {
    ledger: Vec<LedgerRecord>,
    change_log: ChangeLogStats,
}

fn flag(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

impl StatusCommand {
    pub async fn run(&self, ctx: &SyncContext) -> Result<(), Box<dyn std::error::Error>> {
        let ledger = ctx.ledger().await?;
        let status = Status {
            ledger: ledger.list_records().await?,
            change_log: ctx.change_log_processor().get_stats().await?,
        };

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
            OutputFormat::Text => {
                println!("Ledger ({}!{})", ledger.spreadsheet_id(), ledger.sheet_name());
                println!("======\n");
                if status.ledger.is_empty() {
                    println!("  (no rows)");
                }
                for record in &status.ledger {
                    println!(
                        "  {:<10} {:<16} to_db: {:<3}  from_db: {}",
                        record.client_id,
                        record.table_name,
                        flag(record.exported_to_relation),
                        flag(record.exported_from_relation)
                    );
                }
                println!();

                let stats = &status.change_log;
                println!("Change log");
                println!("==========\n");
                println!("  pending:    {}", stats.pending);
                println!("  processing: {}", stats.processing);
                println!("  applied:    {}", stats.applied);
                println!(
                    "  failed:     {} ({} past {} attempts)",
                    stats.failed, stats.exhausted, stats.max_attempts
                );
                if let Some(oldest) = stats.oldest_pending {
                    println!("  oldest pending: {}", oldest.to_rfc3339());
                }
            }
        }
        Ok(())
    }
}
