//! Full-sync batches from the command line.

use clap::Args;
use sheetsync_core::{
    BatchReport, SyncContext, SyncDirection, SyncError, SyncRequest, TableOutcome,
};

use super::OutputFormat;

/// Run a full sync batch
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Only sync this client
    #[arg(long)]
    client: Option<String>,

    /// Sheet or source table to sync (repeatable; default: every table in the ledger)
    #[arg(long = "table", short)]
    tables: Vec<String>,

    /// relation_to_sheet, sheet_to_relation or both
    #[arg(long, short, default_value = "both")]
    direction: SyncDirection,

    /// Re-run tables that are already marked as exported
    #[arg(long)]
    force: bool,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl SyncCommand {
    fn request(&self) -> SyncRequest {
        SyncRequest {
            client_id: self.client.clone(),
            tables: self.tables.clone(),
            force_full_sync: self.force,
            direction: self.direction,
        }
    }

    pub async fn run(&self, ctx: &SyncContext) -> Result<(), SyncCommandError> {
        let report = ctx.coordinator().run(self.request()).await?;
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Text => print_report(&report),
        }
        if report.summary.errors > 0 || report.summary.unconfirmed > 0 {
            return Err(SyncCommandError::Incomplete {
                failed: report.summary.errors + report.summary.unconfirmed,
            });
        }
        Ok(())
    }
}

fn print_report(report: &BatchReport) {
    println!("Sync run {}", report.run_id);
    println!();

    if report.tables.is_empty() {
        println!("Nothing to sync.");
        return;
    }

    for table in &report.tables {
        let direction = table
            .direction
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = match &table.outcome {
            TableOutcome::Confirmed { verified_records } => {
                format!("✓ confirmed ({} rows)", verified_records)
            }
            TableOutcome::NoOp => "✓ nothing to do".to_string(),
            TableOutcome::Skipped { reason } => format!("- skipped: {}", reason),
            TableOutcome::Unconfirmed { reason } => format!("✗ unconfirmed: {}", reason),
            TableOutcome::Error { reason, .. } => format!("✗ error: {}", reason),
        };
        println!(
            "  {:<10} {:<16} {:<18} {}",
            table.client_id, table.table_name, direction, status
        );
    }

    let s = &report.summary;
    println!();
    println!(
        "{} confirmed, {} unconfirmed, {} no-op, {} skipped, {} errors",
        s.confirmed, s.unconfirmed, s.no_op, s.skipped, s.errors
    );
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    Sync(SyncError),
    Output(serde_json::Error),
    Incomplete { failed: usize },
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::Sync(e) => write!(f, "{}", e),
            SyncCommandError::Output(e) => write!(f, "Failed to render report: {}", e),
            SyncCommandError::Incomplete { failed } => {
                write!(f, "{} table run(s) did not complete", failed)
            }
        }
    }
}

impl std::error::Error for SyncCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncCommandError::Sync(e) => Some(e),
            SyncCommandError::Output(e) => Some(e),
            SyncCommandError::Incomplete { .. } => None,
        }
    }
}

impl From<SyncError> for SyncCommandError {
    fn from(e: SyncError) -> Self {
        SyncCommandError::Sync(e)
    }
}

impl From<serde_json::Error> for SyncCommandError {
    fn from(e: serde_json::Error) -> Self {
        SyncCommandError::Output(e)
    }
}
