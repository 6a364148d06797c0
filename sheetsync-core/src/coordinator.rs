//! Batch orchestration.
//!
//! The coordinator discovers clients and their tables from the status ledger,
//! decides what to run, reclaims capacity for the sheets about to be rewritten
//! and then runs one table at a time. A failing table never aborts the batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::capacity::CapacityManager;
use crate::error::SyncError;
use crate::ledger::{LedgerRecord, StatusLedger};
use crate::mapping::{Registry, SyncDirection, TableMapping};
use crate::sheets::{SheetBackend, SheetProvider};
use crate::snapshot::{LedgerTarget, SnapshotEngine, SnapshotOutcome, SnapshotReport};

fn default_direction() -> SyncDirection {
    SyncDirection::Both
}

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Restrict the batch to one client.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Sheet or source table names. Empty means every table in the client's ledger rows.
    #[serde(default)]
    pub tables: Vec<String>,
    /// Re-run tables whose ledger flag is already set.
    #[serde(default)]
    pub force_full_sync: bool,
    #[serde(default = "default_direction")]
    pub direction: SyncDirection,
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self {
            client_id: None,
            tables: Vec::new(),
            force_full_sync: false,
            direction: SyncDirection::Both,
        }
    }
}

impl SyncRequest {
    pub fn new(direction: SyncDirection) -> Self {
        Self {
            direction,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableOutcome {
    Confirmed { verified_records: usize },
    Unconfirmed { reason: String },
    NoOp,
    Skipped { reason: String },
    Error { kind: String, reason: String },
}

impl TableOutcome {
    fn from_result(result: &Result<SnapshotReport, SyncError>) -> Self {
        match result {
            Ok(report) => match &report.outcome {
                SnapshotOutcome::Confirmed { verified_records } => TableOutcome::Confirmed {
                    verified_records: *verified_records,
                },
                SnapshotOutcome::NoOp => TableOutcome::NoOp,
                SnapshotOutcome::Unconfirmed { reason } => TableOutcome::Unconfirmed {
                    reason: reason.clone(),
                },
            },
            Err(SyncError::ConfigurationGap(reason)) => TableOutcome::Skipped {
                reason: reason.clone(),
            },
            Err(e) => TableOutcome::Error {
                kind: e.kind().to_string(),
                reason: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableRunReport {
    pub client_id: String,
    pub spreadsheet_id: String,
    pub table_name: String,
    pub direction: Option<SyncDirection>,
    pub outcome: TableOutcome,
    pub records_written: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub confirmed: usize,
    pub unconfirmed: usize,
    pub no_op: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl BatchSummary {
    fn from_tables(tables: &[TableRunReport]) -> Self {
        let mut summary = Self::default();
        for table in tables {
            match table.outcome {
                TableOutcome::Confirmed { .. } => summary.confirmed += 1,
                TableOutcome::Unconfirmed { .. } => summary.unconfirmed += 1,
                TableOutcome::NoOp => summary.no_op += 1,
                TableOutcome::Skipped { .. } => summary.skipped += 1,
                TableOutcome::Error { .. } => summary.errors += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.confirmed + self.unconfirmed + self.no_op + self.skipped + self.errors
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub request: SyncRequest,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables: Vec<TableRunReport>,
    pub summary: BatchSummary,
}

struct Job<'a> {
    mapping: &'a TableMapping,
    direction: SyncDirection,
    /// The table name as written in the ledger row.
    ledger_name: &'a str,
}

pub struct SyncCoordinator {
    engine: SnapshotEngine,
    registry: Arc<Registry>,
    sheets: Arc<dyn SheetProvider>,
    capacity: CapacityManager,
    sheet_lock: Arc<Mutex<()>>,
    ledger_spreadsheet_id: Option<String>,
    ledger_sheet: String,
    table_pause: Duration,
}

impl SyncCoordinator {
    pub fn new(
        engine: SnapshotEngine,
        registry: Arc<Registry>,
        sheets: Arc<dyn SheetProvider>,
        capacity: CapacityManager,
        sheet_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            engine,
            registry,
            sheets,
            capacity,
            sheet_lock,
            ledger_spreadsheet_id: None,
            ledger_sheet: crate::ledger::DEFAULT_LEDGER_SHEET.to_string(),
            table_pause: Duration::from_secs(2),
        }
    }

    pub fn with_ledger(mut self, spreadsheet_id: Option<String>, sheet: impl Into<String>) -> Self {
        self.ledger_spreadsheet_id = spreadsheet_id;
        self.ledger_sheet = sheet.into();
        self
    }

    pub fn with_table_pause(mut self, pause: Duration) -> Self {
        self.table_pause = pause;
        self
    }

    /// Runs one batch.
    ///
    /// Only a missing or unreadable ledger fails the whole call; everything
    /// after that is reported per table.
    pub async fn run(&self, request: SyncRequest) -> Result<BatchReport, SyncError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            %run_id,
            direction = %request.direction,
            force = request.force_full_sync,
            "Starting sync batch"
        );

        let ledger_id = self.ledger_spreadsheet_id.as_deref().ok_or_else(|| {
            SyncError::ConfigurationGap("no ledger spreadsheet configured".into())
        })?;
        let ledger = StatusLedger::new(self.sheets.open(ledger_id).await?, self.ledger_sheet.clone());
        let records = ledger
            .list_records()
            .await
            .map_err(|e| SyncError::from_sheet(ledger.sheet_name(), e))?;

        let mut clients: BTreeMap<(String, String), Vec<LedgerRecord>> = BTreeMap::new();
        for record in records {
            if request
                .client_id
                .as_deref()
                .is_some_and(|c| c != record.client_id)
            {
                continue;
            }
            clients
                .entry((record.client_id.clone(), record.spreadsheet_id.clone()))
                .or_default()
                .push(record);
        }
        if clients.is_empty() {
            warn!(client = ?request.client_id, "No ledger rows to sync");
        }

        let mut tables = Vec::new();
        for ((client_id, spreadsheet_id), records) in &clients {
            self.run_client(&request, &ledger, client_id, spreadsheet_id, records, &mut tables)
                .await;
        }

        let summary = BatchSummary::from_tables(&tables);
        info!(
            %run_id,
            confirmed = summary.confirmed,
            unconfirmed = summary.unconfirmed,
            no_op = summary.no_op,
            skipped = summary.skipped,
            errors = summary.errors,
            "Sync batch finished"
        );

        Ok(BatchReport {
            run_id,
            request,
            started_at,
            finished_at: Utc::now(),
            tables,
            summary,
        })
    }

    async fn run_client(
        &self,
        request: &SyncRequest,
        ledger: &StatusLedger,
        client_id: &str,
        spreadsheet_id: &str,
        records: &[LedgerRecord],
        out: &mut Vec<TableRunReport>,
    ) {
        let skipped = |table: &str, direction: Option<SyncDirection>, reason: String| {
            TableRunReport {
                client_id: client_id.to_string(),
                spreadsheet_id: spreadsheet_id.to_string(),
                table_name: table.to_string(),
                direction,
                outcome: TableOutcome::Skipped { reason },
                records_written: 0,
                elapsed_ms: 0,
            }
        };

        let names: Vec<&str> = if request.tables.is_empty() {
            records.iter().map(|r| r.table_name.as_str()).collect()
        } else {
            request.tables.iter().map(String::as_str).collect()
        };

        let mut forward = Vec::new();
        let mut backward = Vec::new();
        for name in names {
            let Some(mapping) = self.registry.get(name) else {
                let err = SyncError::ConfigurationGap(format!("no mapping for table '{}'", name));
                warn!(client = client_id, table = name, "{}", err);
                out.push(skipped(name, None, err.to_string()));
                continue;
            };
            if request.tables.is_empty() && !mapping.is_enabled() {
                out.push(skipped(mapping.sheet_name(), None, "table disabled".into()));
                continue;
            }

            let directions = request.direction.intersect(mapping.direction());
            if directions.is_empty() {
                out.push(skipped(
                    mapping.sheet_name(),
                    Some(request.direction),
                    format!("table replicates {} only", mapping.direction()),
                ));
                continue;
            }

            let record = records
                .iter()
                .find(|r| r.table_name == mapping.sheet_name() || r.table_name == mapping.source_table());
            for direction in directions {
                let done = record.is_some_and(|r| match direction {
                    SyncDirection::RelationToSheet => r.exported_from_relation,
                    _ => r.exported_to_relation,
                });
                if done && !request.force_full_sync {
                    info!(
                        client = client_id,
                        table = mapping.sheet_name(),
                        %direction,
                        "Already exported, skipping"
                    );
                    out.push(skipped(
                        mapping.sheet_name(),
                        Some(direction),
                        "already exported".into(),
                    ));
                    continue;
                }
                let job = Job {
                    mapping,
                    direction,
                    ledger_name: record.map_or(mapping.sheet_name(), |r| r.table_name.as_str()),
                };
                match direction {
                    SyncDirection::RelationToSheet => forward.push(job),
                    _ => backward.push(job),
                }
            }
        }

        if forward.is_empty() && backward.is_empty() {
            return;
        }

        let backend = match self.sheets.open(spreadsheet_id).await {
            Ok(backend) => backend,
            Err(e) => {
                let err = SyncError::from_sheet(spreadsheet_id, e);
                error!(client = client_id, spreadsheet = spreadsheet_id, error = %err, "Could not open spreadsheet");
                for job in forward.iter().chain(backward.iter()) {
                    out.push(TableRunReport {
                        client_id: client_id.to_string(),
                        spreadsheet_id: spreadsheet_id.to_string(),
                        table_name: job.mapping.sheet_name().to_string(),
                        direction: Some(job.direction),
                        outcome: TableOutcome::Error {
                            kind: err.kind().to_string(),
                            reason: err.to_string(),
                        },
                        records_written: 0,
                        elapsed_ms: 0,
                    });
                }
                return;
            }
        };

        let scheduled: Vec<String> = forward
            .iter()
            .map(|job| job.mapping.sheet_name().to_string())
            .collect();
        if !scheduled.is_empty() {
            let _guard = self.sheet_lock.lock().await;
            let reclaimed = self.capacity.ensure_capacity(backend.as_ref(), &scheduled).await;
            if reclaimed.triggered {
                info!(
                    client = client_id,
                    deleted = reclaimed.deleted.len(),
                    shrunk = reclaimed.shrunk.len(),
                    failed = reclaimed.failed.len(),
                    "Capacity reclaimed"
                );
            }
        }

        for (idx, job) in forward.iter().chain(backward.iter()).enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.table_pause).await;
            }
            let target = LedgerTarget {
                ledger,
                client_id,
                table_name: job.ledger_name,
            };
            out.push(
                self.run_job(backend.as_ref(), job, target, spreadsheet_id)
                    .await,
            );
        }
    }

    async fn run_job(
        &self,
        backend: &dyn SheetBackend,
        job: &Job<'_>,
        target: LedgerTarget<'_>,
        spreadsheet_id: &str,
    ) -> TableRunReport {
        let table = job.mapping.sheet_name();
        let result = {
            let _guard = self.sheet_lock.lock().await;
            self.engine
                .run(backend, job.mapping, job.direction, Some(target))
                .await
        };

        let outcome = TableOutcome::from_result(&result);
        match &result {
            Ok(report) => info!(
                client = target.client_id,
                table,
                direction = %job.direction,
                outcome = ?report.outcome,
                elapsed_ms = report.elapsed_ms,
                "Table finished"
            ),
            Err(SyncError::ConfigurationGap(reason)) => {
                warn!(client = target.client_id, table, reason = %reason, "Table skipped")
            }
            Err(e) => error!(
                client = target.client_id,
                table,
                direction = %job.direction,
                retryable = e.is_retryable(),
                error = %e,
                "Table failed"
            ),
        }

        let (records_written, elapsed_ms) = match &result {
            Ok(report) => (report.records_written, report.elapsed_ms),
            Err(_) => (0, 0),
        };
        TableRunReport {
            client_id: target.client_id.to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            table_name: table.to_string(),
            direction: Some(job.direction),
            outcome,
            records_written,
            elapsed_ms,
        }
    }
}
