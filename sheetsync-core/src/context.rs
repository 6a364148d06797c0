//! Process-wide sync context.
//!
//! Built once at startup and passed by reference. It owns the database pool,
//! the registry, the sheet provider and the lock that serialises every writer
//! of the spreadsheets.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use crate::capacity::{CapacityManager, HARD_CELL_LIMIT};
use crate::changelog::{ChangeLogProcessor, ChangeLogRepository};
use crate::coordinator::SyncCoordinator;
use crate::error::SyncError;
use crate::ledger::{StatusLedger, DEFAULT_LEDGER_SHEET};
use crate::mapping::Registry;
use crate::sheets::SheetProvider;
use crate::snapshot::SnapshotEngine;
use crate::store::{init_db, RelationalStore, SqliteStore};

/// Timing and batching knobs, as found under `engine:` in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Wait between writing a snapshot and reading it back.
    pub settle_delay_ms: u64,
    /// Pause between two tables of a batch.
    pub table_pause_ms: u64,
    /// Pause between two reclamation operations.
    pub reclaim_pause_ms: u64,
    /// Wait after a reclamation pass that touched a sheet.
    pub reclaim_settle_ms: u64,
    pub polling_interval_secs: u64,
    pub change_batch_size: u32,
    pub max_attempts: u32,
    pub retention_days: u32,
    pub cleanup_batch_size: u32,
    pub hard_cell_limit: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            settle_delay_ms: 3_000,
            table_pause_ms: 2_000,
            reclaim_pause_ms: 1_000,
            reclaim_settle_ms: 5_000,
            polling_interval_secs: 30,
            change_batch_size: 100,
            max_attempts: 3,
            retention_days: 30,
            cleanup_batch_size: 1_000,
            hard_cell_limit: HARD_CELL_LIMIT,
        }
    }
}

impl EngineSettings {
    /// Defaults with every delay set to zero.
    pub fn immediate() -> Self {
        Self {
            settle_delay_ms: 0,
            table_pause_ms: 0,
            reclaim_pause_ms: 0,
            reclaim_settle_ms: 0,
            ..Self::default()
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn table_pause(&self) -> Duration {
        Duration::from_millis(self.table_pause_ms)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn capacity_manager(&self) -> CapacityManager {
        CapacityManager::new(self.hard_cell_limit).with_pauses(
            Duration::from_millis(self.reclaim_pause_ms),
            Duration::from_millis(self.reclaim_settle_ms),
        )
    }
}

/// Everything [`SyncContext::open`] needs.
pub struct ContextOptions {
    pub database_path: PathBuf,
    pub registry: Registry,
    pub sheets: Arc<dyn SheetProvider>,
    /// Target of change-log replication.
    pub spreadsheet_id: Option<String>,
    /// Document holding the status ledger.
    pub ledger_spreadsheet_id: Option<String>,
    pub ledger_sheet: String,
    pub settings: EngineSettings,
}

impl ContextOptions {
    pub fn new(database_path: impl Into<PathBuf>, sheets: Arc<dyn SheetProvider>) -> Self {
        Self {
            database_path: database_path.into(),
            registry: Registry::default(),
            sheets,
            spreadsheet_id: None,
            ledger_spreadsheet_id: None,
            ledger_sheet: DEFAULT_LEDGER_SHEET.to_string(),
            settings: EngineSettings::default(),
        }
    }
}

pub struct SyncContext {
    pool: SqlitePool,
    store: Arc<dyn RelationalStore>,
    registry: Arc<Registry>,
    sheets: Arc<dyn SheetProvider>,
    settings: EngineSettings,
    ledger_spreadsheet_id: Option<String>,
    ledger_sheet: String,
    sheet_lock: Arc<Mutex<()>>,
    processor: ChangeLogProcessor,
}

impl SyncContext {
    /// Opens the database (running migrations) and wires the engines.
    pub async fn open(options: ContextOptions) -> Result<Self, SyncError> {
        let pool = init_db(&options.database_path).await?;
        let store: Arc<dyn RelationalStore> = Arc::new(SqliteStore::new(pool.clone()));
        let registry = Arc::new(options.registry);
        let sheet_lock = Arc::new(Mutex::new(()));

        let processor = ChangeLogProcessor::new(
            ChangeLogRepository::new(pool.clone()),
            store.clone(),
            options.sheets.clone(),
            registry.clone(),
            &options.settings,
            options.spreadsheet_id.clone(),
            sheet_lock.clone(),
        );

        info!(
            database = %options.database_path.display(),
            tables = registry.len(),
            "Sync context opened"
        );

        Ok(Self {
            pool,
            store,
            registry,
            sheets: options.sheets,
            settings: options.settings,
            ledger_spreadsheet_id: options.ledger_spreadsheet_id,
            ledger_sheet: options.ledger_sheet,
            sheet_lock,
            processor,
        })
    }

    /// Stops the change-log loop and closes the pool.
    pub async fn close(&self) {
        if self.processor.is_running() {
            self.processor.stop_processing().await;
        }
        self.pool.close().await;
        info!("Sync context closed");
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn store(&self) -> Arc<dyn RelationalStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn sheet_lock(&self) -> Arc<Mutex<()>> {
        self.sheet_lock.clone()
    }

    pub fn change_log_processor(&self) -> &ChangeLogProcessor {
        &self.processor
    }

    /// Opens the status ledger document.
    pub async fn ledger(&self) -> Result<StatusLedger, SyncError> {
        let id = self.ledger_spreadsheet_id.as_deref().ok_or_else(|| {
            SyncError::ConfigurationGap("no ledger spreadsheet configured".into())
        })?;
        let backend = self.sheets.open(id).await?;
        Ok(StatusLedger::new(backend, self.ledger_sheet.clone()))
    }

    pub fn snapshot_engine(&self) -> SnapshotEngine {
        SnapshotEngine::new(
            self.store.clone(),
            self.settings.capacity_manager(),
            self.settings.settle_delay(),
        )
    }

    /// A coordinator that owns everything it needs, so it can be moved into a task.
    pub fn coordinator(&self) -> SyncCoordinator {
        SyncCoordinator::new(
            self.snapshot_engine(),
            self.registry.clone(),
            self.sheets.clone(),
            self.settings.capacity_manager(),
            self.sheet_lock.clone(),
        )
        .with_ledger(self.ledger_spreadsheet_id.clone(), self.ledger_sheet.clone())
        .with_table_pause(self.settings.table_pause())
    }
}
