//! SheetSync Core Library
//!
//! Verified replication between relational tables and spreadsheet documents.
//!
//! The moving parts, leaf first:
//! - [`Registry`]: typed table mappings loaded once at startup
//! - [`CapacityManager`]: keeps each spreadsheet under its cell quota
//! - [`SnapshotEngine`]: full-table write-then-verify replication
//! - [`ChangeLogProcessor`]: incremental replication from the `change_log` table
//! - [`StatusLedger`]: per-(client, table) completion flags stored in a sheet
//! - [`SyncCoordinator`]: runs batches of tables through the engines

pub mod a1;
pub mod capacity;
pub mod changelog;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod mapping;
pub mod sheets;
pub mod snapshot;
pub mod store;
pub mod value;

pub use capacity::{CapacityManager, Dimensions, QuotaState, ReclaimReport, HARD_CELL_LIMIT};
pub use changelog::{
    ChangeLogEntry, ChangeLogProcessor, ChangeLogRepository, ChangeLogStats, ChangeOperation,
    ChangeStatus, DrainReport,
};
pub use context::{ContextOptions, EngineSettings, SyncContext};
pub use coordinator::{
    BatchReport, BatchSummary, SyncCoordinator, SyncRequest, TableOutcome, TableRunReport,
};
pub use error::{SheetError, StoreError, SyncError};
pub use ledger::{LedgerRecord, LedgerUpdate, StatusLedger};
pub use mapping::{MappingError, Registry, SyncDirection, TableMapping};
pub use sheets::{
    GoogleSheetsBackend, GoogleSheetsProvider, MemorySheetBackend, MemorySheetProvider,
    SheetBackend, SheetProperties, SheetProvider, SpreadsheetMetadata,
};
pub use snapshot::{SnapshotEngine, SnapshotOutcome, SnapshotPhase, SnapshotReport};
pub use store::{init_db, Mutation, RelationalStore, SelectQuery, SqliteStore};
pub use value::{Row, Value};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
