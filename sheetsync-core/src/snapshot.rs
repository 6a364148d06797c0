//! Verified full-table replication.
//!
//! A snapshot run replaces the target with the newest `max_records` rows of
//! the source in key order, then reads the target back. Only a read-back that finds at least one
//! data row counts as success, and only success touches the status ledger:
//! the hosted spreadsheet acknowledges writes it later drops, so the write
//! acknowledgement alone proves nothing.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::a1::{block_range, column_range, WHOLE_SHEET};
use crate::capacity::CapacityManager;
use crate::error::{SheetError, SyncError};
use crate::ledger::{LedgerUpdate, StatusLedger};
use crate::mapping::{SyncDirection, TableMapping};
use crate::sheets::SheetBackend;
use crate::store::{Mutation, RelationalStore, SelectQuery};
use crate::value::{Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPhase {
    Idle,
    Preparing,
    Fetching,
    Clearing,
    Writing,
    Settling,
    Verifying,
    Confirmed,
    Unconfirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SnapshotOutcome {
    /// The read-back found `verified_records` data rows.
    Confirmed { verified_records: usize },
    /// The source was empty; nothing was written.
    NoOp,
    /// The write was acknowledged but could not be confirmed.
    Unconfirmed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotReport {
    pub sheet_name: String,
    pub source_table: String,
    pub direction: SyncDirection,
    pub outcome: SnapshotOutcome,
    pub final_phase: SnapshotPhase,
    pub records_written: usize,
    pub ledger_updated: bool,
    pub elapsed_ms: u64,
}

/// Where to record a confirmed run.
#[derive(Clone, Copy)]
pub struct LedgerTarget<'a> {
    pub ledger: &'a StatusLedger,
    pub client_id: &'a str,
    /// Table name of the ledger row, which may be the sheet or the source table.
    pub table_name: &'a str,
}

struct Run<'a> {
    mapping: &'a TableMapping,
    direction: SyncDirection,
    phase: SnapshotPhase,
    started: Instant,
}

impl<'a> Run<'a> {
    fn new(mapping: &'a TableMapping, direction: SyncDirection) -> Self {
        Self {
            mapping,
            direction,
            phase: SnapshotPhase::Idle,
            started: Instant::now(),
        }
    }

    fn enter(&mut self, phase: SnapshotPhase) {
        debug!(
            sheet = self.mapping.sheet_name(),
            direction = %self.direction,
            from = ?self.phase,
            to = ?phase,
            "Snapshot phase"
        );
        self.phase = phase;
    }

    fn report(
        self,
        outcome: SnapshotOutcome,
        records_written: usize,
        ledger_updated: bool,
    ) -> SnapshotReport {
        SnapshotReport {
            sheet_name: self.mapping.sheet_name().to_string(),
            source_table: self.mapping.source_table().to_string(),
            direction: self.direction,
            outcome,
            final_phase: self.phase,
            records_written,
            ledger_updated,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Orders primary key values numerically when both sides are integers.
fn compare_keys(a: &Value, b: &Value) -> std::cmp::Ordering {
    let a_text = a.to_cell_text();
    let b_text = b.to_cell_text();
    match (a_text.trim().parse::<i64>(), b_text.trim().parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a_text.cmp(&b_text),
    }
}

/// Data rows in a first-column read-back: non-blank rows minus the header.
pub fn count_verified_rows(column: &[Vec<String>]) -> usize {
    column
        .iter()
        .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .count()
        .saturating_sub(1)
}

pub struct SnapshotEngine {
    store: Arc<dyn RelationalStore>,
    capacity: CapacityManager,
    settle_delay: Duration,
}

impl SnapshotEngine {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        capacity: CapacityManager,
        settle_delay: Duration,
    ) -> Self {
        Self {
            store,
            capacity,
            settle_delay,
        }
    }

    /// Runs one direction. `Both` is not a single run and is rejected.
    pub async fn run(
        &self,
        backend: &dyn SheetBackend,
        mapping: &TableMapping,
        direction: SyncDirection,
        ledger: Option<LedgerTarget<'_>>,
    ) -> Result<SnapshotReport, SyncError> {
        match direction {
            SyncDirection::RelationToSheet => {
                self.relation_to_sheet(backend, mapping, ledger).await
            }
            SyncDirection::SheetToRelation => {
                self.sheet_to_relation(backend, mapping, ledger).await
            }
            SyncDirection::Both => Err(SyncError::ConfigurationGap(
                "a snapshot run needs a single direction".into(),
            )),
        }
    }

    /// Replaces the sheet content with the source table.
    pub async fn relation_to_sheet(
        &self,
        backend: &dyn SheetBackend,
        mapping: &TableMapping,
        ledger: Option<LedgerTarget<'_>>,
    ) -> Result<SnapshotReport, SyncError> {
        let sheet = mapping.sheet_name();
        let sheet_err = |e| SyncError::from_sheet(sheet, e);
        let mut run = Run::new(mapping, SyncDirection::RelationToSheet);

        run.enter(SnapshotPhase::Preparing);
        let available = self.store.count(mapping.source_table()).await?;
        let estimate = available.min(mapping.max_records() as u64);
        if estimate == 0 {
            info!(sheet, table = mapping.source_table(), "Source table is empty, nothing to do");
            return Ok(run.report(SnapshotOutcome::NoOp, 0, false));
        }
        match self.capacity.ensure_sheet(backend, sheet, estimate).await {
            Ok(_) => {}
            Err(SheetError::QuotaExceeded(message)) => {
                warn!(sheet, %message, "No room to create sheet");
                return self
                    .conclude(run, 0, estimate as usize, None, LedgerUpdate::from_relation(true))
                    .await;
            }
            Err(e) => return Err(sheet_err(e)),
        }

        run.enter(SnapshotPhase::Fetching);
        let query = SelectQuery::new(mapping.source_table())
            .columns(mapping.field_names())
            .order_by_desc(mapping.primary_key())
            .limit(mapping.max_records());
        let mut rows = self.store.fetch_all(&query).await?;
        if rows.is_empty() {
            info!(sheet, "No rows fetched, nothing to do");
            return Ok(run.report(SnapshotOutcome::NoOp, 0, false));
        }
        rows.reverse();

        let mut payload = Vec::with_capacity(rows.len() + 1);
        payload.push(mapping.header_row());
        payload.extend(rows.iter().map(|row| mapping.render_row(row)));
        info!(sheet, records = rows.len(), "Prepared snapshot payload");

        let grid = self
            .capacity
            .fit_payload(
                backend,
                sheet,
                payload.len() as u32,
                mapping.column_count() as u32,
            )
            .await
            .map_err(sheet_err)?;
        if payload.len() > grid.rows as usize || mapping.column_count() > grid.cols as usize {
            warn!(
                sheet,
                records = rows.len(),
                rows = grid.rows,
                cols = grid.cols,
                "Truncating payload to the sheet grid"
            );
            // keep the header and the newest rows that fit
            let keep = (grid.rows as usize).saturating_sub(1);
            let data_rows = payload.len() - 1;
            if data_rows > keep {
                payload.drain(1..1 + data_rows - keep);
            }
            for row in payload.iter_mut() {
                row.truncate(grid.cols as usize);
            }
        }
        let written = payload.len().saturating_sub(1);
        let height = payload.len();
        let width = payload.iter().map(Vec::len).max().unwrap_or(0);

        run.enter(SnapshotPhase::Clearing);
        backend
            .clear_range(sheet, WHOLE_SHEET)
            .await
            .map_err(sheet_err)?;

        run.enter(SnapshotPhase::Writing);
        let range = block_range(height, width);
        backend
            .update_range(sheet, &range, &payload)
            .await
            .map_err(sheet_err)?;
        debug!(sheet, range = %range, "Wrote payload");

        run.enter(SnapshotPhase::Settling);
        tokio::time::sleep(self.settle_delay).await;

        run.enter(SnapshotPhase::Verifying);
        let column = backend
            .get_range(sheet, &column_range(1))
            .await
            .map_err(sheet_err)?;
        let verified = count_verified_rows(&column);

        self.conclude(
            run,
            verified,
            written,
            ledger,
            LedgerUpdate::from_relation(true),
        )
        .await
    }

    /// Upserts the sheet rows into the source table.
    ///
    /// The relational table is never cleared: it is the system of record and
    /// the sheet may hold only a capped subset of it.
    pub async fn sheet_to_relation(
        &self,
        backend: &dyn SheetBackend,
        mapping: &TableMapping,
        ledger: Option<LedgerTarget<'_>>,
    ) -> Result<SnapshotReport, SyncError> {
        let sheet = mapping.sheet_name();
        let sheet_err = |e| SyncError::from_sheet(sheet, e);
        let mut run = Run::new(mapping, SyncDirection::SheetToRelation);

        run.enter(SnapshotPhase::Preparing);
        if !backend.sheet_exists(sheet).await.map_err(sheet_err)? {
            info!(sheet, "Source sheet does not exist, nothing to do");
            return Ok(run.report(SnapshotOutcome::NoOp, 0, false));
        }

        run.enter(SnapshotPhase::Fetching);
        let values = backend
            .get_range(sheet, WHOLE_SHEET)
            .await
            .map_err(sheet_err)?;
        let Some((headers, data)) = values.split_first() else {
            return Ok(run.report(SnapshotOutcome::NoOp, 0, false));
        };

        let columns = mapping.resolve_headers(headers);
        if !columns
            .iter()
            .any(|c| c.as_deref() == Some(mapping.primary_key()))
        {
            return Err(SyncError::ConfigurationGap(format!(
                "sheet '{}' has no '{}' column",
                sheet,
                mapping.primary_key()
            )));
        }

        let pk = mapping.primary_key();
        let mut rows: Vec<Row> = data
            .iter()
            .filter_map(|cells| mapping.parse_row(&columns, cells))
            .collect();

        // the last occurrence of a key wins, as it would in the sheet
        let mut seen = HashSet::new();
        rows.reverse();
        rows.retain(|row| seen.insert(row[pk].to_cell_text()));
        rows.reverse();

        rows.sort_by(|a, b| compare_keys(&a[pk], &b[pk]));
        rows.truncate(mapping.max_records() as usize);
        if rows.is_empty() {
            info!(sheet, "Sheet has no data rows, nothing to do");
            return Ok(run.report(SnapshotOutcome::NoOp, 0, false));
        }

        run.enter(SnapshotPhase::Writing);
        let keys: Vec<Value> = rows.iter().map(|row| row[pk].clone()).collect();
        let batch_size = mapping.batch_size() as usize;
        let written = rows.len();
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            let batch: Vec<Mutation> = rows
                .by_ref()
                .take(batch_size)
                .map(|row| Mutation::Upsert {
                    primary_key: pk.to_string(),
                    row,
                })
                .collect();
            debug!(sheet, rows = batch.len(), "Applying batch");
            self.store
                .apply_batch(mapping.source_table(), batch)
                .await?;
        }

        run.enter(SnapshotPhase::Verifying);
        let mut verified = 0;
        for chunk in keys.chunks(batch_size) {
            let query = SelectQuery::new(mapping.source_table())
                .columns(vec![pk.to_string()])
                .where_in(pk, chunk.to_vec());
            verified += self.store.fetch_all(&query).await?.len();
        }

        self.conclude(
            run,
            verified,
            written,
            ledger,
            LedgerUpdate::to_relation(true),
        )
        .await
    }

    async fn conclude(
        &self,
        mut run: Run<'_>,
        verified: usize,
        written: usize,
        ledger: Option<LedgerTarget<'_>>,
        update: LedgerUpdate,
    ) -> Result<SnapshotReport, SyncError> {
        let mapping = run.mapping;
        let sheet = mapping.sheet_name();

        if verified == 0 {
            run.enter(SnapshotPhase::Unconfirmed);
            let err = SyncError::VerificationFailed {
                sheet: sheet.to_string(),
                expected: written,
                verified,
            };
            error!(sheet, direction = %run.direction, "{}", err);
            return Ok(run.report(
                SnapshotOutcome::Unconfirmed {
                    reason: err.to_string(),
                },
                written,
                false,
            ));
        }

        run.enter(SnapshotPhase::Confirmed);
        if verified < written {
            warn!(sheet, verified, written, "Read-back found fewer rows than written");
        }
        info!(sheet, direction = %run.direction, verified, "Snapshot confirmed");

        let mut ledger_updated = false;
        if let Some(target) = ledger {
            match target
                .ledger
                .update_record(target.client_id, target.table_name, update)
                .await
            {
                Ok(updated) => ledger_updated = updated,
                Err(e) => {
                    error!(sheet, client = target.client_id, error = %e, "Could not update ledger");
                }
            }
        }

        Ok(run.report(
            SnapshotOutcome::Confirmed {
                verified_records: verified,
            },
            written,
            ledger_updated,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::Registry;
    use crate::sheets::MemorySheetBackend;
    use crate::store::SqliteStore;
    use tempfile::TempDir;

    const MAPPINGS: &str = r#"
- source_table: price_wb
  sheet_name: wb_price
  primary_key: id
  direction: both
  max_records: 1000
  batch_size: 200
  money_fields: [price]
  fields:
    - { source: id, header: ID }
    - { source: nm_id, header: Article }
    - { source: price, header: Price }
"#;

    struct Fixture {
        store: Arc<SqliteStore>,
        engine: SnapshotEngine,
        registry: Registry,
        backend: Arc<MemorySheetBackend>,
        ledger_backend: Arc<MemorySheetBackend>,
        ledger: StatusLedger,
        _dir: TempDir,
    }

    impl Fixture {
        fn mapping(&self) -> &TableMapping {
            self.registry.get("wb_price").unwrap()
        }

        fn target(&self) -> Option<LedgerTarget<'_>> {
            Some(LedgerTarget {
                ledger: &self.ledger,
                client_id: "c1",
                table_name: "wb_price",
            })
        }

        async fn ledger_flags(&self) -> (bool, bool) {
            let record = self
                .ledger
                .find_record("c1", "wb_price")
                .await
                .unwrap()
                .unwrap();
            (record.exported_to_relation, record.exported_from_relation)
        }

        async fn insert_rows(&self, count: i64) {
            for id in 1..=count {
                sqlx::query("INSERT INTO price_wb (id, nm_id, price) VALUES (?, ?, ?)")
                    .bind(id)
                    .bind(if id % 7 == 0 { None } else { Some(format!("NM-{}", id)) })
                    .bind(id * 150)
                    .execute(self.store.pool())
                    .await
                    .unwrap();
            }
        }
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(&dir.path().join("test.db")).await.unwrap());
        sqlx::query("CREATE TABLE price_wb (id INTEGER PRIMARY KEY, nm_id TEXT, price INTEGER)")
            .execute(store.pool())
            .await
            .unwrap();

        let ledger_backend = Arc::new(MemorySheetBackend::new("admin").with_sheet("tech", 100, 7));
        ledger_backend
            .update_range(
                "tech",
                "A1",
                &[
                    vec!["client".into(), "spreadsheet".into(), "table".into()],
                    vec!["c1".into(), "doc-1".into(), "wb_price".into()],
                ],
            )
            .await
            .unwrap();

        let engine = SnapshotEngine::new(
            store.clone(),
            CapacityManager::default().with_pauses(Duration::ZERO, Duration::ZERO),
            Duration::ZERO,
        );

        Fixture {
            store,
            engine,
            registry: Registry::from_yaml_str(MAPPINGS).unwrap(),
            backend: Arc::new(MemorySheetBackend::new("doc-1").with_sheet("Sheet1", 1000, 26)),
            ledger: StatusLedger::new(ledger_backend.clone(), "tech"),
            ledger_backend,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_row_count_round_trip() {
        let f = fixture().await;
        f.insert_rows(500).await;

        let report = f
            .engine
            .relation_to_sheet(f.backend.as_ref(), f.mapping(), f.target())
            .await
            .unwrap();

        assert_eq!(
            report.outcome,
            SnapshotOutcome::Confirmed {
                verified_records: 500
            }
        );
        assert_eq!(report.final_phase, SnapshotPhase::Confirmed);
        assert!(report.ledger_updated);

        let values = f.backend.sheet_values("wb_price").unwrap();
        let non_blank = values.iter().filter(|r| !r.is_empty()).count();
        assert_eq!(non_blank, 501);
        assert_eq!(values[0], vec!["ID", "Article", "Price"]);
        assert_eq!(values[1], vec!["1", "NM-1", "1.50"]);
        // null renders as an empty cell
        assert_eq!(values[7], vec!["7", "", "10.50"]);

        assert_eq!(f.ledger_flags().await, (false, true));
    }

    #[tokio::test]
    async fn test_idempotent_runs() {
        let f = fixture().await;
        f.insert_rows(40).await;

        let first = f
            .engine
            .relation_to_sheet(f.backend.as_ref(), f.mapping(), None)
            .await
            .unwrap();
        let after_first = f.backend.sheet_values("wb_price");

        let second = f
            .engine
            .relation_to_sheet(f.backend.as_ref(), f.mapping(), None)
            .await
            .unwrap();

        assert_eq!(f.backend.sheet_values("wb_price"), after_first);
        assert_eq!(first.outcome, second.outcome);
        assert_eq!(f.backend.sheet_names().len(), 2);
    }

    #[tokio::test]
    async fn test_max_records_caps_payload() {
        let f = fixture().await;
        f.insert_rows(30).await;
        let registry =
            Registry::from_yaml_str(&MAPPINGS.replace("max_records: 1000", "max_records: 10"))
                .unwrap();
        let mapping = registry.get("wb_price").unwrap();

        let report = f
            .engine
            .relation_to_sheet(f.backend.as_ref(), mapping, None)
            .await
            .unwrap();
        assert_eq!(
            report.outcome,
            SnapshotOutcome::Confirmed {
                verified_records: 10
            }
        );
        // the newest keys are kept, written in ascending order
        let values = f.backend.sheet_values("wb_price").unwrap();
        assert_eq!(values[1][0], "21");
        assert_eq!(values.last().unwrap()[0], "30");
        assert_eq!(report.records_written, 10);
    }

    #[tokio::test]
    async fn test_quota_truncates_payload_to_grid() {
        let f = fixture().await;
        f.insert_rows(30).await;
        let backend = MemorySheetBackend::new("doc-1")
            .with_cell_limit(1_000)
            .with_sheet("archive", 320, 3)
            .with_sheet("wb_price", 11, 3);

        let report = f
            .engine
            .relation_to_sheet(&backend, f.mapping(), f.target())
            .await
            .unwrap();

        assert_eq!(
            report.outcome,
            SnapshotOutcome::Confirmed {
                verified_records: 10
            }
        );
        assert_eq!(report.records_written, 10);
        assert!(report.ledger_updated);
        assert_eq!(backend.sheet_dimensions("wb_price"), Some((11, 3)));

        let values = backend.sheet_values("wb_price").unwrap();
        assert_eq!(values[0], vec!["ID", "Article", "Price"]);
        assert_eq!(values[1][0], "21");
        assert_eq!(values[10][0], "30");
    }

    #[tokio::test]
    async fn test_quota_on_create_is_unconfirmed() {
        let f = fixture().await;
        f.insert_rows(5).await;
        let backend = MemorySheetBackend::new("doc-1").with_cell_limit(100);

        let report = f
            .engine
            .relation_to_sheet(&backend, f.mapping(), f.target())
            .await
            .unwrap();

        assert!(matches!(report.outcome, SnapshotOutcome::Unconfirmed { .. }));
        assert!(!report.ledger_updated);
        assert!(backend.sheet_values("wb_price").is_none());
        assert_eq!(f.ledger_flags().await, (false, false));
    }

    #[tokio::test]
    async fn test_dropped_writes_leave_ledger_untouched() {
        let f = fixture().await;
        f.insert_rows(25).await;
        f.backend.set_drop_writes(true);

        let report = f
            .engine
            .relation_to_sheet(f.backend.as_ref(), f.mapping(), f.target())
            .await
            .unwrap();

        assert!(matches!(report.outcome, SnapshotOutcome::Unconfirmed { .. }));
        assert_eq!(report.final_phase, SnapshotPhase::Unconfirmed);
        assert!(!report.ledger_updated);
        assert_eq!(f.ledger_flags().await, (false, false));
    }

    #[tokio::test]
    async fn test_empty_source_is_noop() {
        let f = fixture().await;
        let ledger_calls = f.ledger_backend.update_calls();

        let report = f
            .engine
            .relation_to_sheet(f.backend.as_ref(), f.mapping(), f.target())
            .await
            .unwrap();

        assert_eq!(report.outcome, SnapshotOutcome::NoOp);
        assert_eq!(f.backend.mutation_calls(), 0);
        assert_eq!(f.backend.update_calls(), 0);
        assert!(f.backend.sheet_values("wb_price").is_none());
        assert_eq!(f.ledger_backend.update_calls(), ledger_calls);
    }

    #[tokio::test]
    async fn test_backend_failure_is_reported() {
        let f = fixture().await;
        f.insert_rows(5).await;
        f.backend.set_unavailable(true);

        let err = f
            .engine
            .relation_to_sheet(f.backend.as_ref(), f.mapping(), f.target())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "backend_unavailable");
        assert_eq!(f.ledger_flags().await, (false, false));
    }

    #[tokio::test]
    async fn test_sheet_to_relation_upserts_and_verifies() {
        let f = fixture().await;
        f.insert_rows(3).await;
        f.backend.create_sheet("wb_price").await.unwrap();
        f.backend
            .update_range(
                "wb_price",
                "A1",
                &[
                    vec!["ID".into(), "Price".into(), "Comment".into()],
                    vec!["2".into(), "99.99".into(), "edited".into()],
                    vec!["".into(), "1.00".into()],
                    vec!["10".into(), "5".into()],
                ],
            )
            .await
            .unwrap();

        let report = f
            .engine
            .sheet_to_relation(f.backend.as_ref(), f.mapping(), f.target())
            .await
            .unwrap();

        assert_eq!(
            report.outcome,
            SnapshotOutcome::Confirmed {
                verified_records: 2
            }
        );
        assert_eq!(f.ledger_flags().await, (true, false));

        let rows = f
            .store
            .fetch_all(&SelectQuery::new("price_wb").order_by("id"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1]["price"], Value::Integer(9999));
        // untouched columns keep their values
        assert_eq!(rows[1]["nm_id"], Value::Text("NM-2".into()));
        assert_eq!(rows[3]["id"], Value::Integer(10));
        assert_eq!(rows[3]["price"], Value::Integer(500));
    }

    #[tokio::test]
    async fn test_sheet_to_relation_without_sheet_is_noop() {
        let f = fixture().await;
        let report = f
            .engine
            .sheet_to_relation(f.backend.as_ref(), f.mapping(), f.target())
            .await
            .unwrap();
        assert_eq!(report.outcome, SnapshotOutcome::NoOp);
    }

    #[tokio::test]
    async fn test_sheet_to_relation_requires_key_column() {
        let f = fixture().await;
        f.backend.create_sheet("wb_price").await.unwrap();
        f.backend
            .update_range(
                "wb_price",
                "A1",
                &[vec!["Price".into()], vec!["1.00".into()]],
            )
            .await
            .unwrap();

        let err = f
            .engine
            .sheet_to_relation(f.backend.as_ref(), f.mapping(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "configuration_gap");
    }

    #[test]
    fn test_count_verified_rows() {
        let column = vec![
            vec!["ID".to_string()],
            vec!["1".to_string()],
            vec![],
            vec!["  ".to_string()],
            vec!["3".to_string()],
        ];
        assert_eq!(count_verified_rows(&column), 2);
        assert_eq!(count_verified_rows(&[vec!["ID".to_string()]]), 0);
        assert_eq!(count_verified_rows(&[]), 0);
    }
}
