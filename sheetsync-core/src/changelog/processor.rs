use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{ChangeLogEntry, ChangeLogRepository, ChangeLogStats, ChangeOperation, DrainReport};
use crate::a1::{column_range, row_range, rows_range, WHOLE_SHEET};
use crate::capacity::CapacityManager;
use crate::context::EngineSettings;
use crate::error::SyncError;
use crate::mapping::{Registry, TableMapping};
use crate::sheets::{SheetBackend, SheetProvider};
use crate::store::{RelationalStore, SelectQuery};
use crate::value::{Row, Value};

/// Drains the change log into the mapped sheets.
///
/// Cloning is cheap and every clone drives the same loop.
#[derive(Clone)]
pub struct ChangeLogProcessor {
    inner: Arc<Inner>,
}

struct Inner {
    repository: ChangeLogRepository,
    store: Arc<dyn RelationalStore>,
    sheets: Arc<dyn SheetProvider>,
    registry: Arc<Registry>,
    capacity: CapacityManager,
    spreadsheet_id: Option<String>,
    sheet_lock: Arc<Mutex<()>>,
    batch_size: u32,
    max_attempts: u32,
    cleanup_batch_size: u32,
    running: AtomicBool,
    stop_requested: AtomicBool,
    wake: Notify,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ChangeLogProcessor {
    /// Entries are replicated into `spreadsheet_id`; without one every entry
    /// fails as a configuration gap. `sheet_lock` is shared with every other
    /// sheet writer.
    pub fn new(
        repository: ChangeLogRepository,
        store: Arc<dyn RelationalStore>,
        sheets: Arc<dyn SheetProvider>,
        registry: Arc<Registry>,
        settings: &EngineSettings,
        spreadsheet_id: Option<String>,
        sheet_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repository,
                store,
                sheets,
                registry,
                capacity: settings.capacity_manager(),
                spreadsheet_id,
                sheet_lock,
                batch_size: settings.change_batch_size,
                max_attempts: settings.max_attempts,
                cleanup_batch_size: settings.cleanup_batch_size,
                running: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                wake: Notify::new(),
                task: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn spreadsheet_id(&self) -> Option<&str> {
        self.inner.spreadsheet_id.as_deref()
    }

    pub fn repository(&self) -> &ChangeLogRepository {
        &self.inner.repository
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Starts the polling loop. Returns false if it was already running.
    pub async fn start_processing(&self, interval: Duration) -> Result<bool, SyncError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.stop_requested.store(false, Ordering::SeqCst);

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Change log processing started");
            loop {
                if inner.stop_requested.load(Ordering::SeqCst) {
                    break;
                }

                match inner.process_pending_changes().await {
                    Ok(report) if report.processed_count + report.error_count > 0 => {
                        info!(
                            processed = report.processed_count,
                            errors = report.error_count,
                            "Processed change log batch"
                        );
                    }
                    Ok(_) => debug!("No pending changes"),
                    Err(e) => error!(error = %e, "Change log batch failed"),
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = inner.wake.notified() => {}
                }
            }
            inner.running.store(false, Ordering::SeqCst);
            info!("Change log processing stopped");
        });

        *self
            .inner
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(true)
    }

    /// Asks the loop to stop and waits for it. A batch in flight completes first.
    pub async fn stop_processing(&self) {
        self.inner.stop_requested.store(true, Ordering::SeqCst);
        self.inner.wake.notify_one();

        let handle = self
            .inner
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Change log task ended abnormally");
            }
        }
        self.inner.running.store(false, Ordering::SeqCst);
    }

    /// Drains one batch now.
    pub async fn process_pending_changes(&self) -> Result<DrainReport, SyncError> {
        self.inner.process_pending_changes().await
    }

    pub async fn get_stats(&self) -> Result<ChangeLogStats, SyncError> {
        let mut stats = self.inner.repository.stats(self.inner.max_attempts).await?;
        stats.running = self.is_running();
        Ok(stats)
    }

    /// Purges applied entries older than `retention_days`. Failed entries stay.
    pub async fn cleanup_old_records(&self, retention_days: u32) -> Result<u64, SyncError> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
        let purged = self
            .inner
            .repository
            .purge_applied_before(cutoff, self.inner.cleanup_batch_size)
            .await?;
        info!(purged, retention_days, "Cleaned up change log");
        Ok(purged)
    }
}

impl Inner {
    async fn process_pending_changes(&self) -> Result<DrainReport, SyncError> {
        let _guard = self.sheet_lock.lock().await;

        // drains hold the lock, so anything still in processing was abandoned
        let stale = self.repository.reset_stale_processing().await?;
        if stale > 0 {
            warn!(count = stale, "Re-queued entries left in processing");
        }

        let entries = self
            .repository
            .fetch_batch(self.batch_size, self.max_attempts)
            .await?;
        let mut report = DrainReport::default();
        if entries.is_empty() {
            return Ok(report);
        }

        let mut backend: Option<Arc<dyn SheetBackend>> = None;
        for entry in &entries {
            if let Err(e) = self.repository.mark_processing(entry.id).await {
                error!(id = entry.id, error = %e, "Could not claim change log entry");
                report.error_count += 1;
                continue;
            }

            let recorded = match self.apply_entry(entry, &mut backend).await {
                Ok(()) => self.repository.mark_applied(entry.id).await.map(|()| true),
                Err(e) => {
                    warn!(
                        id = entry.id,
                        table = %entry.table_name,
                        key = %entry.primary_key_value,
                        attempt = entry.attempt_count + 1,
                        kind = e.kind(),
                        error = %e,
                        "Change log entry failed"
                    );
                    self.repository
                        .mark_failed(entry.id, &e.to_string())
                        .await
                        .map(|()| false)
                }
            };
            match recorded {
                Ok(true) => report.processed_count += 1,
                Ok(false) => report.error_count += 1,
                Err(e) => {
                    // left in processing; the next drain re-queues it
                    error!(id = entry.id, error = %e, "Could not record change log outcome");
                    report.error_count += 1;
                }
            }
        }
        Ok(report)
    }

    async fn apply_entry(
        &self,
        entry: &ChangeLogEntry,
        backend: &mut Option<Arc<dyn SheetBackend>>,
    ) -> Result<(), SyncError> {
        let mapping = self
            .registry
            .by_source_table(&entry.table_name)
            .ok_or_else(|| {
                SyncError::ConfigurationGap(format!("no mapping for table '{}'", entry.table_name))
            })?;

        if !mapping.direction().includes_relation_to_sheet() {
            debug!(table = %entry.table_name, "Table does not replicate to the sheet");
            return Ok(());
        }

        let backend = match backend.clone() {
            Some(b) => b,
            None => {
                let id = self.spreadsheet_id.as_deref().ok_or_else(|| {
                    SyncError::ConfigurationGap("no spreadsheet configured for change log".into())
                })?;
                let opened = self.sheets.open(id).await?;
                *backend = Some(opened.clone());
                opened
            }
        };

        match entry.operation {
            ChangeOperation::Insert | ChangeOperation::Update => {
                let query = SelectQuery::new(mapping.source_table())
                    .columns(mapping.field_names())
                    .where_in(
                        mapping.primary_key(),
                        vec![Value::Text(entry.primary_key_value.clone())],
                    );
                match self.store.fetch_all(&query).await?.into_iter().next() {
                    Some(row) => self.upsert_row(backend.as_ref(), mapping, &row).await,
                    None => {
                        debug!(
                            table = %entry.table_name,
                            key = %entry.primary_key_value,
                            "Source row is gone, applying as delete"
                        );
                        self.delete_row(backend.as_ref(), mapping, &entry.primary_key_value)
                            .await
                    }
                }
            }
            ChangeOperation::Delete => {
                self.delete_row(backend.as_ref(), mapping, &entry.primary_key_value)
                    .await
            }
        }
    }

    /// Rewrites the row holding `row`'s key, or appends it.
    async fn upsert_row(
        &self,
        backend: &dyn SheetBackend,
        mapping: &TableMapping,
        row: &Row,
    ) -> Result<(), SyncError> {
        let sheet = mapping.sheet_name();
        let sheet_err = |e| SyncError::from_sheet(sheet, e);
        let width = mapping.column_count();
        let pk_col = mapping.primary_key_column();
        let rendered = mapping.render_row(row);
        let key = rendered.get(pk_col - 1).cloned().unwrap_or_default();

        if !backend.sheet_exists(sheet).await.map_err(sheet_err)? {
            let estimate = self
                .store
                .count(mapping.source_table())
                .await?
                .min(mapping.max_records() as u64);
            self.capacity
                .ensure_sheet(backend, sheet, estimate)
                .await
                .map_err(sheet_err)?;
        }

        let keys = backend
            .get_range(sheet, &column_range(pk_col))
            .await
            .map_err(sheet_err)?;

        let target_row = if keys.is_empty() {
            backend
                .update_range(sheet, &row_range(1, width), &[mapping.header_row()])
                .await
                .map_err(sheet_err)?;
            2
        } else {
            keys.iter()
                .enumerate()
                .skip(1)
                .find(|(_, cells)| cells.first().map(|c| c.trim()) == Some(key.trim()))
                .map(|(idx, _)| idx + 1)
                .unwrap_or(keys.len() + 1)
        };

        let grid = self
            .capacity
            .fit_payload(backend, sheet, target_row as u32, width as u32)
            .await
            .map_err(sheet_err)?;
        if (grid.rows as usize) < target_row {
            return Err(SyncError::QuotaExceeded {
                sheet: sheet.to_string(),
                message: format!("no room for row {} in a {}-row grid", target_row, grid.rows),
            });
        }
        backend
            .update_range(sheet, &row_range(target_row, width), &[rendered])
            .await
            .map_err(sheet_err)?;
        debug!(sheet, key = %key, row = target_row, "Upserted sheet row");
        Ok(())
    }

    /// Removes the row holding `key`, shifting the rows below it up.
    async fn delete_row(
        &self,
        backend: &dyn SheetBackend,
        mapping: &TableMapping,
        key: &str,
    ) -> Result<(), SyncError> {
        let sheet = mapping.sheet_name();
        let sheet_err = |e| SyncError::from_sheet(sheet, e);

        if !backend.sheet_exists(sheet).await.map_err(sheet_err)? {
            return Ok(());
        }

        let values = backend
            .get_range(sheet, WHOLE_SHEET)
            .await
            .map_err(sheet_err)?;
        let pk_idx = mapping.primary_key_column() - 1;
        let Some(idx) = values
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, cells)| cells.get(pk_idx).map(|c| c.trim()) == Some(key.trim()))
            .map(|(idx, _)| idx)
        else {
            debug!(sheet, key, "Row already absent");
            return Ok(());
        };

        let width = values
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(mapping.column_count());
        let last_row = values.len();
        let deleted_row = idx + 1;

        if deleted_row < last_row {
            let shifted: Vec<Vec<String>> = values[idx + 1..]
                .iter()
                .map(|cells| {
                    let mut cells = cells.clone();
                    cells.resize(width, String::new());
                    cells
                })
                .collect();
            backend
                .update_range(sheet, &rows_range(deleted_row, last_row - 1, width), &shifted)
                .await
                .map_err(sheet_err)?;
        }
        backend
            .clear_range(sheet, &row_range(last_row, width))
            .await
            .map_err(sheet_err)?;
        debug!(sheet, key, row = deleted_row, "Deleted sheet row");
        Ok(())
    }
}
