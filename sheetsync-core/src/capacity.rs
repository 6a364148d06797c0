//! Cell quota management.
//!
//! A spreadsheet document may allocate at most [`HARD_CELL_LIMIT`] grid cells
//! across all of its sheets, empty or not. The manager sizes new sheets,
//! grows them when a payload does not fit, and reclaims space from sheets that
//! are about to be rewritten anyway. None of its operations fail the caller:
//! degradations are logged and the sync proceeds with whatever grid exists.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::a1::WHOLE_SHEET;
use crate::error::SheetError;
use crate::sheets::{SheetBackend, SheetProperties};

/// Maximum allocated cells per spreadsheet document.
pub const HARD_CELL_LIMIT: u64 = 10_000_000;

/// Size a sheet is shrunk to when it cannot be deleted.
pub const PLACEHOLDER: Dimensions = Dimensions { rows: 10, cols: 5 };

const FALLBACK_MAX_ROWS: u32 = 2000;
const FALLBACK_ROW_MARGIN: u32 = 100;
const FALLBACK_COLS: u32 = 20;

/// Known sheets and the grid they get on creation.
const SHEET_SIZES: &[(&str, u32, u32)] = &[
    ("wb_voronka", 20_000, 20),
    ("wb_detaliz", 30_000, 45),
    ("wb_price", 15_000, 15),
    ("wb_tovar", 5_000, 20),
    ("wb_sklad", 15_000, 15),
    ("wb_priem", 2_000, 15),
    ("wb_reklam", 25_000, 20),
    ("ozon_detaliz", 30_000, 30),
    ("ozon_reklam", 30_000, 20),
    ("ozon_price", 25_000, 15),
    ("ozon_voronka", 25_000, 25),
    ("ozon_tovar", 5_000, 20),
    ("ozon_zakfbo", 25_000, 30),
    ("ozon_prodfbo", 25_000, 30),
    ("ozon_zakfbs", 15_000, 30),
    ("ozon_prodfbs", 15_000, 35),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub rows: u32,
    pub cols: u32,
}

impl Dimensions {
    pub fn new(rows: u32, cols: u32) -> Self {
        Self { rows, cols }
    }

    pub fn cells(&self) -> u64 {
        self.rows as u64 * self.cols as u64
    }
}

/// Cell usage of one document.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaState {
    pub spreadsheet_id: String,
    pub total_cells_used: u64,
    pub hard_limit: u64,
    pub per_sheet: Vec<SheetProperties>,
}

impl QuotaState {
    /// Reclamation starts once more than half of the quota is allocated.
    pub fn needs_reclaim(&self) -> bool {
        self.total_cells_used > self.hard_limit / 2
    }

    pub fn usage_percent(&self) -> f64 {
        if self.hard_limit == 0 {
            return 100.0;
        }
        self.total_cells_used as f64 * 100.0 / self.hard_limit as f64
    }
}

/// What a reclamation pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReclaimReport {
    pub triggered: bool,
    pub cells_before: u64,
    pub deleted: Vec<String>,
    pub shrunk: Vec<String>,
    pub failed: Vec<String>,
}

impl ReclaimReport {
    pub fn touched(&self) -> bool {
        !self.deleted.is_empty() || !self.shrunk.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CapacityManager {
    hard_limit: u64,
    operation_pause: Duration,
    settle_delay: Duration,
}

impl Default for CapacityManager {
    fn default() -> Self {
        Self::new(HARD_CELL_LIMIT)
    }
}

impl CapacityManager {
    pub fn new(hard_limit: u64) -> Self {
        Self {
            hard_limit,
            operation_pause: Duration::from_secs(1),
            settle_delay: Duration::from_secs(5),
        }
    }

    /// Pause between reclamation operations, and the settle time after a pass.
    pub fn with_pauses(mut self, operation_pause: Duration, settle_delay: Duration) -> Self {
        self.operation_pause = operation_pause;
        self.settle_delay = settle_delay;
        self
    }

    pub fn hard_limit(&self) -> u64 {
        self.hard_limit
    }

    /// Grid for a freshly created sheet.
    ///
    /// Known sheets use their fixed size; others are tiered by record count.
    pub fn compute_optimal_dimensions(&self, sheet_name: &str, estimated_records: u64) -> Dimensions {
        if let Some((_, rows, cols)) = SHEET_SIZES.iter().find(|(name, _, _)| *name == sheet_name) {
            return Dimensions::new(*rows, *cols);
        }
        match estimated_records {
            n if n > 20_000 => Dimensions::new(30_000, 30),
            n if n > 10_000 => Dimensions::new(20_000, 25),
            n if n > 5_000 => Dimensions::new(10_000, 20),
            _ => Dimensions::new(5_000, 15),
        }
    }

    pub async fn quota_state(&self, backend: &dyn SheetBackend) -> Result<QuotaState, SheetError> {
        let metadata = backend.get_sheet_metadata().await?;
        Ok(QuotaState {
            spreadsheet_id: backend.spreadsheet_id().to_string(),
            total_cells_used: metadata.total_cells(),
            hard_limit: self.hard_limit,
            per_sheet: metadata.sheets,
        })
    }

    /// Frees space when the document is more than half full.
    ///
    /// Only sheets in `scheduled` are touched: they are about to be rewritten,
    /// so their content is disposable. Each one is deleted, or cleared and
    /// shrunk to a placeholder when deletion fails.
    pub async fn ensure_capacity(
        &self,
        backend: &dyn SheetBackend,
        scheduled: &[String],
    ) -> ReclaimReport {
        let state = match self.quota_state(backend).await {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    spreadsheet = backend.spreadsheet_id(),
                    error = %e,
                    "Could not read sheet metadata, skipping capacity check"
                );
                return ReclaimReport::default();
            }
        };

        let mut report = ReclaimReport {
            cells_before: state.total_cells_used,
            ..ReclaimReport::default()
        };

        if !state.needs_reclaim() {
            debug!(
                spreadsheet = %state.spreadsheet_id,
                used = state.total_cells_used,
                "Capacity within limits"
            );
            return report;
        }

        report.triggered = true;
        info!(
            spreadsheet = %state.spreadsheet_id,
            used = state.total_cells_used,
            limit = state.hard_limit,
            "Cell usage at {:.1}%, reclaiming space",
            state.usage_percent()
        );

        let mut first = true;
        for sheet in &state.per_sheet {
            if !scheduled.iter().any(|s| s == &sheet.name) {
                continue;
            }
            if !first {
                tokio::time::sleep(self.operation_pause).await;
            }
            first = false;

            match backend.delete_sheet(&sheet.name).await {
                Ok(()) => {
                    info!(sheet = %sheet.name, cells = sheet.cells(), "Deleted sheet");
                    report.deleted.push(sheet.name.clone());
                    continue;
                }
                Err(e) => {
                    warn!(sheet = %sheet.name, error = %e, "Delete failed, shrinking instead");
                }
            }

            tokio::time::sleep(self.operation_pause).await;
            let shrunk = async {
                backend.clear_range(&sheet.name, WHOLE_SHEET).await?;
                backend
                    .resize_sheet(&sheet.name, PLACEHOLDER.rows, PLACEHOLDER.cols)
                    .await
            }
            .await;
            match shrunk {
                Ok(()) => {
                    info!(sheet = %sheet.name, "Shrunk sheet to placeholder");
                    report.shrunk.push(sheet.name.clone());
                }
                Err(e) => {
                    warn!(sheet = %sheet.name, error = %e, "Could not reclaim sheet");
                    report.failed.push(sheet.name.clone());
                }
            }
        }

        if report.touched() {
            tokio::time::sleep(self.settle_delay).await;
        }
        report
    }

    /// Resizes `sheet`, retrying with a modest grid when the quota refuses.
    ///
    /// Returns the dimensions that were applied, or `None` if neither attempt
    /// succeeded.
    pub async fn resize_with_fallback(
        &self,
        backend: &dyn SheetBackend,
        sheet: &str,
        target: Dimensions,
        estimated_records: u64,
    ) -> Option<Dimensions> {
        match backend.resize_sheet(sheet, target.rows, target.cols).await {
            Ok(()) => {
                debug!(sheet, rows = target.rows, cols = target.cols, "Resized sheet");
                return Some(target);
            }
            Err(SheetError::QuotaExceeded(_)) => {}
            Err(e) => {
                warn!(sheet, error = %e, "Could not resize sheet");
                return None;
            }
        }

        let rows = estimated_records
            .saturating_add(FALLBACK_ROW_MARGIN as u64)
            .min(FALLBACK_MAX_ROWS as u64) as u32;
        let fallback = Dimensions::new(rows, FALLBACK_COLS);
        warn!(
            sheet,
            requested_rows = target.rows,
            requested_cols = target.cols,
            rows = fallback.rows,
            cols = fallback.cols,
            "Cell limit reached, using minimal size"
        );

        match backend.resize_sheet(sheet, fallback.rows, fallback.cols).await {
            Ok(()) => Some(fallback),
            Err(e) => {
                warn!(sheet, error = %e, "Could not resize sheet at all, keeping current size");
                None
            }
        }
    }

    /// Creates `sheet` if missing and sizes it for `estimated_records`.
    ///
    /// Returns true when the sheet was created.
    pub async fn ensure_sheet(
        &self,
        backend: &dyn SheetBackend,
        sheet: &str,
        estimated_records: u64,
    ) -> Result<bool, SheetError> {
        if backend.sheet_exists(sheet).await? {
            return Ok(false);
        }

        info!(sheet, "Creating sheet");
        backend.create_sheet(sheet).await?;
        let target = self.compute_optimal_dimensions(sheet, estimated_records);
        self.resize_with_fallback(backend, sheet, target, estimated_records)
            .await;
        Ok(true)
    }

    /// Grows `sheet` so that a `rows` x `cols` block starting at `A1` fits.
    ///
    /// Returns the grid the sheet has afterwards. When the quota refuses to
    /// grow it, the current grid is returned and the caller writes what fits.
    pub async fn fit_payload(
        &self,
        backend: &dyn SheetBackend,
        sheet: &str,
        rows: u32,
        cols: u32,
    ) -> Result<Dimensions, SheetError> {
        let metadata = backend.get_sheet_metadata().await?;
        let current = metadata
            .sheet(sheet)
            .ok_or_else(|| SheetError::NotFound(sheet.to_string()))?;
        let current = Dimensions::new(current.row_count, current.col_count);
        if current.rows >= rows && current.cols >= cols {
            return Ok(current);
        }

        let target = Dimensions::new(current.rows.max(rows), current.cols.max(cols));
        info!(
            sheet,
            rows = target.rows,
            cols = target.cols,
            "Growing sheet to fit payload"
        );
        match backend.resize_sheet(sheet, target.rows, target.cols).await {
            Ok(()) => Ok(target),
            Err(SheetError::QuotaExceeded(message)) => {
                warn!(
                    sheet,
                    rows = current.rows,
                    cols = current.cols,
                    %message,
                    "Cell limit reached, payload will be truncated to the current grid"
                );
                Ok(current)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheets::MemorySheetBackend;

    fn manager() -> CapacityManager {
        CapacityManager::default().with_pauses(Duration::ZERO, Duration::ZERO)
    }

    #[test]
    fn test_static_sizes_win_over_tiers() {
        let m = manager();
        assert_eq!(m.compute_optimal_dimensions("wb_detaliz", 10), Dimensions::new(30_000, 45));
        assert_eq!(m.compute_optimal_dimensions("wb_priem", 50_000), Dimensions::new(2_000, 15));
    }

    #[test]
    fn test_tiers() {
        let m = manager();
        assert_eq!(m.compute_optimal_dimensions("custom", 25_000), Dimensions::new(30_000, 30));
        assert_eq!(m.compute_optimal_dimensions("custom", 20_000), Dimensions::new(20_000, 25));
        assert_eq!(m.compute_optimal_dimensions("custom", 10_001), Dimensions::new(20_000, 25));
        assert_eq!(m.compute_optimal_dimensions("custom", 6_000), Dimensions::new(10_000, 20));
        assert_eq!(m.compute_optimal_dimensions("custom", 5_000), Dimensions::new(5_000, 15));
        assert_eq!(m.compute_optimal_dimensions("custom", 0), Dimensions::new(5_000, 15));
    }

    #[tokio::test]
    async fn test_resize_falls_back_on_quota() {
        let backend = MemorySheetBackend::new("doc")
            .with_sheet("archive", 95_000, 100)
            .with_sheet("ozon_detaliz", 10, 5);
        let m = manager();

        let target = m.compute_optimal_dimensions("ozon_detaliz", 1500);
        assert_eq!(target, Dimensions::new(30_000, 30));

        let applied = m
            .resize_with_fallback(&backend, "ozon_detaliz", target, 1500)
            .await;
        assert_eq!(applied, Some(Dimensions::new(1600, 20)));
        assert_eq!(backend.sheet_dimensions("ozon_detaliz"), Some((1600, 20)));
    }

    #[tokio::test]
    async fn test_fallback_rows_are_capped() {
        let backend = MemorySheetBackend::new("doc")
            .with_sheet("archive", 95_000, 100)
            .with_sheet("custom", 10, 5);
        let applied = manager()
            .resize_with_fallback(&backend, "custom", Dimensions::new(30_000, 30), 25_000)
            .await;
        assert_eq!(applied, Some(Dimensions::new(2000, 20)));
    }

    #[tokio::test]
    async fn test_resize_gives_up_quietly() {
        let backend = MemorySheetBackend::new("doc")
            .with_sheet("archive", 100_000, 100)
            .with_sheet("custom", 10, 5)
            .with_cell_limit(10_000_050);
        let applied = manager()
            .resize_with_fallback(&backend, "custom", Dimensions::new(30_000, 30), 1500)
            .await;
        assert_eq!(applied, None);
        assert_eq!(backend.sheet_dimensions("custom"), Some((10, 5)));
    }

    #[tokio::test]
    async fn test_reclaim_triggers_above_half() {
        let backend = MemorySheetBackend::new("doc")
            .with_sheet("wb_detaliz", 30_000, 100)
            .with_sheet("wb_price", 30_000, 100);
        let scheduled = vec!["wb_price".to_string()];

        let report = manager().ensure_capacity(&backend, &scheduled).await;
        assert!(report.triggered);
        assert_eq!(report.cells_before, 6_000_000);
        assert_eq!(report.deleted, vec!["wb_price".to_string()]);
        assert_eq!(backend.sheet_names(), vec!["wb_detaliz".to_string()]);
    }

    #[tokio::test]
    async fn test_reclaim_not_triggered_below_half() {
        let backend = MemorySheetBackend::new("doc")
            .with_sheet("wb_detaliz", 20_000, 100)
            .with_sheet("wb_price", 20_000, 100);
        let scheduled = vec!["wb_price".to_string()];

        let report = manager().ensure_capacity(&backend, &scheduled).await;
        assert!(!report.triggered);
        assert_eq!(report.cells_before, 4_000_000);
        assert_eq!(backend.sheet_names().len(), 2);
    }

    #[tokio::test]
    async fn test_reclaim_leaves_unscheduled_sheets() {
        let backend = MemorySheetBackend::new("doc")
            .with_sheet("manual_notes", 30_000, 100)
            .with_sheet("wb_price", 30_000, 100);

        let report = manager().ensure_capacity(&backend, &[]).await;
        assert!(report.triggered);
        assert!(!report.touched());
        assert_eq!(backend.sheet_names().len(), 2);
    }

    #[tokio::test]
    async fn test_reclaim_shrinks_when_delete_fails() {
        let backend = MemorySheetBackend::new("doc")
            .with_sheet("wb_detaliz", 30_000, 100)
            .with_sheet("wb_price", 30_000, 100);
        backend.fail_deletes("wb_price");
        backend
            .update_range("wb_price", "A1", &[vec!["stale".to_string()]])
            .await
            .unwrap();

        let report = manager()
            .ensure_capacity(&backend, &["wb_price".to_string()])
            .await;
        assert_eq!(report.shrunk, vec!["wb_price".to_string()]);
        assert_eq!(backend.sheet_dimensions("wb_price"), Some((10, 5)));
        assert_eq!(backend.sheet_values("wb_price"), Some(vec![]));
    }

    #[tokio::test]
    async fn test_ensure_sheet_creates_and_sizes() {
        let backend = MemorySheetBackend::new("doc").with_sheet("tech", 100, 7);
        let m = manager();

        assert!(m.ensure_sheet(&backend, "wb_tovar", 10).await.unwrap());
        assert_eq!(backend.sheet_dimensions("wb_tovar"), Some((5000, 20)));
        assert!(!m.ensure_sheet(&backend, "wb_tovar", 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_fit_payload_grows_only() {
        let backend = MemorySheetBackend::new("doc").with_sheet("s", 100, 5);
        let m = manager();

        let grid = m.fit_payload(&backend, "s", 50, 3).await.unwrap();
        assert_eq!(grid, Dimensions::new(100, 5));
        assert_eq!(backend.sheet_dimensions("s"), Some((100, 5)));

        let grid = m.fit_payload(&backend, "s", 501, 3).await.unwrap();
        assert_eq!(grid, Dimensions::new(501, 5));
        assert_eq!(backend.sheet_dimensions("s"), Some((501, 5)));
    }

    #[tokio::test]
    async fn test_fit_payload_keeps_grid_on_quota() {
        let backend = MemorySheetBackend::new("doc")
            .with_sheet("archive", 99_600, 100)
            .with_sheet("custom_t", 2_000, 20);
        let m = manager();

        let grid = m.fit_payload(&backend, "custom_t", 2_501, 3).await.unwrap();
        assert_eq!(grid, Dimensions::new(2_000, 20));
        assert_eq!(backend.sheet_dimensions("custom_t"), Some((2_000, 20)));
    }
}
