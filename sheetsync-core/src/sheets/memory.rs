//! In-memory spreadsheet document.
//!
//! Behaves like the hosted backend where the engines care: a hard cell quota
//! over allocated grid cells, writes outside the grid are refused, reads trim
//! trailing blanks. Faults can be injected to exercise the failure paths.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{SheetBackend, SheetProperties, SheetProvider, SpreadsheetMetadata};
use crate::a1::{parse_range, CellRange};
use crate::capacity::HARD_CELL_LIMIT;
use crate::error::SheetError;

const DEFAULT_ROWS: u32 = 1000;
const DEFAULT_COLS: u32 = 26;

const WHOLE: CellRange = CellRange {
    first_col: 1,
    first_row: 1,
    last_col: None,
    last_row: None,
};

struct MemorySheet {
    name: String,
    rows: u32,
    cols: u32,
    cells: HashMap<(u32, u32), String>,
}

impl MemorySheet {
    fn new(name: &str, rows: u32, cols: u32) -> Self {
        Self {
            name: name.to_string(),
            rows,
            cols,
            cells: HashMap::new(),
        }
    }

    fn cells_allocated(&self) -> u64 {
        self.rows as u64 * self.cols as u64
    }
}

#[derive(Default)]
struct State {
    sheets: Vec<MemorySheet>,
    drop_writes: bool,
    unavailable: bool,
    write_failures: Vec<(String, u32)>,
    delete_failures: HashSet<String>,
    update_calls: usize,
    mutation_calls: usize,
}

impl State {
    fn sheet(&self, name: &str) -> Result<&MemorySheet, SheetError> {
        self.sheets
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| SheetError::NotFound(name.to_string()))
    }

    fn sheet_mut(&mut self, name: &str) -> Result<&mut MemorySheet, SheetError> {
        self.sheets
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| SheetError::NotFound(name.to_string()))
    }

    fn total_cells(&self) -> u64 {
        self.sheets.iter().map(MemorySheet::cells_allocated).sum()
    }
}

fn quota_error(limit: u64) -> SheetError {
    SheetError::QuotaExceeded(format!(
        "This action would increase the number of cells in the workbook above the limit of {} cells.",
        limit
    ))
}

fn parse(range: &str) -> Result<CellRange, SheetError> {
    parse_range(range).ok_or_else(|| SheetError::InvalidRange(range.to_string()))
}

pub struct MemorySheetBackend {
    spreadsheet_id: String,
    cell_limit: u64,
    state: Mutex<State>,
}

impl MemorySheetBackend {
    /// An empty document with the standard cell quota.
    pub fn new(spreadsheet_id: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            cell_limit: HARD_CELL_LIMIT,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_cell_limit(mut self, limit: u64) -> Self {
        self.cell_limit = limit;
        self
    }

    /// Adds a pre-sized sheet. Ignores the quota so tests can set up any layout.
    pub fn with_sheet(self, name: &str, rows: u32, cols: u32) -> Self {
        self.state().sheets.push(MemorySheet::new(name, rows, cols));
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(state: &State) -> Result<(), SheetError> {
        if state.unavailable {
            return Err(SheetError::Unavailable("backend offline".into()));
        }
        Ok(())
    }

    /// Writes are acknowledged but never stored.
    pub fn set_drop_writes(&self, drop: bool) {
        self.state().drop_writes = drop;
    }

    /// The next `times` writes containing a cell equal to `text` fail.
    pub fn fail_writes_containing(&self, text: &str, times: u32) {
        self.state().write_failures.push((text.to_string(), times));
    }

    /// Deleting `sheet` fails until cleared with [`Self::clear_faults`].
    pub fn fail_deletes(&self, sheet: &str) {
        self.state().delete_failures.insert(sheet.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    pub fn clear_faults(&self) {
        let mut state = self.state();
        state.drop_writes = false;
        state.unavailable = false;
        state.write_failures.clear();
        state.delete_failures.clear();
    }

    /// Stored cells of a sheet, trimmed like a whole-sheet read.
    pub fn sheet_values(&self, sheet: &str) -> Option<Vec<Vec<String>>> {
        let state = self.state();
        let sheet = state.sheet(sheet).ok()?;
        Some(read_cells(sheet, &WHOLE))
    }

    pub fn sheet_dimensions(&self, sheet: &str) -> Option<(u32, u32)> {
        let state = self.state();
        state.sheet(sheet).ok().map(|s| (s.rows, s.cols))
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.state().sheets.iter().map(|s| s.name.clone()).collect()
    }

    /// Number of `update_range` calls, dropped ones included.
    pub fn update_calls(&self) -> usize {
        self.state().update_calls
    }

    /// Number of calls that could have changed the document.
    pub fn mutation_calls(&self) -> usize {
        self.state().mutation_calls
    }
}

fn read_cells(sheet: &MemorySheet, range: &CellRange) -> Vec<Vec<String>> {
    let last_row = range.last_row.unwrap_or(sheet.rows).min(sheet.rows);
    let last_col = range.last_col.unwrap_or(sheet.cols).min(sheet.cols);

    let mut max_row = 0;
    for (row, col) in sheet.cells.keys() {
        if range.contains(*row, *col) && *row <= last_row && *col <= last_col {
            max_row = max_row.max(*row);
        }
    }
    if max_row < range.first_row {
        return Vec::new();
    }

    let mut out = Vec::with_capacity((max_row - range.first_row + 1) as usize);
    for row in range.first_row..=max_row {
        let mut cells: Vec<String> = (range.first_col..=last_col)
            .map(|col| sheet.cells.get(&(row, col)).cloned().unwrap_or_default())
            .collect();
        while cells.last().is_some_and(|c| c.is_empty()) {
            cells.pop();
        }
        out.push(cells);
    }
    out
}

#[async_trait]
impl SheetBackend for MemorySheetBackend {
    fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    async fn sheet_exists(&self, sheet: &str) -> Result<bool, SheetError> {
        let state = self.state();
        Self::check_available(&state)?;
        Ok(state.sheet(sheet).is_ok())
    }

    async fn create_sheet(&self, sheet: &str) -> Result<(), SheetError> {
        let mut state = self.state();
        Self::check_available(&state)?;
        state.mutation_calls += 1;
        if state.sheet(sheet).is_ok() {
            return Err(SheetError::Rejected(format!(
                "A sheet with the name \"{}\" already exists",
                sheet
            )));
        }
        if state.total_cells() + DEFAULT_ROWS as u64 * DEFAULT_COLS as u64 > self.cell_limit {
            return Err(quota_error(self.cell_limit));
        }
        state
            .sheets
            .push(MemorySheet::new(sheet, DEFAULT_ROWS, DEFAULT_COLS));
        Ok(())
    }

    async fn delete_sheet(&self, sheet: &str) -> Result<(), SheetError> {
        let mut state = self.state();
        Self::check_available(&state)?;
        state.mutation_calls += 1;
        if state.delete_failures.contains(sheet) {
            return Err(SheetError::Unavailable(format!("cannot delete '{}'", sheet)));
        }
        state.sheet(sheet)?;
        if state.sheets.len() == 1 {
            return Err(SheetError::Rejected(
                "You can't remove all the sheets in a document".into(),
            ));
        }
        state.sheets.retain(|s| s.name != sheet);
        Ok(())
    }

    async fn resize_sheet(&self, sheet: &str, rows: u32, cols: u32) -> Result<(), SheetError> {
        let mut state = self.state();
        Self::check_available(&state)?;
        state.mutation_calls += 1;
        let current = state.sheet(sheet)?.cells_allocated();
        let requested = rows as u64 * cols as u64;
        if state.total_cells() - current + requested > self.cell_limit {
            return Err(quota_error(self.cell_limit));
        }
        let target = state.sheet_mut(sheet)?;
        target.rows = rows;
        target.cols = cols;
        target.cells.retain(|(r, c), _| *r <= rows && *c <= cols);
        Ok(())
    }

    async fn get_range(&self, sheet: &str, range: &str) -> Result<Vec<Vec<String>>, SheetError> {
        let state = self.state();
        Self::check_available(&state)?;
        let parsed = parse(range)?;
        Ok(read_cells(state.sheet(sheet)?, &parsed))
    }

    async fn update_range(
        &self,
        sheet: &str,
        range: &str,
        values: &[Vec<String>],
    ) -> Result<(), SheetError> {
        let mut state = self.state();
        Self::check_available(&state)?;
        state.update_calls += 1;
        state.mutation_calls += 1;
        let mut parsed = parse(range)?;
        if !range.contains(':') {
            // a single cell anchors the write, the data decides its extent
            parsed.last_col = None;
            parsed.last_row = None;
        }

        let mut failing = None;
        for (idx, (text, remaining)) in state.write_failures.iter().enumerate() {
            if *remaining > 0 && values.iter().flatten().any(|cell| cell == text) {
                failing = Some(idx);
                break;
            }
        }
        if let Some(idx) = failing {
            state.write_failures[idx].1 -= 1;
            return Err(SheetError::Unavailable("write timed out".into()));
        }

        let drop_writes = state.drop_writes;
        let target = state.sheet_mut(sheet)?;

        let height = values.len() as u32;
        let width = values.iter().map(Vec::len).max().unwrap_or(0) as u32;
        if height == 0 || width == 0 {
            return Ok(());
        }
        let last_row = parsed.first_row + height - 1;
        let last_col = parsed.first_col + width - 1;
        if parsed.last_row.is_some_and(|r| last_row > r)
            || parsed.last_col.is_some_and(|c| last_col > c)
        {
            return Err(SheetError::Rejected(format!(
                "Requested writing within range {}, but tried writing {} rows of {} columns",
                range, height, width
            )));
        }
        if last_row > target.rows || last_col > target.cols {
            return Err(SheetError::Rejected(format!(
                "Range ('{}'!{}) exceeds grid limits. Max rows: {}, max columns: {}",
                sheet, range, target.rows, target.cols
            )));
        }
        if drop_writes {
            return Ok(());
        }

        for (r, row) in values.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                let key = (parsed.first_row + r as u32, parsed.first_col + c as u32);
                if cell.is_empty() {
                    target.cells.remove(&key);
                } else {
                    target.cells.insert(key, cell.clone());
                }
            }
        }
        Ok(())
    }

    async fn clear_range(&self, sheet: &str, range: &str) -> Result<(), SheetError> {
        let mut state = self.state();
        Self::check_available(&state)?;
        state.mutation_calls += 1;
        let parsed = parse(range)?;
        let target = state.sheet_mut(sheet)?;
        target.cells.retain(|(r, c), _| !parsed.contains(*r, *c));
        Ok(())
    }

    async fn get_sheet_metadata(&self) -> Result<SpreadsheetMetadata, SheetError> {
        let state = self.state();
        Self::check_available(&state)?;
        Ok(SpreadsheetMetadata {
            spreadsheet_id: self.spreadsheet_id.clone(),
            sheets: state
                .sheets
                .iter()
                .map(|s| SheetProperties {
                    name: s.name.clone(),
                    row_count: s.rows,
                    col_count: s.cols,
                })
                .collect(),
        })
    }
}

/// Hands out in-memory documents by id, creating empty ones on first use.
#[derive(Default)]
pub struct MemorySheetProvider {
    documents: Mutex<HashMap<String, Arc<MemorySheetBackend>>>,
}

impl MemorySheetProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, backend: Arc<MemorySheetBackend>) {
        self.documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(backend.spreadsheet_id().to_string(), backend);
    }

    pub fn document(&self, spreadsheet_id: &str) -> Arc<MemorySheetBackend> {
        self.documents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(spreadsheet_id.to_string())
            .or_insert_with(|| Arc::new(MemorySheetBackend::new(spreadsheet_id)))
            .clone()
    }
}

#[async_trait]
impl SheetProvider for MemorySheetProvider {
    async fn open(&self, spreadsheet_id: &str) -> Result<Arc<dyn SheetBackend>, SheetError> {
        Ok(self.document(spreadsheet_id))
    }
}
