//! Spreadsheet backends.
//!
//! A [`SheetBackend`] is bound to one spreadsheet document and exposes the raw
//! primitives the engines need. Ranges are A1 strings relative to the named
//! sheet (`"A1:C10"`, `"A:A"`); the empty string addresses the whole sheet.
//! Values are always plain text.

mod google;
mod memory;

pub use google::{GoogleSheetsBackend, GoogleSheetsProvider};
pub use memory::{MemorySheetBackend, MemorySheetProvider};

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::error::SheetError;

/// Grid size of one sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetProperties {
    pub name: String,
    pub row_count: u32,
    pub col_count: u32,
}

impl SheetProperties {
    pub fn cells(&self) -> u64 {
        self.row_count as u64 * self.col_count as u64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpreadsheetMetadata {
    pub spreadsheet_id: String,
    pub sheets: Vec<SheetProperties>,
}

impl SpreadsheetMetadata {
    pub fn sheet(&self, name: &str) -> Option<&SheetProperties> {
        self.sheets.iter().find(|s| s.name == name)
    }

    /// Allocated cells across every sheet, the quantity the quota applies to.
    pub fn total_cells(&self) -> u64 {
        self.sheets.iter().map(SheetProperties::cells).sum()
    }
}

#[async_trait]
pub trait SheetBackend: Send + Sync {
    fn spreadsheet_id(&self) -> &str;

    async fn sheet_exists(&self, sheet: &str) -> Result<bool, SheetError>;

    async fn create_sheet(&self, sheet: &str) -> Result<(), SheetError>;

    async fn delete_sheet(&self, sheet: &str) -> Result<(), SheetError>;

    /// Sets the grid size. Fails with [`SheetError::QuotaExceeded`] when the
    /// document would exceed its cell limit.
    async fn resize_sheet(&self, sheet: &str, rows: u32, cols: u32) -> Result<(), SheetError>;

    /// Reads a range. Trailing empty rows and cells are omitted.
    async fn get_range(&self, sheet: &str, range: &str) -> Result<Vec<Vec<String>>, SheetError>;

    async fn update_range(
        &self,
        sheet: &str,
        range: &str,
        values: &[Vec<String>],
    ) -> Result<(), SheetError>;

    async fn clear_range(&self, sheet: &str, range: &str) -> Result<(), SheetError>;

    async fn get_sheet_metadata(&self) -> Result<SpreadsheetMetadata, SheetError>;
}

/// Opens backends by spreadsheet id.
#[async_trait]
pub trait SheetProvider: Send + Sync {
    async fn open(&self, spreadsheet_id: &str) -> Result<Arc<dyn SheetBackend>, SheetError>;
}
