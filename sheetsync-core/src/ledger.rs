//! Replication status ledger.
//!
//! The ledger is an ordinary sheet (by default `tech`) in the administrative
//! spreadsheet. Row 1 is a header; each further row is
//! `[client, spreadsheet, table, -, -, exported_to_relation, exported_from_relation]`.
//! Updates rewrite exactly one row, `A{n}:G{n}`, so concurrent edits of other
//! rows by people are never clobbered.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::a1::row_range;
use crate::error::SheetError;
use crate::sheets::SheetBackend;

pub const DEFAULT_LEDGER_SHEET: &str = "tech";

const LEDGER_COLUMNS: usize = 7;
const COL_CLIENT: usize = 0;
const COL_SPREADSHEET: usize = 1;
const COL_TABLE: usize = 2;
const COL_TO_RELATION: usize = 5;
const COL_FROM_RELATION: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerRecord {
    pub client_id: String,
    pub spreadsheet_id: String,
    pub table_name: String,
    pub exported_to_relation: bool,
    pub exported_from_relation: bool,
    /// 1-based sheet row.
    pub row_index: usize,
}

/// Flags to change; `None` leaves the stored value alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerUpdate {
    pub exported_to_relation: Option<bool>,
    pub exported_from_relation: Option<bool>,
}

impl LedgerUpdate {
    pub fn to_relation(value: bool) -> Self {
        Self {
            exported_to_relation: Some(value),
            exported_from_relation: None,
        }
    }

    pub fn from_relation(value: bool) -> Self {
        Self {
            exported_to_relation: None,
            exported_from_relation: Some(value),
        }
    }
}

fn parse_flag(cell: Option<&String>) -> bool {
    cell.is_some_and(|c| c.trim().eq_ignore_ascii_case("true"))
}

fn flag_text(value: bool) -> String {
    let text = if value { "TRUE" } else { "FALSE" };
    text.to_string()
}

fn parse_record(row: &[String], row_index: usize) -> Option<LedgerRecord> {
    let cell = |idx: usize| row.get(idx).map(|c| c.trim()).unwrap_or("");
    let client_id = cell(COL_CLIENT);
    let spreadsheet_id = cell(COL_SPREADSHEET);
    let table_name = cell(COL_TABLE);
    if client_id.is_empty() || spreadsheet_id.is_empty() || table_name.is_empty() {
        return None;
    }
    Some(LedgerRecord {
        client_id: client_id.to_string(),
        spreadsheet_id: spreadsheet_id.to_string(),
        table_name: table_name.to_string(),
        exported_to_relation: parse_flag(row.get(COL_TO_RELATION)),
        exported_from_relation: parse_flag(row.get(COL_FROM_RELATION)),
        row_index,
    })
}

#[derive(Clone)]
pub struct StatusLedger {
    backend: Arc<dyn SheetBackend>,
    sheet_name: String,
}

impl StatusLedger {
    pub fn new(backend: Arc<dyn SheetBackend>, sheet_name: impl Into<String>) -> Self {
        Self {
            backend,
            sheet_name: sheet_name.into(),
        }
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    pub fn spreadsheet_id(&self) -> &str {
        self.backend.spreadsheet_id()
    }

    async fn read_rows(&self) -> Result<Vec<Vec<String>>, SheetError> {
        self.backend.get_range(&self.sheet_name, "").await
    }

    /// Every well-formed data row, in sheet order.
    pub async fn list_records(&self) -> Result<Vec<LedgerRecord>, SheetError> {
        let rows = self.read_rows().await?;
        Ok(rows
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(idx, row)| parse_record(row, idx + 1))
            .collect())
    }

    pub async fn find_record(
        &self,
        client_id: &str,
        table_name: &str,
    ) -> Result<Option<LedgerRecord>, SheetError> {
        Ok(self
            .list_records()
            .await?
            .into_iter()
            .find(|r| r.client_id == client_id && r.table_name == table_name))
    }

    /// Rewrites the flags of one row.
    ///
    /// Returns false, after logging a warning, when no row matches.
    pub async fn update_record(
        &self,
        client_id: &str,
        table_name: &str,
        update: LedgerUpdate,
    ) -> Result<bool, SheetError> {
        let rows = self.read_rows().await?;
        let found = rows.iter().enumerate().skip(1).find(|(_, row)| {
            row.get(COL_CLIENT).map(|c| c.trim()) == Some(client_id)
                && row.get(COL_TABLE).map(|c| c.trim()) == Some(table_name)
        });

        let Some((idx, row)) = found else {
            warn!(
                client = client_id,
                table = table_name,
                "No row found in ledger"
            );
            return Ok(false);
        };

        let mut updated = row.clone();
        if updated.len() < LEDGER_COLUMNS {
            updated.resize(LEDGER_COLUMNS, String::new());
        }
        if let Some(value) = update.exported_to_relation {
            updated[COL_TO_RELATION] = flag_text(value);
        }
        if let Some(value) = update.exported_from_relation {
            updated[COL_FROM_RELATION] = flag_text(value);
        }

        let row_index = idx + 1;
        let width = updated.len().max(LEDGER_COLUMNS);
        self.backend
            .update_range(&self.sheet_name, &row_range(row_index, width), &[updated])
            .await?;

        info!(
            client = client_id,
            table = table_name,
            to_relation = ?update.exported_to_relation,
            from_relation = ?update.exported_from_relation,
            "Updated ledger status"
        );
        Ok(true)
    }
}
