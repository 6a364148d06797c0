//! Incremental replication from the `change_log` table.
//!
//! Producers append one entry per row-level mutation. The processor drains
//! entries in capture order and applies each one to the mapped sheet; the
//! repository owns the status transitions
//! `pending -> processing -> applied | failed`, where failed entries return to
//! the queue until their attempts run out.

mod processor;
mod repository;

pub use processor::ChangeLogProcessor;
pub use repository::ChangeLogRepository;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Insert => "insert",
            ChangeOperation::Update => "update",
            ChangeOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(ChangeOperation::Insert),
            "update" => Ok(ChangeOperation::Update),
            "delete" => Ok(ChangeOperation::Delete),
            other => Err(format!("unknown operation '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Pending,
    Processing,
    Applied,
    Failed,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Pending => "pending",
            ChangeStatus::Processing => "processing",
            ChangeStatus::Applied => "applied",
            ChangeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ChangeStatus::Pending),
            "processing" => Ok(ChangeStatus::Processing),
            "applied" => Ok(ChangeStatus::Applied),
            "failed" => Ok(ChangeStatus::Failed),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// One captured row-level mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeLogEntry {
    pub id: i64,
    pub table_name: String,
    pub primary_key_value: String,
    pub operation: ChangeOperation,
    pub captured_at: DateTime<Utc>,
    pub status: ChangeStatus,
    pub attempt_count: u32,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeLogStats {
    pub pending: u64,
    pub processing: u64,
    pub applied: u64,
    pub failed: u64,
    /// Failed entries that reached the attempt ceiling and will not be retried.
    pub exhausted: u64,
    pub max_attempts: u32,
    pub oldest_pending: Option<DateTime<Utc>>,
    pub running: bool,
    pub timestamp: DateTime<Utc>,
}

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub processed_count: usize,
    pub error_count: usize,
}
