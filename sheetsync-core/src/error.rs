//! Error types shared by the sync engines.

use thiserror::Error;

use crate::mapping::MappingError;

/// Errors raised by a [`SheetBackend`](crate::sheets::SheetBackend).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SheetError {
    /// The operation would push the document over its cell quota.
    #[error("cell quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The named sheet does not exist in the document.
    #[error("sheet not found: {0}")]
    NotFound(String),

    /// Network, authentication or rate-limit failure.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend understood the request and refused it.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The range could not be parsed.
    #[error("invalid range '{0}'")]
    InvalidRange(String),

    /// The backend answered with something we could not decode.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors raised by the relational store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),
}

/// Errors surfaced by the sync engines.
///
/// The first four variants are the operational taxonomy reported per table;
/// the rest wrap lower-level failures.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The spreadsheet refused to grow. Recovered locally by the capacity manager.
    #[error("cell quota exceeded for '{sheet}': {message}")]
    QuotaExceeded { sheet: String, message: String },

    /// A write was accepted but the read-back did not confirm it.
    #[error("verification failed for '{sheet}': {verified} of {expected} rows confirmed")]
    VerificationFailed {
        sheet: String,
        expected: usize,
        verified: usize,
    },

    /// Transient network/auth failure on either store.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Missing table mapping or ledger row.
    #[error("configuration gap: {0}")]
    ConfigurationGap(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),
}

impl SyncError {
    /// Returns true if re-running the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::VerificationFailed { .. } | SyncError::BackendUnavailable(_) => true,
            SyncError::Store(StoreError::Database(_)) => true,
            _ => false,
        }
    }

    /// Short outcome class used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::QuotaExceeded { .. } => "quota_exceeded",
            SyncError::VerificationFailed { .. } => "verification_failed",
            SyncError::BackendUnavailable(_) => "backend_unavailable",
            SyncError::ConfigurationGap(_) => "configuration_gap",
            SyncError::Store(_) => "store",
            SyncError::Mapping(_) => "mapping",
        }
    }

    pub(crate) fn from_sheet(sheet: &str, err: SheetError) -> Self {
        match err {
            SheetError::QuotaExceeded(message) => SyncError::QuotaExceeded {
                sheet: sheet.to_string(),
                message,
            },
            other => SyncError::BackendUnavailable(format!("sheet '{}': {}", sheet, other)),
        }
    }
}

impl From<SheetError> for SyncError {
    fn from(err: SheetError) -> Self {
        match err {
            SheetError::QuotaExceeded(message) => SyncError::QuotaExceeded {
                sheet: String::new(),
                message,
            },
            other => SyncError::BackendUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::BackendUnavailable("timeout".into()).is_retryable());
        assert!(SyncError::VerificationFailed {
            sheet: "wb_price".into(),
            expected: 10,
            verified: 0,
        }
        .is_retryable());
        assert!(!SyncError::ConfigurationGap("no mapping".into()).is_retryable());
    }

    #[test]
    fn sheet_errors_map_to_taxonomy() {
        let err = SyncError::from_sheet("wb_price", SheetError::QuotaExceeded("full".into()));
        assert_eq!(err.kind(), "quota_exceeded");

        let err = SyncError::from_sheet("wb_price", SheetError::Unavailable("503".into()));
        assert_eq!(err.kind(), "backend_unavailable");
        assert!(err.to_string().contains("wb_price"));
    }
}
