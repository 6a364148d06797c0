use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use super::{ChangeLogEntry, ChangeLogStats, ChangeOperation, ChangeStatus};
use crate::error::StoreError;

#[derive(Clone)]
pub struct ChangeLogRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ChangeLogRow {
    id: i64,
    table_name: String,
    primary_key_value: String,
    operation: String,
    captured_at: String,
    status: String,
    attempt_count: i64,
    processed_at: Option<String>,
    last_error: Option<String>,
}

/// Fixed-width UTC timestamps so that text order is time order.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| decode_error(format!("invalid timestamp '{}': {}", value, e)))
}

fn decode_error(message: String) -> StoreError {
    StoreError::Database(sqlx::Error::Decode(message.into()))
}

impl TryFrom<ChangeLogRow> for ChangeLogEntry {
    type Error = StoreError;

    fn try_from(row: ChangeLogRow) -> Result<Self, Self::Error> {
        Ok(ChangeLogEntry {
            id: row.id,
            table_name: row.table_name,
            primary_key_value: row.primary_key_value,
            operation: row.operation.parse().map_err(decode_error)?,
            captured_at: parse_timestamp(&row.captured_at)?,
            status: row.status.parse().map_err(decode_error)?,
            attempt_count: row.attempt_count.max(0) as u32,
            processed_at: row
                .processed_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            last_error: row.last_error,
        })
    }
}

impl ChangeLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Appends an entry captured now.
    pub async fn record(
        &self,
        table_name: &str,
        primary_key_value: &str,
        operation: ChangeOperation,
    ) -> Result<i64, StoreError> {
        self.record_at(table_name, primary_key_value, operation, Utc::now())
            .await
    }

    pub async fn record_at(
        &self,
        table_name: &str,
        primary_key_value: &str,
        operation: ChangeOperation,
        captured_at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO change_log (table_name, primary_key_value, operation, captured_at, status, attempt_count)
            VALUES (?, ?, ?, ?, 'pending', 0)
            "#,
        )
        .bind(table_name)
        .bind(primary_key_value)
        .bind(operation.as_str())
        .bind(format_timestamp(captured_at))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get(&self, id: i64) -> Result<Option<ChangeLogEntry>, StoreError> {
        let row: Option<ChangeLogRow> = sqlx::query_as("SELECT * FROM change_log WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ChangeLogEntry::try_from).transpose()
    }

    /// Next entries to apply, oldest first: pending ones, plus failed ones
    /// that still have attempts left.
    pub async fn fetch_batch(
        &self,
        limit: u32,
        max_attempts: u32,
    ) -> Result<Vec<ChangeLogEntry>, StoreError> {
        let rows: Vec<ChangeLogRow> = sqlx::query_as(
            r#"
            SELECT * FROM change_log
            WHERE status = 'pending' OR (status = 'failed' AND attempt_count < ?)
            ORDER BY captured_at, id
            LIMIT ?
            "#,
        )
        .bind(max_attempts as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChangeLogEntry::try_from).collect()
    }

    async fn set_status(&self, id: i64, status: ChangeStatus) -> Result<(), StoreError> {
        sqlx::query("UPDATE change_log SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_processing(&self, id: i64) -> Result<(), StoreError> {
        self.set_status(id, ChangeStatus::Processing).await
    }

    pub async fn mark_applied(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE change_log SET status = 'applied', processed_at = ?, last_error = NULL WHERE id = ?",
        )
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records a failed attempt. The entry stays in the table.
    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE change_log SET status = 'failed', attempt_count = attempt_count + 1, last_error = ? WHERE id = ?",
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns entries left in `processing` by an interrupted run to the queue.
    pub async fn reset_stale_processing(&self) -> Result<u64, StoreError> {
        let result =
            sqlx::query("UPDATE change_log SET status = 'pending' WHERE status = 'processing'")
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Counts per status. `running` is left false for the caller to fill in.
    pub async fn stats(&self, max_attempts: u32) -> Result<ChangeLogStats, StoreError> {
        let counts: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM change_log GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = ChangeLogStats {
            pending: 0,
            processing: 0,
            applied: 0,
            failed: 0,
            exhausted: 0,
            max_attempts,
            oldest_pending: None,
            running: false,
            timestamp: Utc::now(),
        };
        for (status, count) in counts {
            let count = count.max(0) as u64;
            match status.parse::<ChangeStatus>() {
                Ok(ChangeStatus::Pending) => stats.pending = count,
                Ok(ChangeStatus::Processing) => stats.processing = count,
                Ok(ChangeStatus::Applied) => stats.applied = count,
                Ok(ChangeStatus::Failed) => stats.failed = count,
                Err(_) => {}
            }
        }

        let (exhausted,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM change_log WHERE status = 'failed' AND attempt_count >= ?",
        )
        .bind(max_attempts as i64)
        .fetch_one(&self.pool)
        .await?;
        stats.exhausted = exhausted.max(0) as u64;

        let (oldest,): (Option<String>,) =
            sqlx::query_as("SELECT MIN(captured_at) FROM change_log WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        stats.oldest_pending = oldest.as_deref().map(parse_timestamp).transpose()?;

        Ok(stats)
    }

    /// Deletes applied entries processed before `cutoff`, `batch_size` at a time.
    pub async fn purge_applied_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<u64, StoreError> {
        let cutoff = format_timestamp(cutoff);
        let batch_size = batch_size.max(1) as u64;
        let mut purged = 0;

        loop {
            let result = sqlx::query(
                r#"
                DELETE FROM change_log WHERE id IN (
                    SELECT id FROM change_log
                    WHERE status = 'applied' AND processed_at < ?
                    ORDER BY id
                    LIMIT ?
                )
                "#,
            )
            .bind(&cutoff)
            .bind(batch_size as i64)
            .execute(&self.pool)
            .await?;

            purged += result.rows_affected();
            if result.rows_affected() < batch_size {
                break;
            }
        }

        Ok(purged)
    }
}
