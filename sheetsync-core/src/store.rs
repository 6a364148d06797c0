//! Relational store access.
//!
//! [`RelationalStore`] is the seam the engines talk through; [`SqliteStore`]
//! is the sqlx-backed implementation. Table and column names come from the
//! validated mapping registry and are additionally checked and quoted here,
//! values are always bound.

use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Column, Decode, Row as _, TypeInfo, ValueRef};
use std::path::Path;
use std::str::FromStr;

use crate::error::StoreError;
use crate::mapping::is_valid_identifier;
use crate::value::{Row, Value};

/// Initialize the database connection pool and run migrations.
pub async fn init_db(path: &Path) -> Result<SqlitePool, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// A row-level write against one table.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert the row, or update it when the primary key already exists.
    Upsert { primary_key: String, row: Row },
    /// Remove the row with this primary key value. Missing rows are not an error.
    Delete { primary_key: String, key: Value },
}

/// A narrow `SELECT` description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectQuery {
    table: String,
    columns: Option<Vec<String>>,
    filter: Option<(String, Vec<Value>)>,
    order_by: Option<String>,
    descending: bool,
    limit: Option<u32>,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    /// Restricts the result to rows whose `field` is one of `keys`.
    pub fn where_in(mut self, field: impl Into<String>, keys: Vec<Value>) -> Self {
        self.filter = Some((field.into(), keys));
        self
    }

    /// Ascending order on `field`.
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self.descending = false;
        self
    }

    /// Descending order on `field`.
    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self.descending = true;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Renders SQL with `?` placeholders, plus the values to bind in order.
    pub fn to_sql(&self) -> Result<(String, Vec<Value>), StoreError> {
        let mut sql = String::from("SELECT ");
        match &self.columns {
            Some(columns) if !columns.is_empty() => {
                let quoted = columns
                    .iter()
                    .map(|c| quote_ident(c))
                    .collect::<Result<Vec<_>, _>>()?;
                sql.push_str(&quoted.join(", "));
            }
            _ => sql.push('*'),
        }
        sql.push_str(" FROM ");
        sql.push_str(&quote_ident(&self.table)?);

        let mut binds = Vec::new();
        if let Some((field, keys)) = &self.filter {
            if keys.is_empty() {
                sql.push_str(" WHERE 0");
            } else {
                let placeholders = vec!["?"; keys.len()].join(", ");
                sql.push_str(&format!(
                    " WHERE {} IN ({})",
                    quote_ident(field)?,
                    placeholders
                ));
                binds.extend(keys.iter().cloned());
            }
        }
        if let Some(order) = &self.order_by {
            let direction = if self.descending { "DESC" } else { "ASC" };
            sql.push_str(&format!(" ORDER BY {} {}", quote_ident(order)?, direction));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        Ok((sql, binds))
    }
}

fn quote_ident(name: &str) -> Result<String, StoreError> {
    if !is_valid_identifier(name) {
        return Err(StoreError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name))
}

/// The authoritative relational side.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn fetch_all(&self, query: &SelectQuery) -> Result<Vec<Row>, StoreError>;

    async fn apply_mutation(&self, table: &str, mutation: Mutation) -> Result<(), StoreError>;

    /// Applies several mutations. Implementations may make this atomic.
    async fn apply_batch(&self, table: &str, mutations: Vec<Mutation>) -> Result<(), StoreError> {
        for mutation in mutations {
            self.apply_mutation(table, mutation).await?;
        }
        Ok(())
    }

    /// Row count, used as the size estimate when a sheet is created.
    async fn count(&self, table: &str) -> Result<u64, StoreError>;
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_value(query: SqliteQuery<'_>, value: Value) -> SqliteQuery<'_> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Integer(v) => query.bind(v),
        Value::Real(v) => query.bind(v),
        Value::Text(s) => query.bind(s),
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> Result<Row, StoreError> {
    let mut out = Row::with_capacity(row.columns().len());
    for column in row.columns() {
        let raw = row.try_get_raw(column.ordinal())?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_string();
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => {
                    Value::Integer(<i64 as Decode<Sqlite>>::decode(raw).map_err(sqlx::Error::Decode)?)
                }
                "REAL" | "NUMERIC" => {
                    Value::Real(<f64 as Decode<Sqlite>>::decode(raw).map_err(sqlx::Error::Decode)?)
                }
                "BLOB" => {
                    let bytes =
                        <Vec<u8> as Decode<Sqlite>>::decode(raw).map_err(sqlx::Error::Decode)?;
                    Value::Text(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => Value::Text(
                    <String as Decode<Sqlite>>::decode(raw).map_err(sqlx::Error::Decode)?,
                ),
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

/// Builds the statement for one mutation.
fn mutation_sql(table: &str, mutation: &Mutation) -> Result<(String, Vec<Value>), StoreError> {
    let table = quote_ident(table)?;
    match mutation {
        Mutation::Upsert { primary_key, row } => {
            let pk = quote_ident(primary_key)?;
            let mut names: Vec<&String> = row.keys().collect();
            names.sort();

            let mut columns = Vec::with_capacity(names.len());
            let mut updates = Vec::new();
            let mut binds = Vec::with_capacity(names.len());
            for name in names {
                let quoted = quote_ident(name)?;
                if name != primary_key {
                    updates.push(format!("{0} = excluded.{0}", quoted));
                }
                columns.push(quoted);
                binds.push(row.get(name).cloned().unwrap_or(Value::Null));
            }

            let placeholders = vec!["?"; columns.len()].join(", ");
            let conflict = if updates.is_empty() {
                "DO NOTHING".to_string()
            } else {
                format!("DO UPDATE SET {}", updates.join(", "))
            };
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) {}",
                table,
                columns.join(", "),
                placeholders,
                pk,
                conflict
            );
            Ok((sql, binds))
        }
        Mutation::Delete { primary_key, key } => {
            let sql = format!("DELETE FROM {} WHERE {} = ?", table, quote_ident(primary_key)?);
            Ok((sql, vec![key.clone()]))
        }
    }
}

/// SQLite-backed [`RelationalStore`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database at `path` and runs migrations.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(init_db(path).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RelationalStore for SqliteStore {
    async fn fetch_all(&self, query: &SelectQuery) -> Result<Vec<Row>, StoreError> {
        let (sql, binds) = query.to_sql()?;
        let mut q = sqlx::query(&sql);
        for value in binds {
            q = bind_value(q, value);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn apply_mutation(&self, table: &str, mutation: Mutation) -> Result<(), StoreError> {
        let (sql, binds) = mutation_sql(table, &mutation)?;
        let mut q = sqlx::query(&sql);
        for value in binds {
            q = bind_value(q, value);
        }
        q.execute(&self.pool).await?;
        Ok(())
    }

    async fn apply_batch(&self, table: &str, mutations: Vec<Mutation>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for mutation in &mutations {
            let (sql, binds) = mutation_sql(table, mutation)?;
            let mut q = sqlx::query(&sql);
            for value in binds {
                q = bind_value(q, value);
            }
            q.execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table)?);
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup() -> (SqliteStore, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let store = SqliteStore::open(&temp_dir.path().join("test.db"))
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE price_wb (id INTEGER PRIMARY KEY, nm_id TEXT, price INTEGER, rating REAL)",
        )
        .execute(store.pool())
        .await
        .unwrap();
        (store, temp_dir)
    }

    fn row(id: i64, nm_id: Option<&str>, price: i64) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), Value::Integer(id));
        row.insert(
            "nm_id".into(),
            nm_id.map(Value::from).unwrap_or(Value::Null),
        );
        row.insert("price".into(), Value::Integer(price));
        row
    }

    fn upsert(r: Row) -> Mutation {
        Mutation::Upsert {
            primary_key: "id".into(),
            row: r,
        }
    }

    #[tokio::test]
    async fn test_init_db_creates_change_log() {
        let temp_dir = tempdir().unwrap();
        let pool = init_db(&temp_dir.path().join("nested/dir/test.db"))
            .await
            .unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%'",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(table_names.contains(&"change_log"));
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_updates() {
        let (store, _dir) = setup().await;

        store
            .apply_mutation("price_wb", upsert(row(1, Some("A-1"), 100)))
            .await
            .unwrap();
        store
            .apply_mutation("price_wb", upsert(row(1, None, 250)))
            .await
            .unwrap();

        let rows = store
            .fetch_all(&SelectQuery::new("price_wb"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("nm_id"), Some(&Value::Null));
        assert_eq!(rows[0].get("price"), Some(&Value::Integer(250)));
        assert_eq!(rows[0].get("rating"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_fetch_orders_limits_and_filters() {
        let (store, _dir) = setup().await;
        let batch = [5, 3, 9, 1]
            .iter()
            .map(|id| upsert(row(*id, Some("x"), id * 10)))
            .collect();
        store.apply_batch("price_wb", batch).await.unwrap();

        let query = SelectQuery::new("price_wb")
            .columns(vec!["id".into()])
            .order_by("id")
            .limit(3);
        let ids: Vec<Value> = store
            .fetch_all(&query)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r["id"].clone())
            .collect();
        assert_eq!(
            ids,
            vec![Value::Integer(1), Value::Integer(3), Value::Integer(5)]
        );

        let query = SelectQuery::new("price_wb")
            .columns(vec!["id".into()])
            .order_by_desc("id")
            .limit(2);
        let ids: Vec<Value> = store
            .fetch_all(&query)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r["id"].clone())
            .collect();
        assert_eq!(ids, vec![Value::Integer(9), Value::Integer(5)]);

        // text keys still match integer columns
        let query = SelectQuery::new("price_wb").where_in("id", vec!["9".into(), "4".into()]);
        let rows = store.fetch_all(&query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["price"], Value::Integer(90));

        let query = SelectQuery::new("price_wb").where_in("id", vec![]);
        assert!(store.fetch_all(&query).await.unwrap().is_empty());

        assert_eq!(store.count("price_wb").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_delete_by_text_key() {
        let (store, _dir) = setup().await;
        store
            .apply_mutation("price_wb", upsert(row(7, None, 1)))
            .await
            .unwrap();
        store
            .apply_mutation(
                "price_wb",
                Mutation::Delete {
                    primary_key: "id".into(),
                    key: "7".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(store.count("price_wb").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejects_injected_identifiers() {
        let (store, _dir) = setup().await;
        let err = store
            .fetch_all(&SelectQuery::new("price_wb; DROP TABLE price_wb"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidIdentifier(_)));
    }

    #[test]
    fn test_select_sql_rendering() {
        let (sql, binds) = SelectQuery::new("t")
            .columns(vec!["a".into(), "b".into()])
            .where_in("a", vec![1i64.into(), 2i64.into()])
            .order_by("a")
            .limit(10)
            .to_sql()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT \"a\", \"b\" FROM \"t\" WHERE \"a\" IN (?, ?) ORDER BY \"a\" ASC LIMIT 10"
        );
        assert_eq!(binds.len(), 2);

        let (sql, _) = SelectQuery::new("t")
            .order_by_desc("a")
            .limit(5)
            .to_sql()
            .unwrap();
        assert_eq!(sql, "SELECT * FROM \"t\" ORDER BY \"a\" DESC LIMIT 5");
    }
}
