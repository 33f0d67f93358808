//! Reads arbitrary SQLite tables as JSON rows for the warehouse sync.

use async_trait::async_trait;
use aula_core::{
    Error,
    error::{StorageError, utilities::DatabaseResultExt},
    sync::{Row, TableSource},
    validation::validate_table_name,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{
    Column, Row as _, SqlitePool, TypeInfo, ValueRef,
    sqlite::SqliteRow,
};

/// A [`TableSource`] over every table of one SQLite database.
#[derive(Clone)]
pub struct SqliteTableSource {
    pool: SqlitePool,
}

impl SqliteTableSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn columns(&self, table: &str) -> Result<Vec<String>, Error> {
        sqlx::query_scalar("SELECT name FROM pragma_table_info(?1)")
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, table, "Failed to read table columns");
                StorageError::Database(format!("Failed to read columns of {table}")).into()
            })
    }

    async fn select(&self, table: &str, sql: &str, since: Option<i64>) -> Result<Vec<Row>, Error> {
        let mut query = sqlx::query(sql);
        if let Some(since) = since {
            query = query.bind(since);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| {
            tracing::error!(error = %e, table, "Failed to read table");
            StorageError::Database(format!("Failed to read table {table}"))
        })?;

        Ok(rows.iter().map(to_json_row).collect())
    }
}

/// Quote an identifier that already passed [`validate_table_name`].
fn quoted(identifier: &str) -> String {
    format!("\"{identifier}\"")
}

/// Whole unix seconds of a timestamp column holding either unix seconds or text.
fn epoch_seconds(expression: &str) -> String {
    format!(
        "CASE WHEN typeof({expression}) IN ('integer', 'real') \
         THEN CAST({expression} AS INTEGER) \
         ELSE CAST(strftime('%s', {expression}) AS INTEGER) END"
    )
}

fn to_json_row(row: &SqliteRow) -> Row {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), column_value(row, index));
    }
    out
}

fn column_value(row: &SqliteRow, index: usize) -> Value {
    let Ok(raw) = row.try_get_raw(index) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }

    // SQLite is dynamically typed, so decode by the stored value's class
    match raw.type_info().name() {
        "INTEGER" => row
            .try_get_unchecked::<i64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" => row
            .try_get_unchecked::<f64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get_unchecked::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

#[async_trait]
impl TableSource for SqliteTableSource {
    async fn list_tables(&self) -> Result<Vec<String>, Error> {
        sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_db_err_with_context("Failed to list tables")
    }

    async fn fetch_all(&self, table: &str) -> Result<Vec<Row>, Error> {
        validate_table_name(table)?;
        let sql = format!("SELECT * FROM {}", quoted(table));
        self.select(table, &sql, None).await
    }

    async fn fetch_changed_since(
        &self,
        table: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Vec<Row>>, Error> {
        validate_table_name(table)?;
        let columns = self.columns(table).await?;
        let has = |name: &str| columns.iter().any(|c| c.eq_ignore_ascii_case(name));

        let stamp = match (has("updated_at"), has("created_at")) {
            (true, true) => "COALESCE(\"updated_at\", \"created_at\")".to_string(),
            (true, false) => quoted("updated_at"),
            (false, true) => quoted("created_at"),
            (false, false) => {
                tracing::debug!(table, "Table has no timestamp columns");
                return Ok(None);
            }
        };

        // Inclusive on whole seconds: a row written in the same second as the
        // watermark is sent again rather than lost.
        let sql = format!(
            "SELECT * FROM {} WHERE {} >= ?1",
            quoted(table),
            epoch_seconds(&stamp)
        );
        self.select(table, &sql, Some(since.timestamp()))
            .await
            .map(Some)
    }
}
