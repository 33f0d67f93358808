use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Error,
    error::DependencyError,
    sync::{FieldType, Row},
};

/// Destination of synchronized rows.
#[async_trait]
pub trait Warehouse: Send + Sync + 'static {
    /// Create the table if it does not exist yet. Existing tables are left as they are.
    async fn ensure_table(&self, table: &str, schema: &TableSchema) -> Result<(), Error>;

    /// Append rows. Rows the warehouse refused are reported in the outcome by
    /// their index in `rows`; an `Err` means nothing is known to have been written.
    async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<InsertOutcome, Error>;

    /// Delete every row of a table. Succeeds when the table does not exist.
    async fn truncate(&self, table: &str) -> Result<(), Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub failed: Vec<RowFailure>,
}

impl InsertOutcome {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Datetime,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "STRING",
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "FLOAT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Date => "DATE",
            ColumnType::Datetime => "DATETIME",
        }
    }
}

impl From<FieldType> for ColumnType {
    fn from(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Date => ColumnType::Date,
            FieldType::Datetime => ColumnType::Datetime,
            FieldType::Integer => ColumnType::Integer,
            FieldType::Float => ColumnType::Float,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// Column layout of a warehouse table. Every column is nullable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: &str, column_type: ColumnType) -> Self {
        self.columns.push(Column {
            name: name.to_string(),
            column_type,
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.column_type)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A [`Warehouse`] kept in memory.
///
/// Rows can be made to fail on purpose with [`reject_rows_with`](Self::reject_rows_with)
/// and whole requests with [`fail_next_inserts`](Self::fail_next_inserts).
#[derive(Default)]
pub struct MemoryWarehouse {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    schemas: Mutex<HashMap<String, TableSchema>>,
    rejected: Mutex<Vec<(String, Value)>>,
    failing_inserts: AtomicUsize,
    insert_calls: AtomicUsize,
    truncations: AtomicUsize,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every row whose `field` equals `value`.
    pub fn reject_rows_with(&self, field: &str, value: Value) {
        self.rejected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((field.to_string(), value));
    }

    /// Fail the next `count` insert requests outright.
    pub fn fail_next_inserts(&self, count: usize) {
        self.failing_inserts.store(count, Ordering::SeqCst);
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn schema(&self, table: &str) -> Option<TableSchema> {
        self.schemas
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(table)
            .cloned()
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn truncations(&self) -> usize {
        self.truncations.load(Ordering::SeqCst)
    }

    fn rejects(&self, row: &Row) -> bool {
        self.rejected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|(field, value)| row.get(field) == Some(value))
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn ensure_table(&self, table: &str, schema: &TableSchema) -> Result<(), Error> {
        self.schemas
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(table.to_string())
            .or_insert_with(|| schema.clone());
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(table.to_string())
            .or_default();
        Ok(())
    }

    async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<InsertOutcome, Error> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failing_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(DependencyError::Warehouse("insert request failed".to_string()).into());
        }

        let mut outcome = InsertOutcome::success();
        let mut accepted = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            if self.rejects(row) {
                outcome.failed.push(RowFailure {
                    index,
                    reason: "row rejected".to_string(),
                });
            } else {
                accepted.push(row.clone());
            }
        }

        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let Some(stored) = tables.get_mut(table) else {
            return Err(DependencyError::Warehouse(format!("table {table} does not exist")).into());
        };
        stored.extend(accepted);

        Ok(outcome)
    }

    async fn truncate(&self, table: &str) -> Result<(), Error> {
        self.truncations.fetch_add(1, Ordering::SeqCst);
        if let Some(rows) = self
            .tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(table)
        {
            rows.clear();
        }
        Ok(())
    }
}
