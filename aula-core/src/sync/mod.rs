//! Table synchronization into an analytics warehouse
//!
//! A [`TableSynchronizer`] reads rows from a [`TableSource`], converts them with
//! a [`RowTransformer`] and pushes them to a [`Warehouse`] in batches. Incremental
//! runs only fetch rows changed since the table's [`SyncWatermark`].
//!
//! Failures are isolated: a malformed row does not stop its batch, a failed batch
//! does not stop its table, and a failed table does not stop the job. Everything
//! that went wrong is collected into the returned [`SyncReport`].
//!
//! [`SyncWatermark`]: crate::storage::SyncWatermark

pub mod field_types;
pub mod report;
pub mod source;
pub mod synchronizer;
pub mod transform;
pub mod warehouse;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub use field_types::{FieldType, FieldTypeMap};
pub use report::{SyncReport, TableReport};
pub use source::TableSource;
pub use synchronizer::{SyncConfig, SyncOptions, TableLocks, TableSynchronizer};
pub use transform::{RowTransformer, TransformError};
pub use warehouse::{
    Column, ColumnType, InsertOutcome, MemoryWarehouse, RowFailure, TableSchema, Warehouse,
};

/// A source row: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Push every row of the table.
    Full,
    /// Push rows changed since the last successful run.
    Incremental,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(SyncMode::Full),
            "incremental" => Ok(SyncMode::Incremental),
            other => Err(ValidationError::InvalidField(format!("sync mode {other}"))),
        }
    }
}
