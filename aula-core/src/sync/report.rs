use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::sync::SyncMode;

/// Outcome of one table within a sync job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub table: String,
    pub synced_count: u64,
    pub errors: Vec<String>,
    /// The table could not be read or prepared, so nothing was pushed.
    pub skipped: bool,
    pub watermark_advanced: bool,
    /// Things worth knowing that are not failures.
    pub notes: Vec<String>,
}

impl TableReport {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn skip(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self.skipped = true;
        self
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Outcome of a whole sync job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables: Vec<TableReport>,
    /// Failures that are not tied to one table, such as listing the source tables.
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn new(mode: SyncMode) -> Self {
        let now = Utc::now();
        Self {
            mode,
            started_at: now,
            finished_at: now,
            tables: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn total_synced(&self) -> u64 {
        self.tables.iter().map(|t| t.synced_count).sum()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.tables.iter().any(TableReport::has_errors)
    }

    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }
}
