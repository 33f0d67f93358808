use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Error, sync::Row};

/// Relational tables that can be read for synchronization.
#[async_trait]
pub trait TableSource: Send + Sync + 'static {
    /// Names of every table in the source, including internal ones.
    async fn list_tables(&self) -> Result<Vec<String>, Error>;

    async fn fetch_all(&self, table: &str) -> Result<Vec<Row>, Error>;

    /// Rows changed at or after `since`, compared in whole seconds.
    ///
    /// Tables with an `updated_at` column are filtered on it, tables with only
    /// `created_at` on that. Tables with neither give `None`.
    async fn fetch_changed_since(
        &self,
        table: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Vec<Row>>, Error>;
}
