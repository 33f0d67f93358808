//! Versioned schema migrations for aula storage backends.
//!
//! A backend implements [`Migration`] once per schema change and
//! [`MigrationManager`] once for its database. Applied versions are tracked in
//! the `_aula_migrations` table, which the table synchronizer never exports.

use async_trait::async_trait;
use aula_core::error::StorageError;
use sqlx::Database;
use thiserror::Error;

/// Name of the table recording applied migrations.
pub const MIGRATION_TABLE: &str = "_aula_migrations";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Migration {version} ({name}) failed: {source}")]
    Step {
        version: i64,
        name: String,
        #[source]
        source: Box<MigrationError>,
    },
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<MigrationError> for aula_core::Error {
    fn from(error: MigrationError) -> Self {
        aula_core::Error::Storage(StorageError::Migration(error.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, MigrationError>;

#[async_trait]
pub trait Migration<DB: Database>: Send + Sync {
    /// Apply the schema change
    async fn up<'a>(&'a self, conn: &'a mut <DB as Database>::Connection) -> Result<()>;

    /// Revert the schema change
    async fn down<'a>(&'a self, conn: &'a mut <DB as Database>::Connection) -> Result<()>;

    /// Unique, increasing version number
    fn version(&self) -> i64;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    /// Unix seconds
    pub applied_at: i64,
}

#[async_trait]
pub trait MigrationManager<DB: Database>: Send + Sync {
    fn get_migration_table_name(&self) -> &str {
        MIGRATION_TABLE
    }

    /// Create the tracking table if needed
    async fn initialize(&self) -> Result<()>;

    /// Apply every migration not applied yet, in the given order. Each
    /// migration runs in its own transaction.
    async fn up(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<()>;

    /// Revert every applied migration, in reverse order
    async fn down(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<()>;

    async fn get_applied_migrations(&self) -> Result<Vec<MigrationRecord>>;

    async fn is_applied(&self, version: i64) -> Result<bool>;

    /// Versions from `migrations` that have not been applied
    async fn get_pending_versions(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<Vec<i64>> {
        let applied: Vec<i64> = self
            .get_applied_migrations()
            .await?
            .into_iter()
            .map(|r| r.version)
            .collect();

        Ok(migrations
            .iter()
            .map(|m| m.version())
            .filter(|v| !applied.contains(v))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_names_the_migration() {
        let error = MigrationError::Step {
            version: 3,
            name: "CreateLoginBlocksTable".to_string(),
            source: Box::new(MigrationError::Migration("table exists".to_string())),
        };
        assert_eq!(
            error.to_string(),
            "Migration 3 (CreateLoginBlocksTable) failed: Migration failed: table exists"
        );

        let core: aula_core::Error = error.into();
        assert!(core.is_storage_error());
    }
}
