//! SQLite storage backend for aula
//!
//! [`SqliteRepositoryProvider`] implements every repository trait of
//! `aula-core` on one connection pool, and [`SqliteTableSource`] reads
//! arbitrary tables of the same database for the warehouse sync.
//!
//! ```rust,no_run
//! use aula_core::repositories::RepositoryProvider;
//! use aula_storage_sqlite::{SqliteRepositoryProvider, connect};
//!
//! # async fn example() -> Result<(), aula_core::Error> {
//! let pool = connect("sqlite://aula.db?mode=rwc").await?;
//! let provider = SqliteRepositoryProvider::new(pool);
//! provider.migrate().await?;
//! # Ok(())
//! # }
//! ```
pub mod migrations;
pub mod repositories;
pub mod source;

use std::str::FromStr;

use aula_core::{Error, error::StorageError};
use chrono::{DateTime, Utc};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

pub use repositories::SqliteRepositoryProvider;
pub use source::SqliteTableSource;

/// Open a pool on `database_url`, creating the database file if needed.
pub async fn connect(database_url: &str) -> Result<SqlitePool, Error> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| StorageError::Connection(format!("Invalid database URL: {e}")))?
        .create_if_missing(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to database");
            StorageError::Connection(format!("Failed to connect to database: {e}")).into()
        })
}

pub(crate) fn from_timestamp(timestamp: i64) -> Result<DateTime<Utc>, Error> {
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| StorageError::Database(format!("Invalid timestamp: {timestamp}")).into())
}

pub(crate) fn from_timestamp_millis(timestamp: i64) -> Result<DateTime<Utc>, Error> {
    DateTime::from_timestamp_millis(timestamp)
        .ok_or_else(|| StorageError::Database(format!("Invalid timestamp: {timestamp}")).into())
}

#[cfg(test)]
pub(crate) mod test_support {
    use aula_migration::MigrationManager;
    use sqlx::SqlitePool;

    use crate::migrations::{SqliteMigrationManager, all_migrations};

    pub async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("Failed to create pool");

        let manager = SqliteMigrationManager::new(pool.clone());
        manager
            .initialize()
            .await
            .expect("Failed to initialize migrations");
        manager
            .up(&all_migrations())
            .await
            .expect("Failed to run migrations");

        pool
    }

    pub async fn create_test_user(pool: &SqlitePool, email: &str) -> String {
        let id = format!("usr_{}", email.replace(['@', '.'], "_"));
        sqlx::query("INSERT INTO users (id, email, roles) VALUES (?, ?, '[\"student\"]')")
            .bind(&id)
            .bind(email)
            .execute(pool)
            .await
            .expect("Failed to create test user");
        id
    }
}
