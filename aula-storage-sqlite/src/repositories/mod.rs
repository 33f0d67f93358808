//! Repository implementations for SQLite storage

pub mod audit;
pub mod brute_force;
pub mod password;
pub mod session;
pub mod two_factor;
pub mod user;
pub mod watermark;

pub use audit::SqliteAuditRepository;
pub use brute_force::SqliteBruteForceRepository;
pub use password::SqlitePasswordRepository;
pub use session::SqliteSessionRepository;
pub use two_factor::SqliteTwoFactorRepository;
pub use user::SqliteUserRepository;
pub use watermark::SqliteWatermarkRepository;

use async_trait::async_trait;
use aula_core::{
    Error,
    error::StorageError,
    repositories::{
        AuditRepositoryProvider, BruteForceRepositoryProvider, PasswordRepositoryProvider,
        RepositoryProvider, SessionRepositoryProvider, TwoFactorRepositoryProvider,
        UserRepositoryProvider, WatermarkRepositoryProvider,
    },
};
use aula_migration::MigrationManager;
use sqlx::SqlitePool;

use crate::migrations::{SqliteMigrationManager, all_migrations};

/// Repository provider implementation for SQLite
///
/// All repositories share one pool. The same pool can be handed to
/// [`SqliteTableSource`](crate::SqliteTableSource) to sync the database's own tables.
pub struct SqliteRepositoryProvider {
    pool: SqlitePool,
    user: SqliteUserRepository,
    session: SqliteSessionRepository,
    password: SqlitePasswordRepository,
    brute_force: SqliteBruteForceRepository,
    two_factor: SqliteTwoFactorRepository,
    audit: SqliteAuditRepository,
    watermark: SqliteWatermarkRepository,
}

impl SqliteRepositoryProvider {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            user: SqliteUserRepository::new(pool.clone()),
            session: SqliteSessionRepository::new(pool.clone()),
            password: SqlitePasswordRepository::new(pool.clone()),
            brute_force: SqliteBruteForceRepository::new(pool.clone()),
            two_factor: SqliteTwoFactorRepository::new(pool.clone()),
            audit: SqliteAuditRepository::new(pool.clone()),
            watermark: SqliteWatermarkRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl UserRepositoryProvider for SqliteRepositoryProvider {
    type UserRepo = SqliteUserRepository;

    fn user(&self) -> &Self::UserRepo {
        &self.user
    }
}

impl SessionRepositoryProvider for SqliteRepositoryProvider {
    type SessionRepo = SqliteSessionRepository;

    fn session(&self) -> &Self::SessionRepo {
        &self.session
    }
}

impl PasswordRepositoryProvider for SqliteRepositoryProvider {
    type PasswordRepo = SqlitePasswordRepository;

    fn password(&self) -> &Self::PasswordRepo {
        &self.password
    }
}

impl BruteForceRepositoryProvider for SqliteRepositoryProvider {
    type BruteForceRepo = SqliteBruteForceRepository;

    fn brute_force(&self) -> &Self::BruteForceRepo {
        &self.brute_force
    }
}

impl TwoFactorRepositoryProvider for SqliteRepositoryProvider {
    type TwoFactorRepo = SqliteTwoFactorRepository;

    fn two_factor(&self) -> &Self::TwoFactorRepo {
        &self.two_factor
    }
}

impl AuditRepositoryProvider for SqliteRepositoryProvider {
    type AuditRepo = SqliteAuditRepository;

    fn audit(&self) -> &Self::AuditRepo {
        &self.audit
    }
}

impl WatermarkRepositoryProvider for SqliteRepositoryProvider {
    type WatermarkRepo = SqliteWatermarkRepository;

    fn watermark(&self) -> &Self::WatermarkRepo {
        &self.watermark
    }
}

#[async_trait]
impl RepositoryProvider for SqliteRepositoryProvider {
    async fn migrate(&self) -> Result<(), Error> {
        let manager = SqliteMigrationManager::new(self.pool.clone());
        manager.initialize().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize migrations");
            Error::Storage(StorageError::Migration(
                "Failed to initialize migrations".to_string(),
            ))
        })?;

        manager.up(&all_migrations()).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            Error::from(e)
        })?;

        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Connection(e.to_string())))?;
        Ok(())
    }
}
