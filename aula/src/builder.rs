//! Builder pattern for constructing Aula instances
//!
//! This module provides a type-safe builder for creating [`Aula`] instances with
//! compile-time validation of storage configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use aula::AulaBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Build with SQLite and auto-migration
//!     let aula = AulaBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     // Or read every setting from AULA_* environment variables
//!     let aula = AulaBuilder::from_env()?
//!         .with_sqlite("sqlite://aula.db")
//!         .await?
//!         .build()
//!         .await?;
//!     aula.migrate().await?;
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use aula_core::{
    BruteForceProtectionConfig, SessionConfig, TwoFactorConfig,
    repositories::RepositoryProvider, sync::SyncConfig,
};

use crate::Aula;

/// Errors that can occur when building an Aula instance.
#[derive(Debug, thiserror::Error)]
pub enum AulaBuilderError {
    /// Failed to connect to storage backend
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    /// Failed to run database migrations
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Marker type indicating no storage has been configured yet.
pub struct NoStorage;

/// Marker type indicating storage has been configured.
pub struct WithStorage<R: RepositoryProvider> {
    repositories: Arc<R>,
}

/// A type-safe builder for constructing [`Aula`] instances.
///
/// Storage must be configured before [`build`](AulaBuilder::build) becomes
/// available.
pub struct AulaBuilder<Storage> {
    storage: Storage,
    session_config: SessionConfig,
    brute_force_config: BruteForceProtectionConfig,
    two_factor_config: TwoFactorConfig,
    sync_config: SyncConfig,
    apply_migrations: bool,
}

impl Default for AulaBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl AulaBuilder<NoStorage> {
    /// Create a new builder with default configuration.
    ///
    /// # Defaults
    ///
    /// - Sessions: 3 concurrent, valid for 12 hours
    /// - Brute force protection: 5 attempts in 15 minutes, escalating lockout
    /// - Sync: batches of 100 rows, watermarks kept for 7 days
    /// - Apply migrations: false
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            session_config: SessionConfig::default(),
            brute_force_config: BruteForceProtectionConfig::default(),
            two_factor_config: TwoFactorConfig::default(),
            sync_config: SyncConfig::default(),
            apply_migrations: false,
        }
    }

    /// Create a builder whose configuration is read from `AULA_*` environment
    /// variables. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, AulaBuilderError> {
        let sync_config = SyncConfig::from_env()
            .map_err(|e| AulaBuilderError::InvalidConfiguration(e.to_string()))?;

        Ok(Self {
            storage: NoStorage,
            session_config: SessionConfig::from_env(),
            brute_force_config: BruteForceProtectionConfig::from_env(),
            two_factor_config: TwoFactorConfig::from_env(),
            sync_config,
            apply_migrations: false,
        })
    }

    /// Use an existing repository provider.
    pub fn with_repositories<R: RepositoryProvider>(
        self,
        repositories: Arc<R>,
    ) -> AulaBuilder<WithStorage<R>> {
        AulaBuilder {
            storage: WithStorage { repositories },
            session_config: self.session_config,
            brute_force_config: self.brute_force_config,
            two_factor_config: self.two_factor_config,
            sync_config: self.sync_config,
            apply_migrations: self.apply_migrations,
        }
    }
}

#[cfg(feature = "sqlite")]
impl AulaBuilder<NoStorage> {
    /// Configure SQLite storage by connecting to the given URL.
    ///
    /// The database file is created if it does not exist.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL (e.g., "sqlite::memory:" or "sqlite://path/to/db.sqlite")
    pub async fn with_sqlite(
        self,
        url: &str,
    ) -> Result<AulaBuilder<WithStorage<crate::SqliteRepositoryProvider>>, AulaBuilderError> {
        let pool = aula_storage_sqlite::connect(url)
            .await
            .map_err(|e| AulaBuilderError::StorageConnection(e.to_string()))?;

        Ok(self.with_sqlite_pool(pool))
    }

    /// Configure SQLite storage with an existing connection pool.
    ///
    /// Use this to share the pool with a [`SqliteTableSource`](crate::SqliteTableSource).
    pub fn with_sqlite_pool(
        self,
        pool: sqlx::SqlitePool,
    ) -> AulaBuilder<WithStorage<crate::SqliteRepositoryProvider>> {
        self.with_repositories(Arc::new(crate::SqliteRepositoryProvider::new(pool)))
    }
}

impl<R: RepositoryProvider> AulaBuilder<WithStorage<R>> {
    /// Configure the concurrent-session limit and session lifetime.
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Configure brute force protection settings.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use aula::{AulaBuilder, BruteForceProtectionConfig};
    /// use chrono::Duration;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let aula = AulaBuilder::new()
    ///     .with_sqlite("sqlite::memory:")
    ///     .await?
    ///     .with_brute_force_protection(
    ///         BruteForceProtectionConfig::default()
    ///             .with_max_failed_attempts(3)
    ///             .with_base_lockout(Duration::minutes(30)),
    ///     )
    ///     .build()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_brute_force_protection(mut self, config: BruteForceProtectionConfig) -> Self {
        self.brute_force_config = config;
        self
    }

    pub fn with_two_factor_config(mut self, config: TwoFactorConfig) -> Self {
        self.two_factor_config = config;
        self
    }

    pub fn with_sync_config(mut self, config: SyncConfig) -> Self {
        self.sync_config = config;
        self
    }

    /// Set whether to automatically apply database migrations during build.
    ///
    /// Default: false
    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }

    /// Build the Aula instance, applying migrations first if requested.
    pub async fn build(self) -> Result<Aula<R>, AulaBuilderError> {
        if self.session_config.max_active_sessions == 0 {
            return Err(AulaBuilderError::InvalidConfiguration(
                "max_active_sessions must be at least 1".to_string(),
            ));
        }
        if self.sync_config.batch_size == 0 {
            return Err(AulaBuilderError::InvalidConfiguration(
                "batch_size must be at least 1".to_string(),
            ));
        }
        self.two_factor_config
            .validate()
            .map_err(|e| AulaBuilderError::InvalidConfiguration(e.to_string()))?;

        if self.apply_migrations {
            self.storage
                .repositories
                .migrate()
                .await
                .map_err(|e| AulaBuilderError::Migration(e.to_string()))?;
        }

        Ok(Aula::with_config(
            self.storage.repositories,
            self.session_config,
            self.brute_force_config,
            self.two_factor_config,
            self.sync_config,
        )
        .await)
    }
}
