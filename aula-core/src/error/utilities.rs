use crate::{
    Error,
    error::{DependencyError, StorageError},
};

/// Extension trait for mapping database driver errors into [`StorageError`].
///
/// ```rust,ignore
/// use aula_core::error::utilities::DatabaseResultExt;
///
/// query.execute(&pool).await.map_db_err_with_context("Failed to create session")?;
/// ```
pub trait DatabaseResultExt<T> {
    /// Convert a database error to a storage error
    fn map_db_err(self) -> Result<T, Error>;

    /// Convert a database error to a storage error with additional context
    fn map_db_err_with_context(self, context: &str) -> Result<T, Error>;
}

impl<T, E: std::fmt::Display> DatabaseResultExt<T> for Result<T, E> {
    fn map_db_err(self) -> Result<T, Error> {
        self.map_err(|e| Error::Storage(StorageError::Database(e.to_string())))
    }

    fn map_db_err_with_context(self, context: &str) -> Result<T, Error> {
        self.map_err(|e| {
            tracing::error!(error = %e, "{context}");
            Error::Storage(StorageError::Database(format!("{context}: {e}")))
        })
    }
}

/// Extension trait for mapping warehouse client errors into [`DependencyError`].
pub trait DependencyResultExt<T> {
    fn map_warehouse_err(self, context: &str) -> Result<T, Error>;
}

impl<T, E: std::fmt::Display> DependencyResultExt<T> for Result<T, E> {
    fn map_warehouse_err(self, context: &str) -> Result<T, Error> {
        self.map_err(|e| Error::Dependency(DependencyError::Warehouse(format!("{context}: {e}"))))
    }
}
