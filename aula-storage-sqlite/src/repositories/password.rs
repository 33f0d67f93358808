use async_trait::async_trait;
use aula_core::{Error, UserId, error::StorageError, repositories::PasswordRepository};
use chrono::Utc;
use sqlx::SqlitePool;

pub struct SqlitePasswordRepository {
    pool: SqlitePool,
}

impl SqlitePasswordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PasswordRepository for SqlitePasswordRepository {
    async fn set_password_hash(&self, user_id: &UserId, hash: &str) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO passwords (user_id, password_hash, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (user_id) DO UPDATE
            SET password_hash = excluded.password_hash, updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id.as_str())
        .bind(hash)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to set password hash");
            StorageError::Database("Failed to set password hash".to_string())
        })?;

        Ok(())
    }

    async fn get_password_hash(&self, user_id: &UserId) -> Result<Option<String>, Error> {
        let hash = sqlx::query_scalar("SELECT password_hash FROM passwords WHERE user_id = ?1")
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to get password hash");
                StorageError::Database("Failed to get password hash".to_string())
            })?;

        Ok(hash)
    }

    async fn remove_password_hash(&self, user_id: &UserId) -> Result<(), Error> {
        sqlx::query("DELETE FROM passwords WHERE user_id = ?1")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to remove password hash");
                StorageError::Database("Failed to remove password hash".to_string())
            })?;

        Ok(())
    }
}
