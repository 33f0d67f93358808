use async_trait::async_trait;
use aula_core::{
    Error, UserId,
    error::{AuthError, StorageError},
    repositories::TwoFactorRepository,
};
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};

pub struct SqliteTwoFactorRepository {
    pool: SqlitePool,
}

impl SqliteTwoFactorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> Result<Transaction<'static, Sqlite>, Error> {
        self.pool.begin().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to begin transaction");
            StorageError::Database("Failed to begin transaction".to_string()).into()
        })
    }
}

fn db_error(action: &'static str) -> impl FnOnce(sqlx::Error) -> StorageError {
    move |e| {
        tracing::error!(error = %e, "Failed to {action}");
        StorageError::Database(format!("Failed to {action}"))
    }
}

async fn write_recovery_codes(
    tx: &mut Transaction<'static, Sqlite>,
    user_id: &UserId,
    hashes: &[String],
) -> Result<(), Error> {
    sqlx::query("DELETE FROM recovery_codes WHERE user_id = ?1")
        .bind(user_id.as_str())
        .execute(&mut **tx)
        .await
        .map_err(db_error("clear recovery codes"))?;

    for hash in hashes {
        sqlx::query("INSERT OR IGNORE INTO recovery_codes (user_id, code_hash) VALUES (?1, ?2)")
            .bind(user_id.as_str())
            .bind(hash)
            .execute(&mut **tx)
            .await
            .map_err(db_error("store recovery code"))?;
    }
    Ok(())
}

#[async_trait]
impl TwoFactorRepository for SqliteTwoFactorRepository {
    async fn set_pending_secret(
        &self,
        user_id: &UserId,
        secret: &str,
        recovery_code_hashes: &[String],
    ) -> Result<(), Error> {
        let mut tx = self.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE users
            SET two_factor_secret = ?1, two_factor_confirmed_at = NULL, updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(secret)
        .bind(Utc::now().timestamp())
        .bind(user_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_error("store two-factor secret"))?;

        if result.rows_affected() == 0 {
            return Err(AuthError::UserNotFound.into());
        }

        write_recovery_codes(&mut tx, user_id, recovery_code_hashes).await?;
        tx.commit().await.map_err(db_error("commit two-factor secret"))?;
        Ok(())
    }

    async fn confirm(&self, user_id: &UserId, confirmed_at: DateTime<Utc>) -> Result<(), Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET two_factor_confirmed_at = ?1, updated_at = ?2
            WHERE id = ?3 AND two_factor_secret IS NOT NULL
            "#,
        )
        .bind(confirmed_at.timestamp())
        .bind(Utc::now().timestamp())
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error("confirm two-factor"))?;

        if result.rows_affected() == 0 {
            return Err(AuthError::TwoFactorNotEnabled.into());
        }
        Ok(())
    }

    async fn disable(&self, user_id: &UserId) -> Result<(), Error> {
        let mut tx = self.begin().await?;

        sqlx::query(
            r#"
            UPDATE users
            SET two_factor_secret = NULL, two_factor_confirmed_at = NULL, updated_at = ?1
            WHERE id = ?2
            "#,
        )
        .bind(Utc::now().timestamp())
        .bind(user_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_error("disable two-factor"))?;

        write_recovery_codes(&mut tx, user_id, &[]).await?;
        tx.commit().await.map_err(db_error("commit two-factor removal"))?;
        Ok(())
    }

    async fn replace_recovery_codes(
        &self,
        user_id: &UserId,
        recovery_code_hashes: &[String],
    ) -> Result<(), Error> {
        let mut tx = self.begin().await?;
        write_recovery_codes(&mut tx, user_id, recovery_code_hashes).await?;
        tx.commit().await.map_err(db_error("commit recovery codes"))?;
        Ok(())
    }

    async fn consume_recovery_code(
        &self,
        user_id: &UserId,
        code_hash: &str,
    ) -> Result<bool, Error> {
        // A single DELETE decides the race between two logins using the same code
        let result = sqlx::query("DELETE FROM recovery_codes WHERE user_id = ?1 AND code_hash = ?2")
            .bind(user_id.as_str())
            .bind(code_hash)
            .execute(&self.pool)
            .await
            .map_err(db_error("consume recovery code"))?;

        Ok(result.rows_affected() == 1)
    }
}
