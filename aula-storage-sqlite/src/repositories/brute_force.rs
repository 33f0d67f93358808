//! SQLite implementation of the brute force protection repository.

use async_trait::async_trait;
use aula_core::{
    Error,
    error::StorageError,
    repositories::BruteForceProtectionRepository,
    storage::{AttemptStats, BlockRecord, FailedLoginAttempt},
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::from_timestamp;

/// SQLite repository for brute force protection data.
pub struct SqliteBruteForceRepository {
    pool: SqlitePool,
}

impl SqliteBruteForceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn stats(&self, column: &str, value: &str, since: DateTime<Utc>) -> Result<AttemptStats, Error> {
        let row = sqlx::query_as::<_, SqliteAttemptStats>(&format!(
            r#"
            SELECT
                COUNT(*) as count,
                MAX(attempted_at) as latest_at
            FROM failed_login_attempts
            WHERE {column} = ? AND attempted_at >= ?
            "#
        ))
        .bind(value)
        .bind(since.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, column, "Failed to get attempt stats");
            StorageError::Database("Failed to get attempt stats".to_string())
        })?;

        Ok(AttemptStats {
            count: u32::try_from(row.count).unwrap_or(u32::MAX),
            latest_at: row.latest_at.map(from_timestamp).transpose()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqliteFailedLoginAttempt {
    id: i64,
    email: String,
    ip_address: Option<String>,
    attempted_at: i64,
}

impl TryFrom<SqliteFailedLoginAttempt> for FailedLoginAttempt {
    type Error = Error;

    fn try_from(row: SqliteFailedLoginAttempt) -> Result<Self, Self::Error> {
        Ok(FailedLoginAttempt {
            id: row.id,
            email: row.email,
            ip_address: row.ip_address,
            attempted_at: from_timestamp(row.attempted_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqliteAttemptStats {
    count: i64,
    latest_at: Option<i64>,
}

#[derive(Debug, sqlx::FromRow)]
struct SqliteBlock {
    email: String,
    blocked_until: i64,
    reason: String,
    lockout_count: i64,
    updated_at: i64,
}

impl TryFrom<SqliteBlock> for BlockRecord {
    type Error = Error;

    fn try_from(row: SqliteBlock) -> Result<Self, Self::Error> {
        Ok(BlockRecord {
            email: row.email,
            blocked_until: from_timestamp(row.blocked_until)?,
            reason: row.reason,
            lockout_count: u32::try_from(row.lockout_count).unwrap_or(0),
            updated_at: from_timestamp(row.updated_at)?,
        })
    }
}

#[async_trait]
impl BruteForceProtectionRepository for SqliteBruteForceRepository {
    async fn record_failed_attempt(
        &self,
        email: &str,
        ip_address: Option<&str>,
    ) -> Result<FailedLoginAttempt, Error> {
        let row = sqlx::query_as::<_, SqliteFailedLoginAttempt>(
            r#"
            INSERT INTO failed_login_attempts (email, ip_address, attempted_at)
            VALUES (?, ?, ?)
            RETURNING id, email, ip_address, attempted_at
            "#,
        )
        .bind(email)
        .bind(ip_address)
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to record failed login attempt");
            StorageError::Database("Failed to record failed login attempt".to_string())
        })?;

        row.try_into()
    }

    async fn get_attempt_stats(
        &self,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<AttemptStats, Error> {
        self.stats("email", email, since).await
    }

    async fn get_ip_attempt_stats(
        &self,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> Result<AttemptStats, Error> {
        self.stats("ip_address", ip_address, since).await
    }

    async fn clear_attempts(&self, email: &str) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM failed_login_attempts WHERE email = ?")
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to clear attempts");
                StorageError::Database("Failed to clear attempts".to_string())
            })?;

        Ok(result.rows_affected())
    }

    async fn cleanup_old_attempts(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let before_timestamp = before.timestamp();
        let now = Utc::now().timestamp();

        // Attempts of a blocked email stay until the block lifts
        let attempts = sqlx::query(
            r#"
            DELETE FROM failed_login_attempts
            WHERE attempted_at < ?
            AND email NOT IN (
                SELECT email FROM login_blocks WHERE blocked_until > ?
            )
            "#,
        )
        .bind(before_timestamp)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to cleanup old attempts");
            StorageError::Database("Failed to cleanup old attempts".to_string())
        })?;

        let blocks = sqlx::query("DELETE FROM login_blocks WHERE blocked_until < ?")
            .bind(before_timestamp)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to cleanup old blocks");
                StorageError::Database("Failed to cleanup old blocks".to_string())
            })?;

        Ok(attempts.rows_affected() + blocks.rows_affected())
    }

    async fn get_block(&self, email: &str) -> Result<Option<BlockRecord>, Error> {
        let row = sqlx::query_as::<_, SqliteBlock>(
            r#"
            SELECT email, blocked_until, reason, lockout_count, updated_at
            FROM login_blocks
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to get login block");
            StorageError::Database("Failed to get login block".to_string())
        })?;

        row.map(BlockRecord::try_from).transpose()
    }

    async fn upsert_block(&self, block: &BlockRecord) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO login_blocks (email, blocked_until, reason, lockout_count, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (email) DO UPDATE SET
                blocked_until = excluded.blocked_until,
                reason = excluded.reason,
                lockout_count = excluded.lockout_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&block.email)
        .bind(block.blocked_until.timestamp())
        .bind(&block.reason)
        .bind(i64::from(block.lockout_count))
        .bind(block.updated_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to store login block");
            StorageError::Database("Failed to store login block".to_string())
        })?;

        Ok(())
    }

    async fn clear_block(&self, email: &str) -> Result<bool, Error> {
        let result = sqlx::query("DELETE FROM login_blocks WHERE email = ?")
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to clear login block");
                StorageError::Database("Failed to clear login block".to_string())
            })?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_locked_at(
        &self,
        email: &str,
        locked_at: Option<DateTime<Utc>>,
    ) -> Result<(), Error> {
        // Unknown emails are ignored so the outcome does not reveal accounts
        sqlx::query("UPDATE users SET locked_at = ? WHERE email = ?")
            .bind(locked_at.map(|dt| dt.timestamp()))
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to set locked_at");
                StorageError::Database("Failed to set locked_at".to_string())
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create_test_user, setup_test_db};
    use chrono::Duration;

    fn block(email: &str, until: DateTime<Utc>, lockout_count: u32) -> BlockRecord {
        BlockRecord {
            email: email.to_string(),
            blocked_until: until,
            reason: "too many failed attempts".to_string(),
            lockout_count,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_record_failed_attempt() {
        let repo = SqliteBruteForceRepository::new(setup_test_db().await);

        let attempt = repo
            .record_failed_attempt("test@example.com", Some("192.168.1.1"))
            .await
            .expect("Failed to record attempt");

        assert_eq!(attempt.email, "test@example.com");
        assert_eq!(attempt.ip_address, Some("192.168.1.1".to_string()));
        assert!(attempt.id > 0);
    }

    #[tokio::test]
    async fn test_attempt_stats_by_email_and_ip() {
        let repo = SqliteBruteForceRepository::new(setup_test_db().await);

        for email in ["a@example.com", "a@example.com", "b@example.com"] {
            repo.record_failed_attempt(email, Some("10.0.0.1"))
                .await
                .unwrap();
        }

        let since = Utc::now() - Duration::hours(1);
        let stats = repo.get_attempt_stats("a@example.com", since).await.unwrap();
        assert_eq!(stats.count, 2);
        assert!(stats.latest_at.is_some());

        let ip = repo.get_ip_attempt_stats("10.0.0.1", since).await.unwrap();
        assert_eq!(ip.count, 3);

        let future = repo
            .get_attempt_stats("a@example.com", Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(future.count, 0);
        assert!(future.latest_at.is_none());
    }

    #[tokio::test]
    async fn test_clear_attempts() {
        let repo = SqliteBruteForceRepository::new(setup_test_db().await);

        for _ in 0..3 {
            repo.record_failed_attempt("test1@example.com", None)
                .await
                .unwrap();
            repo.record_failed_attempt("test2@example.com", None)
                .await
                .unwrap();
        }

        assert_eq!(repo.clear_attempts("test1@example.com").await.unwrap(), 3);

        let since = Utc::now() - Duration::hours(1);
        assert_eq!(
            repo.get_attempt_stats("test1@example.com", since)
                .await
                .unwrap()
                .count,
            0
        );
        assert_eq!(
            repo.get_attempt_stats("test2@example.com", since)
                .await
                .unwrap()
                .count,
            3
        );
    }

    #[tokio::test]
    async fn test_block_lifecycle() {
        let repo = SqliteBruteForceRepository::new(setup_test_db().await);
        let until = Utc::now() + Duration::minutes(15);

        assert!(repo.get_block("test@example.com").await.unwrap().is_none());

        repo.upsert_block(&block("test@example.com", until, 1))
            .await
            .unwrap();
        repo.upsert_block(&block("test@example.com", until + Duration::minutes(15), 2))
            .await
            .unwrap();

        let stored = repo.get_block("test@example.com").await.unwrap().unwrap();
        assert_eq!(stored.lockout_count, 2);
        assert!(stored.is_active());
        assert_eq!(
            stored.blocked_until.timestamp(),
            (until + Duration::minutes(15)).timestamp()
        );

        assert!(repo.clear_block("test@example.com").await.unwrap());
        assert!(!repo.clear_block("test@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_locked_at() {
        let pool = setup_test_db().await;
        create_test_user(&pool, "test@example.com").await;
        let repo = SqliteBruteForceRepository::new(pool.clone());

        repo.set_locked_at("test@example.com", Some(Utc::now()))
            .await
            .unwrap();
        let locked: Option<i64> =
            sqlx::query_scalar("SELECT locked_at FROM users WHERE email = ?")
                .bind("test@example.com")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(locked.is_some());

        repo.set_locked_at("test@example.com", None).await.unwrap();

        // Unknown emails are not an error
        repo.set_locked_at("nobody@example.com", Some(Utc::now()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_respects_active_blocks() {
        let repo = SqliteBruteForceRepository::new(setup_test_db().await);

        repo.record_failed_attempt("locked@example.com", None)
            .await
            .unwrap();
        repo.record_failed_attempt("unlocked@example.com", None)
            .await
            .unwrap();
        repo.upsert_block(&block(
            "locked@example.com",
            Utc::now() + Duration::hours(2),
            1,
        ))
        .await
        .unwrap();
        repo.upsert_block(&block(
            "stale@example.com",
            Utc::now() - Duration::days(30),
            1,
        ))
        .await
        .unwrap();

        let deleted = repo
            .cleanup_old_attempts(Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        // The unlocked attempt and the stale block
        assert_eq!(deleted, 2);

        let since = Utc::now() - Duration::hours(1);
        assert_eq!(
            repo.get_attempt_stats("locked@example.com", since)
                .await
                .unwrap()
                .count,
            1
        );
        assert!(repo.get_block("locked@example.com").await.unwrap().is_some());
        assert!(repo.get_block("stale@example.com").await.unwrap().is_none());
    }
}
