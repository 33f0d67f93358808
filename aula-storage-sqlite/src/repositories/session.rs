use async_trait::async_trait;
use aula_core::{
    Error, Role, UserId,
    crypto::{hash_token, verify_token_hash},
    error::StorageError,
    repositories::SessionRepository,
    session::{ActiveSession, SessionId, SessionToken},
};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::from_timestamp;

#[derive(Debug, Clone, sqlx::FromRow)]
struct SqliteSession {
    id: String,
    token_hash: String,
    user_id: String,
    role: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    device: String,
    active: bool,
    blocked: bool,
    created_at: i64,
    updated_at: i64,
    expires_at: i64,
}

impl SqliteSession {
    fn into_session(self, token: Option<SessionToken>) -> Result<ActiveSession, Error> {
        let role: Role = self.role.parse()?;
        Ok(ActiveSession {
            id: SessionId::new(&self.id),
            token,
            user_id: UserId::new(&self.user_id),
            role,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            device: self.device,
            active: self.active,
            blocked: self.blocked,
            created_at: from_timestamp(self.created_at)?,
            updated_at: from_timestamp(self.updated_at)?,
            expires_at: from_timestamp(self.expires_at)?,
        })
    }
}

/// Sessions keyed by the SHA256 of their bearer token.
pub struct SqliteSessionRepository {
    pool: SqlitePool,
}

impl SqliteSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn create_within_limit(
        &self,
        session: ActiveSession,
        max_live: u32,
    ) -> Result<Option<ActiveSession>, Error> {
        let token_hash = session
            .token
            .as_ref()
            .map(|t| hash_token(t.as_str()))
            .ok_or_else(|| StorageError::Constraint("Session has no token".to_string()))?;

        // Counting and inserting in one statement keeps concurrent logins
        // from both passing the limit check
        let result = sqlx::query(
            r#"
            INSERT INTO sessions (
                id, token_hash, user_id, role, ip_address, user_agent, device,
                active, blocked, created_at, updated_at, expires_at
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12
            WHERE (
                SELECT COUNT(*) FROM sessions
                WHERE user_id = ?3 AND active = 1 AND blocked = 0 AND expires_at > ?13
            ) < ?14
            "#,
        )
        .bind(session.id.as_str())
        .bind(&token_hash)
        .bind(session.user_id.as_str())
        .bind(session.role.as_str())
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(&session.device)
        .bind(session.active)
        .bind(session.blocked)
        .bind(session.created_at.timestamp())
        .bind(session.updated_at.timestamp())
        .bind(session.expires_at.timestamp())
        .bind(Utc::now().timestamp())
        .bind(i64::from(max_live))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create session");
            StorageError::Database("Failed to create session".to_string())
        })?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(session))
    }

    async fn find_by_token(&self, token: &SessionToken) -> Result<Option<ActiveSession>, Error> {
        let row = sqlx::query_as::<_, SqliteSession>(
            "SELECT * FROM sessions WHERE token_hash = ?1",
        )
        .bind(hash_token(token.as_str()))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to find session by token");
            StorageError::Database("Failed to find session".to_string())
        })?;

        match row {
            Some(row) if verify_token_hash(token.as_str(), &row.token_hash) => {
                Ok(Some(row.into_session(Some(token.clone()))?))
            }
            _ => Ok(None),
        }
    }

    async fn find_by_id(&self, id: &SessionId) -> Result<Option<ActiveSession>, Error> {
        let row = sqlx::query_as::<_, SqliteSession>("SELECT * FROM sessions WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to find session by id");
                StorageError::Database("Failed to find session".to_string())
            })?;

        row.map(|r| r.into_session(None)).transpose()
    }

    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<ActiveSession>, Error> {
        let rows = sqlx::query_as::<_, SqliteSession>(
            "SELECT * FROM sessions WHERE user_id = ?1 ORDER BY created_at DESC, id",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to list sessions");
            StorageError::Database("Failed to list sessions".to_string())
        })?;

        rows.into_iter().map(|r| r.into_session(None)).collect()
    }

    async fn count_live(&self, user_id: &UserId) -> Result<u32, Error> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM sessions
            WHERE user_id = ?1 AND active = 1 AND blocked = 0 AND expires_at > ?2
            "#,
        )
        .bind(user_id.as_str())
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to count sessions");
            StorageError::Database("Failed to count sessions".to_string())
        })?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn deactivate(&self, token: &SessionToken) -> Result<bool, Error> {
        let result = sqlx::query(
            "UPDATE sessions SET active = 0, updated_at = ?1 WHERE token_hash = ?2 AND active = 1",
        )
        .bind(Utc::now().timestamp())
        .bind(hash_token(token.as_str()))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to deactivate session");
            StorageError::Database("Failed to deactivate session".to_string())
        })?;

        Ok(result.rows_affected() > 0)
    }

    async fn block(&self, id: &SessionId) -> Result<bool, Error> {
        let result = sqlx::query(
            "UPDATE sessions SET active = 0, blocked = 1, updated_at = ?1 WHERE id = ?2",
        )
        .bind(Utc::now().timestamp())
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to block session");
            StorageError::Database("Failed to block session".to_string())
        })?;

        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_all_for_user(&self, user_id: &UserId) -> Result<u64, Error> {
        let result = sqlx::query(
            "UPDATE sessions SET active = 0, updated_at = ?1 WHERE user_id = ?2 AND active = 1",
        )
        .bind(Utc::now().timestamp())
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to deactivate user sessions");
            StorageError::Database("Failed to deactivate user sessions".to_string())
        })?;

        Ok(result.rows_affected())
    }

    async fn cleanup_expired(&self) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?1")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to cleanup expired sessions");
                StorageError::Database("Failed to cleanup expired sessions".to_string())
            })?;

        Ok(result.rows_affected())
    }
}
