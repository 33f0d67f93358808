use async_trait::async_trait;
use aula_core::{
    Error, UserId,
    error::StorageError,
    repositories::AuditRepository,
    storage::{AuditEntry, AuditRecord},
};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::from_timestamp;

#[derive(Debug, sqlx::FromRow)]
struct SqliteAuditEvent {
    id: i64,
    kind: String,
    email: Option<String>,
    user_id: Option<String>,
    ip_address: Option<String>,
    detail: String,
    created_at: i64,
}

impl TryFrom<SqliteAuditEvent> for AuditRecord {
    type Error = Error;

    fn try_from(row: SqliteAuditEvent) -> Result<Self, Self::Error> {
        Ok(AuditRecord {
            id: row.id,
            kind: row.kind,
            email: row.email,
            user_id: row.user_id.map(UserId::from),
            ip_address: row.ip_address,
            // Detail is informational; a damaged value should not hide the entry
            detail: serde_json::from_str(&row.detail).unwrap_or(serde_json::Value::Null),
            created_at: from_timestamp(row.created_at)?,
        })
    }
}

/// Append-only login and security audit trail.
pub struct SqliteAuditRepository {
    pool: SqlitePool,
}

impl SqliteAuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
    async fn append(&self, entry: AuditEntry) -> Result<AuditRecord, Error> {
        let row = sqlx::query_as::<_, SqliteAuditEvent>(
            r#"
            INSERT INTO audit_events (kind, email, user_id, ip_address, detail, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING *
            "#,
        )
        .bind(&entry.kind)
        .bind(&entry.email)
        .bind(entry.user_id.as_ref().map(UserId::as_str))
        .bind(&entry.ip_address)
        .bind(entry.detail.to_string())
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, kind = %entry.kind, "Failed to append audit event");
            StorageError::Database("Failed to append audit event".to_string())
        })?;

        row.try_into()
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<AuditRecord>, Error> {
        let rows = sqlx::query_as::<_, SqliteAuditEvent>(
            "SELECT * FROM audit_events ORDER BY id DESC LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to list audit events");
            StorageError::Database("Failed to list audit events".to_string())
        })?;

        rows.into_iter().map(AuditRecord::try_from).collect()
    }

    async fn list_for_email(&self, email: &str, limit: u32) -> Result<Vec<AuditRecord>, Error> {
        let rows = sqlx::query_as::<_, SqliteAuditEvent>(
            "SELECT * FROM audit_events WHERE email = ?1 ORDER BY id DESC LIMIT ?2",
        )
        .bind(email)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to list audit events");
            StorageError::Database("Failed to list audit events".to_string())
        })?;

        rows.into_iter().map(AuditRecord::try_from).collect()
    }
}
