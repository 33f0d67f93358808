use async_trait::async_trait;
use aula_core::{
    Error, error::utilities::DatabaseResultExt, repositories::WatermarkRepository,
    storage::SyncWatermark,
};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::from_timestamp_millis;

#[derive(Debug, sqlx::FromRow)]
struct SqliteWatermark {
    table_name: String,
    last_synced_at: i64,
    expires_at: i64,
}

impl TryFrom<SqliteWatermark> for SyncWatermark {
    type Error = Error;

    fn try_from(row: SqliteWatermark) -> Result<Self, Self::Error> {
        Ok(SyncWatermark {
            table_name: row.table_name,
            last_synced_at: from_timestamp_millis(row.last_synced_at)?,
            expires_at: from_timestamp_millis(row.expires_at)?,
        })
    }
}

/// Per-table sync watermarks, stored with millisecond precision.
pub struct SqliteWatermarkRepository {
    pool: SqlitePool,
}

impl SqliteWatermarkRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WatermarkRepository for SqliteWatermarkRepository {
    /// Expired watermarks are treated as absent.
    async fn get(&self, table_name: &str) -> Result<Option<SyncWatermark>, Error> {
        let row = sqlx::query_as::<_, SqliteWatermark>(
            r#"
            SELECT table_name, last_synced_at, expires_at
            FROM sync_watermarks
            WHERE table_name = ?1 AND expires_at > ?2
            "#,
        )
        .bind(table_name)
        .bind(Utc::now().timestamp_millis())
        .fetch_optional(&self.pool)
        .await
        .map_db_err_with_context("Failed to get sync watermark")?;

        row.map(SyncWatermark::try_from).transpose()
    }

    async fn set(&self, watermark: &SyncWatermark) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO sync_watermarks (table_name, last_synced_at, expires_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (table_name) DO UPDATE SET
                last_synced_at = excluded.last_synced_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&watermark.table_name)
        .bind(watermark.last_synced_at.timestamp_millis())
        .bind(watermark.expires_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_db_err_with_context("Failed to set sync watermark")?;

        Ok(())
    }

    async fn clear(&self, table_name: &str) -> Result<(), Error> {
        sqlx::query("DELETE FROM sync_watermarks WHERE table_name = ?1")
            .bind(table_name)
            .execute(&self.pool)
            .await
            .map_db_err_with_context("Failed to clear sync watermark")?;

        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM sync_watermarks WHERE expires_at <= ?1")
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await
            .map_db_err_with_context("Failed to purge sync watermarks")?;

        Ok(result.rows_affected())
    }
}
