use crate::{Error, storage::SyncWatermark};
use async_trait::async_trait;

/// Store of per-table incremental sync watermarks.
///
/// Watermarks carry an expiry; an expired watermark must be reported as absent
/// so that the next incremental run falls back to a full sync.
#[async_trait]
pub trait WatermarkRepository: Send + Sync + 'static {
    /// The unexpired watermark for a table, if any
    async fn get(&self, table_name: &str) -> Result<Option<SyncWatermark>, Error>;

    /// Insert or replace the watermark for a table
    async fn set(&self, watermark: &SyncWatermark) -> Result<(), Error>;

    /// Forget the watermark for a table
    async fn clear(&self, table_name: &str) -> Result<(), Error>;

    /// Delete expired watermarks
    async fn purge_expired(&self) -> Result<u64, Error>;
}
