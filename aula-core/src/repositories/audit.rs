use crate::{
    Error,
    storage::{AuditEntry, AuditRecord},
};
use async_trait::async_trait;

/// Append-only store for the security audit trail
#[async_trait]
pub trait AuditRepository: Send + Sync + 'static {
    async fn append(&self, entry: AuditEntry) -> Result<AuditRecord, Error>;

    /// Most recent entries first
    async fn list_recent(&self, limit: u32) -> Result<Vec<AuditRecord>, Error>;

    /// Most recent entries for one email first
    async fn list_for_email(&self, email: &str, limit: u32) -> Result<Vec<AuditRecord>, Error>;
}
