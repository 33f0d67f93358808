use crate::{Error, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Repository for TOTP secrets and recovery codes.
///
/// Recovery codes are stored as hashes only.
#[async_trait]
pub trait TwoFactorRepository: Send + Sync + 'static {
    /// Store a new, unconfirmed secret and replace all recovery codes
    async fn set_pending_secret(
        &self,
        user_id: &UserId,
        secret: &str,
        recovery_code_hashes: &[String],
    ) -> Result<(), Error>;

    /// Mark the stored secret as confirmed
    async fn confirm(&self, user_id: &UserId, confirmed_at: DateTime<Utc>) -> Result<(), Error>;

    /// Remove the secret, its confirmation and all recovery codes
    async fn disable(&self, user_id: &UserId) -> Result<(), Error>;

    /// Replace all recovery codes
    async fn replace_recovery_codes(
        &self,
        user_id: &UserId,
        recovery_code_hashes: &[String],
    ) -> Result<(), Error>;

    /// Remove one recovery code if present.
    ///
    /// Must be atomic: of two concurrent calls with the same hash at most one
    /// returns `true`.
    async fn consume_recovery_code(&self, user_id: &UserId, code_hash: &str)
    -> Result<bool, Error>;
}
