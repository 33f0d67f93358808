//! Repository trait for brute force protection.
//!
//! Failed attempts are kept in an append-only log so that concurrent failures
//! are never lost: each one is a single INSERT and counting happens at read
//! time. Block records hold the escalation state between lockouts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    storage::{AttemptStats, BlockRecord, FailedLoginAttempt},
};

/// Repository for brute force protection data.
///
/// # Security Considerations
///
/// - Failed attempts should be recorded for all email addresses, even non-existent ones,
///   to prevent user enumeration attacks.
/// - The `cleanup_old_attempts` method must not touch accounts that are currently
///   blocked, otherwise cleanup could lift a lockout early.
/// - IP addresses stored for auditing may be subject to data retention regulations.
#[async_trait]
pub trait BruteForceProtectionRepository: Send + Sync + 'static {
    /// Record a failed login attempt.
    ///
    /// Inserts a new row into the failed attempts log. This method does not
    /// check lockout status - that should be done separately.
    async fn record_failed_attempt(
        &self,
        email: &str,
        ip_address: Option<&str>,
    ) -> Result<FailedLoginAttempt, Error>;

    /// Count failed attempts for an email since `since`.
    async fn get_attempt_stats(
        &self,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<AttemptStats, Error>;

    /// Count failed attempts from one IP address, across all emails, since `since`.
    async fn get_ip_attempt_stats(
        &self,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> Result<AttemptStats, Error>;

    /// Delete all attempts for an email address, returning the number deleted.
    async fn clear_attempts(&self, email: &str) -> Result<u64, Error>;

    /// Delete attempts older than `before` for emails without an active block,
    /// and block records that expired before `before`.
    async fn cleanup_old_attempts(&self, before: DateTime<Utc>) -> Result<u64, Error>;

    /// The block record for an email, active or not.
    async fn get_block(&self, email: &str) -> Result<Option<BlockRecord>, Error>;

    /// Insert or replace the block record for an email.
    async fn upsert_block(&self, block: &BlockRecord) -> Result<(), Error>;

    /// Remove the block record, resetting escalation. Returns `true` if one existed.
    async fn clear_block(&self, email: &str) -> Result<bool, Error>;

    /// Set the `locked_at` timestamp on the user with this email.
    ///
    /// This may be a no-op if the user doesn't exist, which is intentional
    /// to prevent user enumeration.
    async fn set_locked_at(
        &self,
        email: &str,
        locked_at: Option<DateTime<Utc>>,
    ) -> Result<(), Error>;
}
