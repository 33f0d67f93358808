//! Brute force protection service for account-based lockout.
//!
//! # Features
//!
//! - Per-email login attempt tracking over an append-only log
//! - Escalating blocks: every consecutive lockout doubles the block length, up to a cap
//! - Per-IP throttling across all emails
//! - Admin unlock, which also resets escalation
//! - Background cleanup of old records
//!
//! # Example
//!
//! ```rust,ignore
//! use aula_core::services::BruteForceProtectionService;
//! use aula_core::storage::BruteForceProtectionConfig;
//!
//! let service = BruteForceProtectionService::new(
//!     repository,
//!     BruteForceProtectionConfig::default(),
//! );
//!
//! let status = service.get_lockout_status("user@example.com").await?;
//! if status.is_locked {
//!     // 423 with status.retry_after_seconds()
//! }
//!
//! let status = service.record_failed_attempt("user@example.com", Some("192.168.1.1")).await?;
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::{
    Error,
    repositories::BruteForceProtectionRepository,
    storage::{BlockRecord, BruteForceProtectionConfig, LockoutStatus},
};

const LOCKOUT_REASON: &str = "too many failed login attempts";

/// Service for managing brute force protection.
///
/// Safe to share across tasks. Failed attempts are single INSERTs, so
/// concurrent failures for the same email are all counted.
pub struct BruteForceProtectionService<R: BruteForceProtectionRepository> {
    repository: Arc<R>,
    config: BruteForceProtectionConfig,
}

impl<R: BruteForceProtectionRepository> BruteForceProtectionService<R> {
    pub fn new(repository: Arc<R>, config: BruteForceProtectionConfig) -> Self {
        Self { repository, config }
    }

    pub fn config(&self) -> &BruteForceProtectionConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get the current lockout status for an email address.
    ///
    /// If protection is disabled, it always returns an unlocked status.
    pub async fn get_lockout_status(&self, email: &str) -> Result<LockoutStatus, Error> {
        if !self.config.enabled {
            return Ok(LockoutStatus::unlocked(email));
        }

        let block = self.repository.get_block(email).await?;
        let since = self.counting_since(block.as_ref());
        let stats = self.repository.get_attempt_stats(email, since).await?;

        Ok(match block {
            Some(block) if block.is_active() => LockoutStatus {
                email: email.to_string(),
                failed_attempts: stats.count,
                is_locked: true,
                locked_until: Some(block.blocked_until),
                lockout_count: block.lockout_count,
            },
            block => LockoutStatus {
                email: email.to_string(),
                failed_attempts: stats.count,
                is_locked: false,
                locked_until: None,
                lockout_count: block.map(|b| b.lockout_count).unwrap_or(0),
            },
        })
    }

    /// Check if an account is currently locked (convenience method).
    pub async fn is_locked(&self, email: &str) -> Result<bool, Error> {
        Ok(self.get_lockout_status(email).await?.is_locked)
    }

    /// Whether an IP address has failed too often, across all emails, within
    /// the attempt window.
    pub async fn is_ip_throttled(&self, ip_address: Option<&str>) -> Result<bool, Error> {
        let Some(ip_address) = ip_address else {
            return Ok(false);
        };
        if !self.config.enabled {
            return Ok(false);
        }

        let since = Utc::now() - self.config.attempt_window;
        let stats = self
            .repository
            .get_ip_attempt_stats(ip_address, since)
            .await?;

        Ok(stats.count >= self.config.ip_max_failed_attempts)
    }

    /// Record a failed login attempt and place or escalate a block once the
    /// threshold is reached.
    ///
    /// If protection is disabled, this is a no-op that returns an unlocked status.
    pub async fn record_failed_attempt(
        &self,
        email: &str,
        ip_address: Option<&str>,
    ) -> Result<LockoutStatus, Error> {
        if !self.config.enabled {
            return Ok(LockoutStatus::unlocked(email));
        }

        self.repository
            .record_failed_attempt(email, ip_address)
            .await?;

        let status = self.get_lockout_status(email).await?;
        if status.is_locked || status.failed_attempts < self.config.max_failed_attempts {
            return Ok(status);
        }

        let now = Utc::now();
        let lockout_count = status.lockout_count + 1;
        let blocked_until = now + self.config.lockout_duration(lockout_count);

        self.repository
            .upsert_block(&BlockRecord {
                email: email.to_string(),
                blocked_until,
                reason: LOCKOUT_REASON.to_string(),
                lockout_count,
                updated_at: now,
            })
            .await?;
        self.repository.set_locked_at(email, Some(now)).await?;

        tracing::warn!(
            email = %email,
            failed_attempts = status.failed_attempts,
            lockout_count = lockout_count,
            locked_until = %blocked_until,
            "Account locked after repeated failed logins"
        );

        Ok(LockoutStatus {
            email: email.to_string(),
            failed_attempts: status.failed_attempts,
            is_locked: true,
            locked_until: Some(blocked_until),
            lockout_count,
        })
    }

    /// Clear all attempts and escalation state for an email on successful login.
    pub async fn reset_attempts(&self, email: &str) -> Result<(), Error> {
        self.repository.clear_attempts(email).await?;
        self.repository.clear_block(email).await?;
        self.repository.set_locked_at(email, None).await?;
        Ok(())
    }

    /// Unlock an account regardless of its previous state.
    ///
    /// Returns `true` if the account was locked.
    pub async fn unlock_account(&self, email: &str) -> Result<bool, Error> {
        let was_locked = self.is_locked(email).await?;
        self.reset_attempts(email).await?;
        if was_locked {
            tracing::info!(email = %email, "Account unlocked by administrator");
        }
        Ok(was_locked)
    }

    /// Start the background cleanup task.
    ///
    /// Records are only deleted if they are older than the retention period and
    /// the associated account is not currently blocked.
    pub fn start_cleanup_task(
        &self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let repository = Arc::clone(&self.repository);
        let retention = self.config.retention_period;

        const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(CLEANUP_INTERVAL);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        let before = Utc::now() - retention;
                        match repository.cleanup_old_attempts(before).await {
                            Ok(count) if count > 0 => {
                                tracing::info!(
                                    count = count,
                                    "Cleaned up old failed login attempt records"
                                );
                            }
                            Err(e) => {
                                tracing::warn!(
                                    error = %e,
                                    "Failed to cleanup failed login attempt records"
                                );
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down brute force protection cleanup task");
                        break;
                    }
                }
            }
        })
    }

    /// Attempts made before the last lockout started do not count again once
    /// it expires.
    fn counting_since(&self, block: Option<&BlockRecord>) -> chrono::DateTime<Utc> {
        let window_start = Utc::now() - self.config.attempt_window;
        match block {
            Some(block) => window_start.max(block.updated_at + Duration::seconds(1)),
            None => window_start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock::MockStore;

    fn config(max_failed_attempts: u32) -> BruteForceProtectionConfig {
        BruteForceProtectionConfig::default().with_max_failed_attempts(max_failed_attempts)
    }

    /// Moves the current block and all attempts one hour into the past, with the
    /// block already expired.
    fn expire_block(repo: &MockStore, email: &str) {
        let an_hour_ago = Utc::now() - Duration::hours(1);
        for block in repo.blocks.lock().unwrap().iter_mut() {
            if block.email == email {
                block.updated_at = an_hour_ago;
                block.blocked_until = Utc::now() - Duration::minutes(1);
            }
        }
        for attempt in repo.attempts.lock().unwrap().iter_mut() {
            attempt.attempted_at = an_hour_ago - Duration::minutes(1);
        }
    }

    #[tokio::test]
    async fn test_disabled_protection_does_not_record() {
        let repo = Arc::new(MockStore::new());
        let service =
            BruteForceProtectionService::new(repo.clone(), BruteForceProtectionConfig::disabled());

        let status = service
            .record_failed_attempt("test@example.com", Some("127.0.0.1"))
            .await
            .unwrap();

        assert!(!status.is_locked);
        assert_eq!(status.failed_attempts, 0);
        assert_eq!(repo.attempt_count("test@example.com"), 0);
        assert!(!service.is_ip_throttled(Some("127.0.0.1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_lockout_after_max_attempts() {
        let repo = Arc::new(MockStore::new());
        let service = BruteForceProtectionService::new(repo, config(3));

        for _ in 0..2 {
            let status = service
                .record_failed_attempt("test@example.com", None)
                .await
                .unwrap();
            assert!(!status.is_locked);
        }

        let status = service
            .record_failed_attempt("test@example.com", None)
            .await
            .unwrap();
        assert!(status.is_locked);
        assert_eq!(status.failed_attempts, 3);
        assert_eq!(status.lockout_count, 1);

        let retry_after = status.retry_after_seconds().unwrap();
        assert!(retry_after > 890 && retry_after <= 900);
    }

    #[tokio::test]
    async fn test_lockout_escalates_on_repeat() {
        let repo = Arc::new(MockStore::new());
        let service = BruteForceProtectionService::new(repo.clone(), config(2));

        for _ in 0..2 {
            service
                .record_failed_attempt("test@example.com", None)
                .await
                .unwrap();
        }
        expire_block(&repo, "test@example.com");

        let status = service
            .get_lockout_status("test@example.com")
            .await
            .unwrap();
        assert!(!status.is_locked);
        assert_eq!(status.failed_attempts, 0);
        assert_eq!(status.lockout_count, 1);

        service
            .record_failed_attempt("test@example.com", None)
            .await
            .unwrap();
        let status = service
            .record_failed_attempt("test@example.com", None)
            .await
            .unwrap();

        assert!(status.is_locked);
        assert_eq!(status.lockout_count, 2);
        let retry_after = status.retry_after_seconds().unwrap();
        assert!(retry_after > 1790 && retry_after <= 1800);
    }

    #[tokio::test]
    async fn test_attempts_while_locked_do_not_escalate() {
        let repo = Arc::new(MockStore::new());
        let service = BruteForceProtectionService::new(repo, config(2));

        for _ in 0..5 {
            service
                .record_failed_attempt("test@example.com", None)
                .await
                .unwrap();
        }

        let status = service
            .get_lockout_status("test@example.com")
            .await
            .unwrap();
        assert!(status.is_locked);
        assert_eq!(status.lockout_count, 1);
    }

    #[tokio::test]
    async fn test_reset_attempts_clears_escalation() {
        let repo = Arc::new(MockStore::new());
        let service = BruteForceProtectionService::new(repo, config(2));

        for _ in 0..2 {
            service
                .record_failed_attempt("test@example.com", None)
                .await
                .unwrap();
        }
        assert!(service.is_locked("test@example.com").await.unwrap());

        service.reset_attempts("test@example.com").await.unwrap();

        let status = service
            .get_lockout_status("test@example.com")
            .await
            .unwrap();
        assert!(!status.is_locked);
        assert_eq!(status.failed_attempts, 0);
        assert_eq!(status.lockout_count, 0);
    }

    #[tokio::test]
    async fn test_unlock_account_returns_was_locked() {
        let repo = Arc::new(MockStore::new());
        let service = BruteForceProtectionService::new(repo, config(2));

        for _ in 0..2 {
            service
                .record_failed_attempt("test@example.com", None)
                .await
                .unwrap();
        }

        assert!(service.unlock_account("test@example.com").await.unwrap());
        assert!(!service.unlock_account("test@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_different_emails_tracked_separately() {
        let repo = Arc::new(MockStore::new());
        let service = BruteForceProtectionService::new(repo, config(2));

        for _ in 0..2 {
            service
                .record_failed_attempt("user1@example.com", None)
                .await
                .unwrap();
        }

        let status = service
            .get_lockout_status("user2@example.com")
            .await
            .unwrap();
        assert!(!status.is_locked);
        assert_eq!(status.failed_attempts, 0);
        assert!(service.is_locked("user1@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_ip_throttling_spans_emails() {
        let repo = Arc::new(MockStore::new());
        let service = BruteForceProtectionService::new(
            repo,
            BruteForceProtectionConfig::default().with_ip_max_failed_attempts(3),
        );

        for i in 0..3 {
            service
                .record_failed_attempt(&format!("user{i}@example.com"), Some("10.0.0.9"))
                .await
                .unwrap();
        }

        assert!(service.is_ip_throttled(Some("10.0.0.9")).await.unwrap());
        assert!(!service.is_ip_throttled(Some("10.0.0.10")).await.unwrap());
        assert!(!service.is_ip_throttled(None).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_failures_are_all_counted() {
        let repo = Arc::new(MockStore::new());
        let service = Arc::new(BruteForceProtectionService::new(repo.clone(), config(50)));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .record_failed_attempt("race@example.com", None)
                        .await
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(repo.attempt_count("race@example.com"), 20);
        let status = service
            .get_lockout_status("race@example.com")
            .await
            .unwrap();
        assert_eq!(status.failed_attempts, 20);
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_on_shutdown() {
        let repo = Arc::new(MockStore::new());
        let service = BruteForceProtectionService::new(repo, config(5));
        let (tx, rx) = tokio::sync::watch::channel(false);

        let handle = service.start_cleanup_task(rx);
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
