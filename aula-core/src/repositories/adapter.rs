//! Adapters that expose one repository of a [`RepositoryProvider`] as a
//! standalone repository, so services can hold an `Arc` to it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error, User, UserId,
    repositories::{
        AuditRepository, BruteForceProtectionRepository, PasswordRepository, RepositoryProvider,
        SessionRepository, TwoFactorRepository, UserRepository, WatermarkRepository,
    },
    session::{ActiveSession, SessionId, SessionToken},
    storage::{
        AttemptStats, AuditEntry, AuditRecord, BlockRecord, FailedLoginAttempt, NewUser,
        SyncWatermark,
    },
};

pub struct UserRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> UserRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> UserRepository for UserRepositoryAdapter<R> {
    async fn create(&self, user: NewUser) -> Result<User, Error> {
        self.provider.user().create(user).await
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, Error> {
        self.provider.user().find_by_id(id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        self.provider.user().find_by_email(email).await
    }

    async fn update(&self, user: &User) -> Result<User, Error> {
        self.provider.user().update(user).await
    }

    async fn delete(&self, id: &UserId) -> Result<(), Error> {
        self.provider.user().delete(id).await
    }
}

pub struct SessionRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> SessionRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> SessionRepository for SessionRepositoryAdapter<R> {
    async fn create_within_limit(
        &self,
        session: ActiveSession,
        max_live: u32,
    ) -> Result<Option<ActiveSession>, Error> {
        self.provider
            .session()
            .create_within_limit(session, max_live)
            .await
    }

    async fn find_by_token(&self, token: &SessionToken) -> Result<Option<ActiveSession>, Error> {
        self.provider.session().find_by_token(token).await
    }

    async fn find_by_id(&self, id: &SessionId) -> Result<Option<ActiveSession>, Error> {
        self.provider.session().find_by_id(id).await
    }

    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<ActiveSession>, Error> {
        self.provider.session().list_by_user(user_id).await
    }

    async fn count_live(&self, user_id: &UserId) -> Result<u32, Error> {
        self.provider.session().count_live(user_id).await
    }

    async fn deactivate(&self, token: &SessionToken) -> Result<bool, Error> {
        self.provider.session().deactivate(token).await
    }

    async fn block(&self, id: &SessionId) -> Result<bool, Error> {
        self.provider.session().block(id).await
    }

    async fn deactivate_all_for_user(&self, user_id: &UserId) -> Result<u64, Error> {
        self.provider.session().deactivate_all_for_user(user_id).await
    }

    async fn cleanup_expired(&self) -> Result<u64, Error> {
        self.provider.session().cleanup_expired().await
    }
}

pub struct PasswordRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> PasswordRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> PasswordRepository for PasswordRepositoryAdapter<R> {
    async fn set_password_hash(&self, user_id: &UserId, hash: &str) -> Result<(), Error> {
        self.provider.password().set_password_hash(user_id, hash).await
    }

    async fn get_password_hash(&self, user_id: &UserId) -> Result<Option<String>, Error> {
        self.provider.password().get_password_hash(user_id).await
    }

    async fn remove_password_hash(&self, user_id: &UserId) -> Result<(), Error> {
        self.provider.password().remove_password_hash(user_id).await
    }
}

pub struct BruteForceProtectionRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> BruteForceProtectionRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> BruteForceProtectionRepository
    for BruteForceProtectionRepositoryAdapter<R>
{
    async fn record_failed_attempt(
        &self,
        email: &str,
        ip_address: Option<&str>,
    ) -> Result<FailedLoginAttempt, Error> {
        self.provider
            .brute_force()
            .record_failed_attempt(email, ip_address)
            .await
    }

    async fn get_attempt_stats(
        &self,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<AttemptStats, Error> {
        self.provider
            .brute_force()
            .get_attempt_stats(email, since)
            .await
    }

    async fn get_ip_attempt_stats(
        &self,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> Result<AttemptStats, Error> {
        self.provider
            .brute_force()
            .get_ip_attempt_stats(ip_address, since)
            .await
    }

    async fn clear_attempts(&self, email: &str) -> Result<u64, Error> {
        self.provider.brute_force().clear_attempts(email).await
    }

    async fn cleanup_old_attempts(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        self.provider.brute_force().cleanup_old_attempts(before).await
    }

    async fn get_block(&self, email: &str) -> Result<Option<BlockRecord>, Error> {
        self.provider.brute_force().get_block(email).await
    }

    async fn upsert_block(&self, block: &BlockRecord) -> Result<(), Error> {
        self.provider.brute_force().upsert_block(block).await
    }

    async fn clear_block(&self, email: &str) -> Result<bool, Error> {
        self.provider.brute_force().clear_block(email).await
    }

    async fn set_locked_at(
        &self,
        email: &str,
        locked_at: Option<DateTime<Utc>>,
    ) -> Result<(), Error> {
        self.provider
            .brute_force()
            .set_locked_at(email, locked_at)
            .await
    }
}

pub struct TwoFactorRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> TwoFactorRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> TwoFactorRepository for TwoFactorRepositoryAdapter<R> {
    async fn set_pending_secret(
        &self,
        user_id: &UserId,
        secret: &str,
        recovery_code_hashes: &[String],
    ) -> Result<(), Error> {
        self.provider
            .two_factor()
            .set_pending_secret(user_id, secret, recovery_code_hashes)
            .await
    }

    async fn confirm(&self, user_id: &UserId, confirmed_at: DateTime<Utc>) -> Result<(), Error> {
        self.provider.two_factor().confirm(user_id, confirmed_at).await
    }

    async fn disable(&self, user_id: &UserId) -> Result<(), Error> {
        self.provider.two_factor().disable(user_id).await
    }

    async fn replace_recovery_codes(
        &self,
        user_id: &UserId,
        recovery_code_hashes: &[String],
    ) -> Result<(), Error> {
        self.provider
            .two_factor()
            .replace_recovery_codes(user_id, recovery_code_hashes)
            .await
    }

    async fn consume_recovery_code(
        &self,
        user_id: &UserId,
        code_hash: &str,
    ) -> Result<bool, Error> {
        self.provider
            .two_factor()
            .consume_recovery_code(user_id, code_hash)
            .await
    }
}

pub struct AuditRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> AuditRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> AuditRepository for AuditRepositoryAdapter<R> {
    async fn append(&self, entry: AuditEntry) -> Result<AuditRecord, Error> {
        self.provider.audit().append(entry).await
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<AuditRecord>, Error> {
        self.provider.audit().list_recent(limit).await
    }

    async fn list_for_email(&self, email: &str, limit: u32) -> Result<Vec<AuditRecord>, Error> {
        self.provider.audit().list_for_email(email, limit).await
    }
}

pub struct WatermarkRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> WatermarkRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> WatermarkRepository for WatermarkRepositoryAdapter<R> {
    async fn get(&self, table_name: &str) -> Result<Option<SyncWatermark>, Error> {
        self.provider.watermark().get(table_name).await
    }

    async fn set(&self, watermark: &SyncWatermark) -> Result<(), Error> {
        self.provider.watermark().set(watermark).await
    }

    async fn clear(&self, table_name: &str) -> Result<(), Error> {
        self.provider.watermark().clear(table_name).await
    }

    async fn purge_expired(&self) -> Result<u64, Error> {
        self.provider.watermark().purge_expired().await
    }
}
