//! Storage seams of the login gate and the synchronizer.
//!
//! Each data domain (accounts, credentials, sessions, login attempts,
//! two-factor secrets, the audit trail, sync watermarks) has a `*Repository`
//! trait and a `*RepositoryProvider` trait exposing it. A backend implements
//! all of them and [`RepositoryProvider`] on one type.

pub mod adapter;
pub mod audit;
pub mod brute_force;
pub mod password;
pub mod session;
pub mod two_factor;
pub mod user;
pub mod watermark;

pub use adapter::{
    AuditRepositoryAdapter, BruteForceProtectionRepositoryAdapter, PasswordRepositoryAdapter,
    SessionRepositoryAdapter, TwoFactorRepositoryAdapter, UserRepositoryAdapter,
    WatermarkRepositoryAdapter,
};
pub use audit::AuditRepository;
pub use brute_force::BruteForceProtectionRepository;
pub use password::PasswordRepository;
pub use session::SessionRepository;
pub use two_factor::TwoFactorRepository;
pub use user::UserRepository;
pub use watermark::WatermarkRepository;

use async_trait::async_trait;

use crate::Error;

/// Provider trait for user repository access.
pub trait UserRepositoryProvider: Send + Sync + 'static {
    type UserRepo: UserRepository;

    fn user(&self) -> &Self::UserRepo;
}

/// Provider trait for session repository access.
pub trait SessionRepositoryProvider: Send + Sync + 'static {
    type SessionRepo: SessionRepository;

    fn session(&self) -> &Self::SessionRepo;
}

/// Provider trait for password repository access.
pub trait PasswordRepositoryProvider: Send + Sync + 'static {
    type PasswordRepo: PasswordRepository;

    fn password(&self) -> &Self::PasswordRepo;
}

/// Provider trait for brute force protection repository access.
pub trait BruteForceRepositoryProvider: Send + Sync + 'static {
    type BruteForceRepo: BruteForceProtectionRepository;

    fn brute_force(&self) -> &Self::BruteForceRepo;
}

/// Provider trait for two-factor repository access.
pub trait TwoFactorRepositoryProvider: Send + Sync + 'static {
    type TwoFactorRepo: TwoFactorRepository;

    fn two_factor(&self) -> &Self::TwoFactorRepo;
}

/// Provider trait for audit trail access.
pub trait AuditRepositoryProvider: Send + Sync + 'static {
    type AuditRepo: AuditRepository;

    fn audit(&self) -> &Self::AuditRepo;
}

/// Provider trait for sync watermark access.
pub trait WatermarkRepositoryProvider: Send + Sync + 'static {
    type WatermarkRepo: WatermarkRepository;

    fn watermark(&self) -> &Self::WatermarkRepo;
}

/// Everything a storage backend provides: the seven repositories plus schema
/// migration and a liveness check. `aula_storage_sqlite::SqliteRepositoryProvider`
/// is the bundled implementation.
#[async_trait]
pub trait RepositoryProvider:
    UserRepositoryProvider
    + SessionRepositoryProvider
    + PasswordRepositoryProvider
    + BruteForceRepositoryProvider
    + TwoFactorRepositoryProvider
    + AuditRepositoryProvider
    + WatermarkRepositoryProvider
{
    /// Bring the schema up to date
    async fn migrate(&self) -> Result<(), Error>;

    /// Cheap round trip to the store
    async fn health_check(&self) -> Result<(), Error>;
}
