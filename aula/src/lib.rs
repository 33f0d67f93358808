//! # Aula
//!
//! Aula is the backend of a learning management system reduced to the two
//! pieces that need careful engineering:
//!
//! - a **login defense gate** that runs every login through brute-force
//!   protection, role selection, a concurrent-session limit and an optional
//!   second factor, and
//! - an **incremental table synchronizer** that exports the LMS tables to an
//!   analytics warehouse (BigQuery), tracking a watermark per table.
//!
//! The [`Aula`] facade wires the services of `aula_core` to a storage backend.
//!
//! ## Example
//!
//! ```rust,no_run
//! use aula::{AulaBuilder, ClientInfo, LoginRequest, Role};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let aula = AulaBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     let request = LoginRequest {
//!         email: "ada@example.edu".to_string(),
//!         password: "correct horse battery staple".to_string(),
//!         role: Role::Teacher,
//!     };
//!     let outcome = aula.login(&request, &ClientInfo::default()).await;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```
pub mod builder;

use std::sync::Arc;

use aula_core::{
    Event, EventBus,
    events::AuditEventHandler,
    repositories::{
        AuditRepository, AuditRepositoryAdapter, RepositoryProvider, BruteForceProtectionRepositoryAdapter,
        PasswordRepositoryAdapter, SessionRepositoryAdapter, TwoFactorRepositoryAdapter,
        UserRepositoryAdapter, WatermarkRepositoryAdapter,
    },
    services::{
        BruteForceProtectionService, LoginService, PasswordService, SessionService,
        TwoFactorEnrollment, TwoFactorService, UserService,
    },
    storage::AuditRecord,
    sync::{SyncConfig, SyncOptions, TableLocks, TableSource, TableSynchronizer, Warehouse},
};
use chrono::Utc;

pub use builder::{AulaBuilder, AulaBuilderError};

/// Re-export core types from aula_core
///
/// These types are commonly used when working with the Aula API.
pub use aula_core::{
    ActiveSession, BruteForceProtectionConfig, ClientInfo, Error, LockoutStatus, Role,
    SessionConfig, SessionId, SessionToken, SyncMode, SyncReport, TwoFactorConfig, User, UserId,
    services::{LoginOutcome, LoginRequest, TwoFactorLoginRequest},
};

/// Re-export storage backends
#[cfg(feature = "sqlite")]
pub use aula_storage_sqlite::{SqliteRepositoryProvider, SqliteTableSource};

/// Re-export warehouse backends
#[cfg(feature = "bigquery")]
pub use aula_bigquery::{BigQueryConfig, BigQueryWarehouse};

type Users<R> = UserRepositoryAdapter<R>;
type Passwords<R> = PasswordRepositoryAdapter<R>;
type Sessions<R> = SessionRepositoryAdapter<R>;
type BruteForce<R> = BruteForceProtectionRepositoryAdapter<R>;
type TwoFactor<R> = TwoFactorRepositoryAdapter<R>;

/// The central coordinator of the login gate, session administration and
/// table synchronization.
///
/// Every service shares the same repository provider and the same event bus,
/// which persists events to the audit trail.
pub struct Aula<R: RepositoryProvider> {
    repositories: Arc<R>,
    user_service: Arc<UserService<Users<R>>>,
    password_service: Arc<PasswordService<Users<R>, Passwords<R>>>,
    session_service: Arc<SessionService<Sessions<R>>>,
    brute_force_service: Arc<BruteForceProtectionService<BruteForce<R>>>,
    two_factor_service: Arc<TwoFactorService<Users<R>, TwoFactor<R>>>,
    login_service: LoginService<Users<R>, Passwords<R>, Sessions<R>, BruteForce<R>, TwoFactor<R>>,
    audit: Arc<AuditRepositoryAdapter<R>>,
    event_bus: EventBus,
    sync_config: SyncConfig,
    sync_locks: TableLocks,
}

impl<R: RepositoryProvider> Aula<R> {
    /// Create an instance with default configuration and the audit trail attached.
    pub async fn new(repositories: Arc<R>) -> Self {
        Self::with_config(
            repositories,
            SessionConfig::default(),
            BruteForceProtectionConfig::default(),
            TwoFactorConfig::default(),
            SyncConfig::default(),
        )
        .await
    }

    pub(crate) async fn with_config(
        repositories: Arc<R>,
        session_config: SessionConfig,
        brute_force_config: BruteForceProtectionConfig,
        two_factor_config: TwoFactorConfig,
        sync_config: SyncConfig,
    ) -> Self {
        let users = Arc::new(UserRepositoryAdapter::new(repositories.clone()));
        let passwords = Arc::new(PasswordRepositoryAdapter::new(repositories.clone()));
        let sessions = Arc::new(SessionRepositoryAdapter::new(repositories.clone()));
        let brute_force = Arc::new(BruteForceProtectionRepositoryAdapter::new(
            repositories.clone(),
        ));
        let two_factor = Arc::new(TwoFactorRepositoryAdapter::new(repositories.clone()));
        let audit = Arc::new(AuditRepositoryAdapter::new(repositories.clone()));

        let event_bus = EventBus::new();
        event_bus
            .register(Arc::new(AuditEventHandler::new(audit.clone())))
            .await;

        let user_service = Arc::new(UserService::new(users.clone()));
        let password_service = Arc::new(PasswordService::new(users.clone(), passwords));
        let session_service = Arc::new(SessionService::new(sessions, session_config));
        let brute_force_service = Arc::new(BruteForceProtectionService::new(
            brute_force,
            brute_force_config,
        ));
        let two_factor_service = Arc::new(TwoFactorService::new(
            users,
            two_factor,
            two_factor_config,
        ));

        let login_service = LoginService::new(
            password_service.clone(),
            session_service.clone(),
            brute_force_service.clone(),
            two_factor_service.clone(),
        )
        .with_event_bus(event_bus.clone());

        Self {
            repositories,
            user_service,
            password_service,
            session_service,
            brute_force_service,
            two_factor_service,
            login_service,
            audit,
            event_bus,
            sync_config,
            sync_locks: TableLocks::new(),
        }
    }

    pub fn repositories(&self) -> &Arc<R> {
        &self.repositories
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn sync_config(&self) -> &SyncConfig {
        &self.sync_config
    }

    pub fn brute_force_config(&self) -> &BruteForceProtectionConfig {
        self.brute_force_service.config()
    }

    pub fn session_config(&self) -> &SessionConfig {
        self.session_service.config()
    }

    /// Apply all pending schema migrations.
    pub async fn migrate(&self) -> Result<(), Error> {
        self.repositories.migrate().await
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        self.repositories.health_check().await
    }

    // ------------------------------------------------------------------
    // Login gate
    // ------------------------------------------------------------------

    /// Run a password login through the gate.
    ///
    /// Users with confirmed two-factor get [`LoginOutcome::TwoFactorRequired`]
    /// and must call [`verify_two_factor`](Self::verify_two_factor).
    pub async fn login(
        &self,
        request: &LoginRequest,
        client: &ClientInfo,
    ) -> Result<LoginOutcome, Error> {
        self.login_service.login(request, client).await
    }

    /// Complete a login with a TOTP or recovery code.
    pub async fn verify_two_factor(
        &self,
        request: &TwoFactorLoginRequest,
        client: &ClientInfo,
    ) -> Result<LoginOutcome, Error> {
        self.login_service.verify_two_factor(request, client).await
    }

    pub async fn get_lockout_status(&self, email: &str) -> Result<LockoutStatus, Error> {
        self.brute_force_service.get_lockout_status(email).await
    }

    /// Lift a lockout and reset the escalation counter.
    ///
    /// Returns `true` if the account was locked.
    pub async fn unlock_account(&self, email: &str) -> Result<bool, Error> {
        let was_locked = self.brute_force_service.unlock_account(email).await?;
        self.emit(Event::AccountUnlocked {
            email: email.to_string(),
            timestamp: Utc::now(),
        })
        .await;
        Ok(was_locked)
    }

    /// Start the hourly cleanup of old failed login attempts.
    pub fn start_brute_force_cleanup(
        &self,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        self.brute_force_service.start_cleanup_task(shutdown)
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Resolve a bearer token to a live session.
    pub async fn get_session(&self, token: &SessionToken) -> Result<ActiveSession, Error> {
        self.session_service.get_session(token).await
    }

    pub async fn logout(&self, token: &SessionToken) -> Result<(), Error> {
        let session = self.session_service.get_session(token).await.ok();
        self.session_service.logout(token).await?;

        if let Some(session) = session {
            self.emit(Event::LoggedOut {
                user_id: session.user_id,
                session_id: session.id,
                timestamp: Utc::now(),
            })
            .await;
        }
        Ok(())
    }

    pub async fn list_sessions(&self, user_id: &UserId) -> Result<Vec<ActiveSession>, Error> {
        self.session_service.list_sessions(user_id).await
    }

    /// Block a session by id. The session stops counting towards the limit
    /// and its token is refused from now on.
    pub async fn block_session(&self, session_id: &SessionId) -> Result<ActiveSession, Error> {
        let session = self.session_service.block_session(session_id).await?;
        tracing::info!(session_id = %session.id, user_id = %session.user_id, "Session blocked");
        self.emit(Event::SessionBlocked {
            user_id: session.user_id.clone(),
            session_id: session.id.clone(),
            timestamp: Utc::now(),
        })
        .await;
        Ok(session)
    }

    /// Deactivate every session of a user. Returns how many were live.
    pub async fn terminate_user_sessions(&self, user_id: &UserId) -> Result<u64, Error> {
        self.session_service.terminate_all(user_id).await
    }

    pub async fn cleanup_expired_sessions(&self) -> Result<u64, Error> {
        self.session_service.cleanup_expired_sessions().await
    }

    // ------------------------------------------------------------------
    // Users and credentials
    // ------------------------------------------------------------------

    pub async fn create_user(
        &self,
        email: &str,
        name: Option<String>,
        roles: Vec<Role>,
        max_sessions: Option<u32>,
    ) -> Result<User, Error> {
        self.user_service
            .create_user(email, name, roles, max_sessions)
            .await
    }

    pub async fn get_user(&self, user_id: &UserId) -> Result<Option<User>, Error> {
        self.user_service.get_user(user_id).await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        self.user_service.get_user_by_email(email).await
    }

    pub async fn set_roles(&self, user_id: &UserId, roles: Vec<Role>) -> Result<User, Error> {
        self.user_service.set_roles(user_id, roles).await
    }

    pub async fn set_max_sessions(
        &self,
        user_id: &UserId,
        max_sessions: Option<u32>,
    ) -> Result<User, Error> {
        self.user_service
            .set_max_sessions(user_id, max_sessions)
            .await
    }

    pub async fn delete_user(&self, user_id: &UserId) -> Result<(), Error> {
        self.user_service.delete_user(user_id).await
    }

    pub async fn set_password(&self, user_id: &UserId, password: &str) -> Result<(), Error> {
        self.password_service.set_password(user_id, password).await
    }

    pub async fn change_password(
        &self,
        user_id: &UserId,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), Error> {
        self.password_service
            .change_password(user_id, old_password, new_password)
            .await
    }

    // ------------------------------------------------------------------
    // Two-factor authentication
    // ------------------------------------------------------------------

    /// Generate a secret and recovery codes. Logins are not guarded until
    /// [`confirm_two_factor`](Self::confirm_two_factor) succeeds.
    pub async fn enable_two_factor(&self, user_id: &UserId) -> Result<TwoFactorEnrollment, Error> {
        self.two_factor_service.enable(user_id).await
    }

    pub async fn confirm_two_factor(&self, user_id: &UserId, code: &str) -> Result<(), Error> {
        self.two_factor_service.confirm(user_id, code).await
    }

    pub async fn disable_two_factor(&self, user_id: &UserId) -> Result<(), Error> {
        self.two_factor_service.disable(user_id).await
    }

    pub async fn regenerate_recovery_codes(&self, user_id: &UserId) -> Result<Vec<String>, Error> {
        self.two_factor_service
            .regenerate_recovery_codes(user_id)
            .await
    }

    // ------------------------------------------------------------------
    // Audit trail
    // ------------------------------------------------------------------

    pub async fn recent_events(&self, limit: u32) -> Result<Vec<AuditRecord>, Error> {
        self.audit.list_recent(limit).await
    }

    pub async fn events_for_email(
        &self,
        email: &str,
        limit: u32,
    ) -> Result<Vec<AuditRecord>, Error> {
        self.audit.list_for_email(email, limit).await
    }

    // ------------------------------------------------------------------
    // Table synchronization
    // ------------------------------------------------------------------

    /// Build a synchronizer that keeps its watermarks in this instance's storage.
    ///
    /// Every synchronizer of one instance shares its table locks, so concurrent
    /// jobs never push the same table at the same time.
    pub fn synchronizer<S: TableSource, W: Warehouse>(
        &self,
        source: Arc<S>,
        warehouse: Arc<W>,
    ) -> TableSynchronizer<S, W, WatermarkRepositoryAdapter<R>> {
        let watermarks = Arc::new(WatermarkRepositoryAdapter::new(self.repositories.clone()));
        TableSynchronizer::new(source, warehouse, watermarks, self.sync_config.clone())
            .with_locks(self.sync_locks.clone())
            .with_event_bus(self.event_bus.clone())
    }

    /// Run one sync job. Never fails: problems end up in the report.
    pub async fn sync<S: TableSource, W: Warehouse>(
        &self,
        source: Arc<S>,
        warehouse: Arc<W>,
        options: &SyncOptions,
    ) -> SyncReport {
        self.synchronizer(source, warehouse).run(options).await
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.event_bus.emit(&event).await {
            tracing::warn!(error = %e, kind = event.kind(), "Failed to record event");
        }
    }
}
