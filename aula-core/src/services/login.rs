//! The login gate.
//!
//! Every login request runs the same sequence of checks, each of which can end
//! the request:
//!
//! 1. **Block check**: an email under an active block is refused with
//!    [`AuthError::AccountLocked`] before anything else is looked at.
//! 2. **IP throttle**: a client IP with too many recent failures across all
//!    emails gets [`AuthError::TooManyAttempts`].
//! 3. **Credential check**: a wrong password records a failed attempt, which may
//!    place a block. The caller learns nothing about whether the email exists.
//! 4. **Role check**: valid credentials for an account that does not hold the
//!    requested role are refused with [`AuthError::RoleNotAssigned`]. No failed
//!    attempt is recorded.
//! 5. **Session limit check**: a user already at the live-session limit gets
//!    [`SessionError::LimitReached`]. Nothing is evicted.
//! 6. **Second factor**: users with confirmed two-factor get
//!    [`LoginOutcome::TwoFactorRequired`] and must call
//!    [`LoginService::verify_two_factor`].
//! 7. **Token issued**: attempts and escalation are reset and a session is created.
//!
//! [`SessionError::LimitReached`]: crate::error::SessionError::LimitReached

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use crate::{
    Error, User, UserId,
    error::{AuthError, SessionError, ValidationError},
    events::{Event, EventBus},
    repositories::{
        BruteForceProtectionRepository, PasswordRepository, SessionRepository,
        TwoFactorRepository, UserRepository,
    },
    services::{
        BruteForceProtectionService, PasswordService, SessionService, TwoFactorService,
        two_factor::TwoFactorMethod,
    },
    session::{ActiveSession, ClientInfo},
    user::Role,
    validation::validate_email,
};

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwoFactorLoginRequest {
    pub email: String,
    pub password: String,
    pub role: Role,
    pub code: String,
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated {
        user: User,
        session: ActiveSession,
    },
    TwoFactorRequired {
        user_id: UserId,
    },
}

pub struct LoginService<U, P, S, B, T>
where
    U: UserRepository,
    P: PasswordRepository,
    S: SessionRepository,
    B: BruteForceProtectionRepository,
    T: TwoFactorRepository,
{
    passwords: Arc<PasswordService<U, P>>,
    sessions: Arc<SessionService<S>>,
    brute_force: Arc<BruteForceProtectionService<B>>,
    two_factor: Arc<TwoFactorService<U, T>>,
    event_bus: Option<EventBus>,
}

impl<U, P, S, B, T> LoginService<U, P, S, B, T>
where
    U: UserRepository,
    P: PasswordRepository,
    S: SessionRepository,
    B: BruteForceProtectionRepository,
    T: TwoFactorRepository,
{
    pub fn new(
        passwords: Arc<PasswordService<U, P>>,
        sessions: Arc<SessionService<S>>,
        brute_force: Arc<BruteForceProtectionService<B>>,
        two_factor: Arc<TwoFactorService<U, T>>,
    ) -> Self {
        Self {
            passwords,
            sessions,
            brute_force,
            two_factor,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Run the gate for a password login.
    pub async fn login(
        &self,
        request: &LoginRequest,
        client: &ClientInfo,
    ) -> Result<LoginOutcome, Error> {
        let user = self
            .check_credentials(&request.email, &request.password, request.role, client)
            .await?;

        if user.requires_two_factor() {
            tracing::info!(user_id = %user.id, "Second factor required");
            self.emit(Event::TwoFactorChallenged {
                user_id: user.id.clone(),
                email: user.email.clone(),
                ip_address: client.ip_address.clone(),
                timestamp: Utc::now(),
            })
            .await;
            return Ok(LoginOutcome::TwoFactorRequired { user_id: user.id });
        }

        self.issue_session(user, request.role, client).await
    }

    /// Run the gate again with a second factor: a TOTP code or a recovery code.
    ///
    /// An invalid code counts as a failed login attempt.
    pub async fn verify_two_factor(
        &self,
        request: &TwoFactorLoginRequest,
        client: &ClientInfo,
    ) -> Result<LoginOutcome, Error> {
        let user = self
            .check_credentials(&request.email, &request.password, request.role, client)
            .await?;

        match self.two_factor.verify(&user, &request.code).await {
            Ok(TwoFactorMethod::RecoveryCode) => {
                self.emit(Event::RecoveryCodeUsed {
                    user_id: user.id.clone(),
                    email: user.email.clone(),
                    ip_address: client.ip_address.clone(),
                    timestamp: Utc::now(),
                })
                .await;
            }
            Ok(TwoFactorMethod::Totp) => {}
            Err(Error::Auth(AuthError::InvalidTwoFactorCode)) => {
                return Err(self
                    .fail(
                        &request.email,
                        client,
                        "invalid two-factor code",
                        AuthError::InvalidTwoFactorCode,
                    )
                    .await);
            }
            Err(e) => return Err(e),
        }

        self.issue_session(user, request.role, client).await
    }

    /// Steps 1 to 5 of the gate.
    async fn check_credentials(
        &self,
        email: &str,
        password: &str,
        role: Role,
        client: &ClientInfo,
    ) -> Result<User, Error> {
        validate_email(email)?;
        if password.is_empty() {
            return Err(ValidationError::MissingField("Password is required".to_string()).into());
        }

        let status = self.brute_force.get_lockout_status(email).await?;
        if let (true, Some(locked_until)) = (status.is_locked, status.locked_until) {
            tracing::info!(email = %email, locked_until = %locked_until, "Login refused, account locked");
            return Err(AuthError::AccountLocked { locked_until }.into());
        }

        if self
            .brute_force
            .is_ip_throttled(client.ip_address.as_deref())
            .await?
        {
            tracing::warn!(ip_address = ?client.ip_address, "Login refused, client IP throttled");
            return Err(AuthError::TooManyAttempts.into());
        }

        let user = match self.passwords.authenticate(email, password).await {
            Ok(user) => user,
            Err(Error::Auth(AuthError::InvalidCredentials)) => {
                return Err(self
                    .fail(email, client, "invalid credentials", AuthError::InvalidCredentials)
                    .await);
            }
            Err(e) => return Err(e),
        };

        if !user.has_role(role) {
            tracing::info!(user_id = %user.id, role = %role, "Login refused, role not assigned");
            return Err(AuthError::RoleNotAssigned(role.to_string()).into());
        }

        if let Err(e) = self.sessions.check_limit(&user).await {
            self.session_limit_reached(&user, client, &e).await;
            return Err(e);
        }

        Ok(user)
    }

    /// Record a failed attempt and decide what the caller sees: the block if
    /// this attempt placed one, `rejection` otherwise.
    async fn fail(
        &self,
        email: &str,
        client: &ClientInfo,
        reason: &str,
        rejection: AuthError,
    ) -> Error {
        let ip_address = client.ip_address.as_deref();
        let status = match self.brute_force.record_failed_attempt(email, ip_address).await {
            Ok(status) => status,
            Err(e) => return e,
        };

        self.emit(Event::LoginFailed {
            email: email.to_string(),
            failed_attempts: status.failed_attempts,
            ip_address: client.ip_address.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        })
        .await;

        match (status.is_locked, status.locked_until) {
            (true, Some(locked_until)) => {
                self.emit(Event::AccountLocked {
                    email: email.to_string(),
                    failed_attempts: status.failed_attempts,
                    lockout_count: status.lockout_count,
                    locked_until,
                    ip_address: client.ip_address.clone(),
                    timestamp: Utc::now(),
                })
                .await;
                AuthError::AccountLocked { locked_until }.into()
            }
            _ => rejection.into(),
        }
    }

    async fn issue_session(
        &self,
        user: User,
        role: Role,
        client: &ClientInfo,
    ) -> Result<LoginOutcome, Error> {
        let session = match self.sessions.create_session(&user, role, client).await {
            Ok(session) => session,
            Err(e) => {
                self.session_limit_reached(&user, client, &e).await;
                return Err(e);
            }
        };
        self.brute_force.reset_attempts(&user.email).await?;

        tracing::info!(
            user_id = %user.id,
            session_id = %session.id,
            role = %role,
            device = %session.device,
            "Login succeeded"
        );
        self.emit(Event::LoginSucceeded {
            user_id: user.id.clone(),
            email: user.email.clone(),
            role,
            session_id: session.id.clone(),
            ip_address: session.ip_address.clone(),
            device: session.device.clone(),
            timestamp: Utc::now(),
        })
        .await;

        Ok(LoginOutcome::Authenticated { user, session })
    }

    async fn session_limit_reached(&self, user: &User, client: &ClientInfo, error: &Error) {
        if let Error::Session(SessionError::LimitReached { current, max }) = error {
            tracing::info!(user_id = %user.id, current, max, "Login refused, session limit reached");
            self.emit(Event::SessionLimitReached {
                user_id: user.id.clone(),
                email: user.email.clone(),
                current: *current,
                max: *max,
                ip_address: client.ip_address.clone(),
                timestamp: Utc::now(),
            })
            .await;
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(event_bus) = &self.event_bus {
            if let Err(e) = event_bus.emit(&event).await {
                tracing::warn!(error = %e, kind = event.kind(), "Failed to record event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::{decode_totp_secret, totp},
        events::AuditEventHandler,
        services::mock::MockStore,
        storage::{BruteForceProtectionConfig, NewUser, SessionConfig, TwoFactorConfig},
    };

    type TestLogin = LoginService<MockStore, MockStore, MockStore, MockStore, MockStore>;

    const PASSWORD: &str = "correct horse battery";

    struct Harness {
        store: Arc<MockStore>,
        login: TestLogin,
        two_factor: Arc<TwoFactorService<MockStore, MockStore>>,
        passwords: Arc<PasswordService<MockStore, MockStore>>,
        sessions: Arc<SessionService<MockStore>>,
    }

    async fn harness(max_failed_attempts: u32) -> Harness {
        let store = Arc::new(MockStore::new());
        let passwords = Arc::new(PasswordService::new(store.clone(), store.clone()));
        let sessions = Arc::new(SessionService::new(store.clone(), SessionConfig::default()));
        let brute_force = Arc::new(BruteForceProtectionService::new(
            store.clone(),
            BruteForceProtectionConfig::default().with_max_failed_attempts(max_failed_attempts),
        ));
        let two_factor = Arc::new(TwoFactorService::new(
            store.clone(),
            store.clone(),
            TwoFactorConfig::default(),
        ));
        let event_bus = EventBus::default();
        event_bus
            .register(Arc::new(AuditEventHandler::new(store.clone())))
            .await;

        let login = LoginService::new(
            passwords.clone(),
            sessions.clone(),
            brute_force,
            two_factor.clone(),
        )
        .with_event_bus(event_bus);

        Harness {
            store,
            login,
            two_factor,
            passwords,
            sessions,
        }
    }

    async fn create_user(h: &Harness, email: &str, roles: Vec<Role>, max: Option<u32>) -> User {
        let mut builder = NewUser::builder().email(email.to_string()).roles(roles);
        if let Some(max) = max {
            builder = builder.max_sessions(max);
        }
        let user = h.store.create(builder.build().unwrap()).await.unwrap();
        h.passwords.set_password(&user.id, PASSWORD).await.unwrap();
        user
    }

    fn request(email: &str, password: &str, role: Role) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            role,
        }
    }

    fn client() -> ClientInfo {
        ClientInfo::new(Some("192.0.2.10".to_string()), Some("curl/8.0".to_string()))
    }

    #[tokio::test]
    async fn test_successful_login_issues_session() {
        let h = harness(5).await;
        let user = create_user(&h, "t@example.com", vec![Role::Teacher], None).await;

        let outcome = h
            .login
            .login(&request("t@example.com", PASSWORD, Role::Teacher), &client())
            .await
            .unwrap();

        let LoginOutcome::Authenticated { session, .. } = outcome else {
            panic!("expected a session");
        };
        assert_eq!(session.user_id, user.id);
        assert_eq!(session.ip_address.as_deref(), Some("192.0.2.10"));
        assert!(h.store.audit_kinds().contains(&"login_succeeded".to_string()));
    }

    #[tokio::test]
    async fn test_locked_account_rejects_correct_password() {
        let h = harness(3).await;
        create_user(&h, "t@example.com", vec![Role::Teacher], None).await;

        for attempt in 1..=3 {
            let err = h
                .login
                .login(&request("t@example.com", "wrong password", Role::Teacher), &client())
                .await
                .unwrap_err();
            if attempt < 3 {
                assert!(matches!(err, Error::Auth(AuthError::InvalidCredentials)));
            } else {
                assert!(err.is_locked_error());
            }
        }

        let err = h
            .login
            .login(&request("t@example.com", PASSWORD, Role::Teacher), &client())
            .await
            .unwrap_err();
        assert!(err.is_locked_error());
        assert!(h.store.audit_kinds().contains(&"account_locked".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_email_is_indistinguishable() {
        let h = harness(5).await;
        create_user(&h, "t@example.com", vec![Role::Teacher], None).await;

        let unknown = h
            .login
            .login(&request("ghost@example.com", PASSWORD, Role::Teacher), &client())
            .await
            .unwrap_err();
        let wrong = h
            .login
            .login(&request("t@example.com", "wrong password", Role::Teacher), &client())
            .await
            .unwrap_err();

        assert_eq!(unknown.to_string(), wrong.to_string());
        assert_eq!(h.store.attempt_count("ghost@example.com"), 1);
    }

    #[tokio::test]
    async fn test_wrong_role_is_forbidden_without_counting_a_failure() {
        let h = harness(5).await;
        create_user(&h, "t@example.com", vec![Role::Teacher], None).await;

        let err = h
            .login
            .login(&request("t@example.com", PASSWORD, Role::Student), &client())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Auth(AuthError::RoleNotAssigned(ref r)) if r == "student"));
        assert_eq!(h.store.attempt_count("t@example.com"), 0);
        assert!(h.store.sessions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_limit_then_freed() {
        let h = harness(5).await;
        let user = create_user(&h, "t@example.com", vec![Role::Teacher], Some(3)).await;
        let req = request("t@example.com", PASSWORD, Role::Teacher);

        let mut tokens = Vec::new();
        for _ in 0..3 {
            match h.login.login(&req, &client()).await.unwrap() {
                LoginOutcome::Authenticated { session, .. } => tokens.push(session.token.unwrap()),
                LoginOutcome::TwoFactorRequired { .. } => panic!("unexpected 2fa"),
            }
        }

        let err = h.login.login(&req, &client()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Session(SessionError::LimitReached { current: 3, max: 3 })
        ));
        assert!(err.is_rate_limit_error());
        assert!(h.store.audit_kinds().contains(&"session_limit_reached".to_string()));

        h.sessions.logout(&tokens[0]).await.unwrap();
        assert!(h.login.login(&req, &client()).await.is_ok());
        assert_eq!(h.sessions.count_live_sessions(&user.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_ip_throttle_applies_before_credentials() {
        let store_config = BruteForceProtectionConfig::default().with_ip_max_failed_attempts(2);
        let h = harness(10).await;
        let login = LoginService::new(
            h.passwords.clone(),
            h.sessions.clone(),
            Arc::new(BruteForceProtectionService::new(h.store.clone(), store_config)),
            h.two_factor.clone(),
        );
        create_user(&h, "t@example.com", vec![Role::Teacher], None).await;

        for email in ["a@example.com", "b@example.com"] {
            let _ = login
                .login(&request(email, "wrong password", Role::Teacher), &client())
                .await;
        }

        let err = login
            .login(&request("t@example.com", PASSWORD, Role::Teacher), &client())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::TooManyAttempts)));
    }

    #[tokio::test]
    async fn test_invalid_request_is_a_validation_error() {
        let h = harness(5).await;
        let err = h
            .login
            .login(&request("not-an-email", PASSWORD, Role::Teacher), &client())
            .await
            .unwrap_err();
        assert!(err.is_validation_error());

        let err = h
            .login
            .login(&request("t@example.com", "", Role::Teacher), &client())
            .await
            .unwrap_err();
        assert!(err.is_validation_error());
    }

    async fn enable_two_factor(h: &Harness, user: &User) -> Vec<String> {
        let enrollment = h.two_factor.enable(&user.id).await.unwrap();
        let key = decode_totp_secret(&enrollment.secret).unwrap();
        let code = totp(&key, Utc::now().timestamp() as u64, 30, 6).unwrap();
        h.two_factor.confirm(&user.id, &code).await.unwrap();
        enrollment.recovery_codes
    }

    fn two_factor_request(code: &str) -> TwoFactorLoginRequest {
        TwoFactorLoginRequest {
            email: "dev@example.com".to_string(),
            password: PASSWORD.to_string(),
            role: Role::Developer,
            code: code.to_string(),
        }
    }

    #[tokio::test]
    async fn test_two_factor_challenge_and_recovery_code() {
        let h = harness(5).await;
        let user = create_user(&h, "dev@example.com", vec![Role::Developer], None).await;
        let codes = enable_two_factor(&h, &user).await;

        let outcome = h
            .login
            .login(&request("dev@example.com", PASSWORD, Role::Developer), &client())
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::TwoFactorRequired { ref user_id } if *user_id == user.id));
        assert!(h.store.sessions.lock().unwrap().is_empty());

        let outcome = h
            .login
            .verify_two_factor(&two_factor_request(&codes[0]), &client())
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::Authenticated { .. }));
        assert!(h.store.audit_kinds().contains(&"recovery_code_used".to_string()));

        let err = h
            .login
            .verify_two_factor(&two_factor_request(&codes[0]), &client())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::InvalidTwoFactorCode)));
        assert_eq!(h.store.attempt_count("dev@example.com"), 1);
    }

    #[tokio::test]
    async fn test_two_factor_rejects_wrong_password() {
        let h = harness(5).await;
        let user = create_user(&h, "dev@example.com", vec![Role::Developer], None).await;
        let codes = enable_two_factor(&h, &user).await;

        let mut req = two_factor_request(&codes[0]);
        req.password = "wrong password".to_string();
        let err = h.login.verify_two_factor(&req, &client()).await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::InvalidCredentials)));

        // The recovery code was not spent.
        let user = UserRepository::find_by_id(&*h.store, &user.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.two_factor.remaining_recovery_codes(), 8);
    }
}
