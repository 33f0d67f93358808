//! Time-based one-time passwords (RFC 6238) with single-use recovery codes.
//!
//! Enabling two-factor stores an unconfirmed secret. Logins are only challenged
//! once the first code generated from that secret has been confirmed, so a user
//! who abandons enrollment is not locked out.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::{
    Error, User, UserId,
    crypto::{
        decode_totp_secret, generate_recovery_code, generate_totp_secret, hash_token,
        normalize_recovery_code, verify_totp,
    },
    error::AuthError,
    repositories::{TwoFactorRepository, UserRepository},
    storage::TwoFactorConfig,
};

/// Returned once, when two-factor is enabled. Recovery codes are never
/// retrievable again in plain text.
#[derive(Debug, Clone, Serialize)]
pub struct TwoFactorEnrollment {
    pub secret: String,
    pub otpauth_uri: String,
    pub recovery_codes: Vec<String>,
}

/// How a second factor was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorMethod {
    Totp,
    RecoveryCode,
}

pub struct TwoFactorService<U: UserRepository, T: TwoFactorRepository> {
    user_repository: Arc<U>,
    repository: Arc<T>,
    config: TwoFactorConfig,
}

impl<U: UserRepository, T: TwoFactorRepository> TwoFactorService<U, T> {
    pub fn new(user_repository: Arc<U>, repository: Arc<T>, config: TwoFactorConfig) -> Self {
        Self {
            user_repository,
            repository,
            config,
        }
    }

    /// Generate a secret and recovery codes. Replaces any unconfirmed enrollment.
    pub async fn enable(&self, user_id: &UserId) -> Result<TwoFactorEnrollment, Error> {
        let user = self.require_user(user_id).await?;
        if user.two_factor.is_enabled() {
            return Err(AuthError::TwoFactorAlreadyEnabled.into());
        }

        let secret = generate_totp_secret();
        let recovery_codes = self.generate_recovery_codes();
        let hashes = hash_codes(&recovery_codes);

        self.repository
            .set_pending_secret(user_id, &secret, &hashes)
            .await?;

        Ok(TwoFactorEnrollment {
            otpauth_uri: self.otpauth_uri(&user.email, &secret),
            secret,
            recovery_codes,
        })
    }

    /// Activate two-factor with the first code from the authenticator app.
    pub async fn confirm(&self, user_id: &UserId, code: &str) -> Result<(), Error> {
        let user = self.require_user(user_id).await?;
        let secret = match &user.two_factor.secret {
            Some(secret) if user.two_factor.is_pending_confirmation() => secret,
            Some(_) => return Err(AuthError::TwoFactorAlreadyEnabled.into()),
            None => return Err(AuthError::TwoFactorNotEnabled.into()),
        };

        if !self.check_totp(secret, code)? {
            return Err(AuthError::InvalidTwoFactorCode.into());
        }

        self.repository.confirm(user_id, Utc::now()).await?;
        tracing::info!(user_id = %user_id, "Two-factor authentication enabled");
        Ok(())
    }

    pub async fn disable(&self, user_id: &UserId) -> Result<(), Error> {
        self.require_user(user_id).await?;
        self.repository.disable(user_id).await?;
        tracing::info!(user_id = %user_id, "Two-factor authentication disabled");
        Ok(())
    }

    /// Replace all recovery codes with a fresh set.
    pub async fn regenerate_recovery_codes(&self, user_id: &UserId) -> Result<Vec<String>, Error> {
        let user = self.require_user(user_id).await?;
        if !user.two_factor.is_enabled() {
            return Err(AuthError::TwoFactorNotEnabled.into());
        }

        let recovery_codes = self.generate_recovery_codes();
        self.repository
            .replace_recovery_codes(user_id, &hash_codes(&recovery_codes))
            .await?;
        Ok(recovery_codes)
    }

    /// Check a TOTP code, falling back to a recovery code.
    ///
    /// A recovery code is consumed by this call and cannot be used again.
    pub async fn verify(&self, user: &User, code: &str) -> Result<TwoFactorMethod, Error> {
        let secret = match &user.two_factor.secret {
            Some(secret) if user.two_factor.is_enabled() => secret,
            _ => return Err(AuthError::TwoFactorNotEnabled.into()),
        };

        if self.check_totp(secret, code)? {
            return Ok(TwoFactorMethod::Totp);
        }

        let normalized = normalize_recovery_code(code);
        if normalized.is_empty() {
            return Err(AuthError::InvalidTwoFactorCode.into());
        }

        if self
            .repository
            .consume_recovery_code(&user.id, &hash_token(&normalized))
            .await?
        {
            tracing::info!(user_id = %user.id, "Recovery code used");
            return Ok(TwoFactorMethod::RecoveryCode);
        }

        Err(AuthError::InvalidTwoFactorCode.into())
    }

    fn check_totp(&self, secret: &str, code: &str) -> Result<bool, Error> {
        let key = decode_totp_secret(secret)?;
        let now = Utc::now().timestamp().max(0) as u64;
        Ok(verify_totp(
            &key,
            code,
            now,
            self.config.step_seconds,
            self.config.digits,
            self.config.skew,
        )?)
    }

    fn generate_recovery_codes(&self) -> Vec<String> {
        (0..self.config.recovery_codes)
            .map(|_| generate_recovery_code())
            .collect()
    }

    fn otpauth_uri(&self, email: &str, secret: &str) -> String {
        let issuer = uri_component(&self.config.issuer);
        format!(
            "otpauth://totp/{issuer}:{account}?secret={secret}&issuer={issuer}&digits={digits}&period={period}",
            account = uri_component(email),
            digits = self.config.digits,
            period = self.config.step_seconds,
        )
    }

    async fn require_user(&self, user_id: &UserId) -> Result<User, Error> {
        self.user_repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::UserNotFound.into())
    }
}

fn hash_codes(codes: &[String]) -> Vec<String> {
    codes
        .iter()
        .map(|code| hash_token(&normalize_recovery_code(code)))
        .collect()
}

fn uri_component(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'@' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{crypto::totp, services::mock::MockStore, storage::NewUser, user::Role};

    async fn setup() -> (Arc<MockStore>, TwoFactorService<MockStore, MockStore>, UserId) {
        let store = Arc::new(MockStore::new());
        let user = store
            .create(
                NewUser::builder()
                    .email("dev@example.com".to_string())
                    .role(Role::Developer)
                    .build()
                    .unwrap(),
            )
            .await
            .unwrap();
        let service = TwoFactorService::new(store.clone(), store.clone(), TwoFactorConfig::default());
        (store, service, user.id)
    }

    fn current_code(secret: &str) -> String {
        let key = decode_totp_secret(secret).unwrap();
        totp(&key, Utc::now().timestamp() as u64, 30, 6).unwrap()
    }

    async fn enabled_user(
        store: &MockStore,
        service: &TwoFactorService<MockStore, MockStore>,
        user_id: &UserId,
    ) -> (User, TwoFactorEnrollment) {
        let enrollment = service.enable(user_id).await.unwrap();
        service
            .confirm(user_id, &current_code(&enrollment.secret))
            .await
            .unwrap();
        let user = store.find_by_id(user_id).await.unwrap().unwrap();
        (user, enrollment)
    }

    #[tokio::test]
    async fn test_enable_requires_confirmation() {
        let (store, service, user_id) = setup().await;

        let enrollment = service.enable(&user_id).await.unwrap();
        assert_eq!(enrollment.recovery_codes.len(), 8);
        assert!(enrollment.otpauth_uri.starts_with("otpauth://totp/aula:dev@example.com?secret="));

        let user = store.find_by_id(&user_id).await.unwrap().unwrap();
        assert!(user.two_factor.is_pending_confirmation());
        assert!(!user.requires_two_factor());

        assert!(matches!(
            service.confirm(&user_id, "000000x").await.unwrap_err(),
            Error::Auth(AuthError::InvalidTwoFactorCode)
        ));

        service
            .confirm(&user_id, &current_code(&enrollment.secret))
            .await
            .unwrap();
        let user = store.find_by_id(&user_id).await.unwrap().unwrap();
        assert!(user.requires_two_factor());
    }

    #[tokio::test]
    async fn test_enable_twice_fails() {
        let (store, service, user_id) = setup().await;
        enabled_user(&store, &service, &user_id).await;

        assert!(matches!(
            service.enable(&user_id).await.unwrap_err(),
            Error::Auth(AuthError::TwoFactorAlreadyEnabled)
        ));
    }

    #[tokio::test]
    async fn test_verify_totp() {
        let (store, service, user_id) = setup().await;
        let (user, enrollment) = enabled_user(&store, &service, &user_id).await;

        let method = service
            .verify(&user, &current_code(&enrollment.secret))
            .await
            .unwrap();
        assert_eq!(method, TwoFactorMethod::Totp);
    }

    #[tokio::test]
    async fn test_recovery_code_is_single_use() {
        let (store, service, user_id) = setup().await;
        let (user, enrollment) = enabled_user(&store, &service, &user_id).await;
        let code = enrollment.recovery_codes[0].clone();

        let method = service.verify(&user, &code.to_uppercase()).await.unwrap();
        assert_eq!(method, TwoFactorMethod::RecoveryCode);

        let err = service.verify(&user, &code).await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::InvalidTwoFactorCode)));

        let user = store.find_by_id(&user_id).await.unwrap().unwrap();
        assert_eq!(user.two_factor.remaining_recovery_codes(), 7);
    }

    #[tokio::test]
    async fn test_regenerate_invalidates_old_codes() {
        let (store, service, user_id) = setup().await;
        let (user, enrollment) = enabled_user(&store, &service, &user_id).await;

        let fresh = service.regenerate_recovery_codes(&user_id).await.unwrap();
        assert_eq!(fresh.len(), 8);

        assert!(
            service
                .verify(&user, &enrollment.recovery_codes[0])
                .await
                .is_err()
        );
        assert_eq!(
            service.verify(&user, &fresh[0]).await.unwrap(),
            TwoFactorMethod::RecoveryCode
        );
    }

    #[tokio::test]
    async fn test_disable() {
        let (store, service, user_id) = setup().await;
        enabled_user(&store, &service, &user_id).await;

        service.disable(&user_id).await.unwrap();
        let user = store.find_by_id(&user_id).await.unwrap().unwrap();
        assert!(!user.requires_two_factor());
        assert!(matches!(
            service.verify(&user, "123456").await.unwrap_err(),
            Error::Auth(AuthError::TwoFactorNotEnabled)
        ));
    }

    #[test]
    fn test_uri_component() {
        assert_eq!(uri_component("Aula LMS"), "Aula%20LMS");
        assert_eq!(uri_component("a+b@example.com"), "a%2Bb@example.com");
    }
}
