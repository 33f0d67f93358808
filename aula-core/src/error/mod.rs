pub mod utilities;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Dependency error: {0}")]
    Dependency(#[from] DependencyError),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// Wrong email or password. Deliberately does not say which.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User not found")]
    UserNotFound,

    #[error("User already exists")]
    UserAlreadyExists,

    #[error("Role {0} is not assigned to this account")]
    RoleNotAssigned(String),

    #[error("Account is temporarily locked")]
    AccountLocked { locked_until: DateTime<Utc> },

    #[error("Too many login attempts")]
    TooManyAttempts,

    #[error("Invalid two-factor code")]
    InvalidTwoFactorCode,

    #[error("Two-factor authentication is not enabled")]
    TwoFactorNotEnabled,

    #[error("Two-factor authentication is already enabled")]
    TwoFactorAlreadyEnabled,

    #[error("Password hash error: {0}")]
    PasswordHashError(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,

    #[error("Session expired")]
    Expired,

    #[error("Session is no longer active")]
    Inactive,

    #[error("Session has been blocked")]
    Blocked,

    #[error("Active session limit reached ({current}/{max})")]
    LimitReached { current: u32, max: u32 },

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Record not found")]
    NotFound,

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid email format: {0}")]
    InvalidEmail(String),

    #[error("Invalid password: {0}")]
    InvalidPassword(String),

    #[error("Weak password")]
    WeakPassword,

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid role: {0}")]
    InvalidRole(String),

    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Event bus error: {0}")]
    BusError(String),

    #[error("Event handler error: {0}")]
    HandlerError(String),
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Invalid two-factor secret: {0}")]
    TwoFactorSecret(String),

    #[error("Invalid two-factor parameters: {0}")]
    TwoFactorParameters(String),

    #[error("Token signing failed: {0}")]
    TokenSigning(String),
}

/// Failures of systems outside our control: the warehouse API, its token
/// endpoint, or the source database while a sync job is running.
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Request timed out after {0} attempts")]
    Timeout(u32),

    #[error("Source error: {0}")]
    Source(String),
}

impl Error {
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Error::Auth(AuthError::InvalidCredentials)
                | Error::Auth(AuthError::UserNotFound)
                | Error::Auth(AuthError::InvalidTwoFactorCode)
        )
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Errors that should be reported as 429 to the caller.
    pub fn is_rate_limit_error(&self) -> bool {
        matches!(
            self,
            Error::Auth(AuthError::TooManyAttempts)
                | Error::Session(SessionError::LimitReached { .. })
        )
    }

    pub fn is_locked_error(&self) -> bool {
        matches!(self, Error::Auth(AuthError::AccountLocked { .. }))
    }

    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    pub fn is_session_error(&self) -> bool {
        matches!(self, Error::Session(_))
    }

    pub fn is_crypto_error(&self) -> bool {
        matches!(self, Error::Crypto(_))
    }

    pub fn is_dependency_error(&self) -> bool {
        matches!(self, Error::Dependency(_))
    }
}
