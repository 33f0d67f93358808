use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use aula::Error;
use aula_core::error::{AuthError, SessionError, StorageError};
use serde_json::json;
use thiserror::Error;

/// Errors returned by the HTTP endpoints, rendered as `{ "error", "code" }` JSON.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("Account is locked")]
    Locked { retry_after_seconds: i64 },

    #[error("{message}")]
    TooManyRequests {
        message: String,
        current: Option<u32>,
        max: Option<u32>,
    },

    #[error("Internal server error")]
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(e) => ApiError::Validation(e.to_string()),
            Error::Auth(e) => match e {
                // A second factor offered for an account without one is a
                // failed verification like any wrong code.
                AuthError::InvalidCredentials
                | AuthError::InvalidTwoFactorCode
                | AuthError::TwoFactorNotEnabled => ApiError::Unauthorized(e.to_string()),
                AuthError::RoleNotAssigned(_) => ApiError::Forbidden(e.to_string()),
                AuthError::AccountLocked { locked_until } => ApiError::Locked {
                    retry_after_seconds: (locked_until - chrono::Utc::now())
                        .num_seconds()
                        .max(0),
                },
                AuthError::TooManyAttempts => ApiError::TooManyRequests {
                    message: e.to_string(),
                    current: None,
                    max: None,
                },
                AuthError::UserNotFound => ApiError::NotFound,
                AuthError::UserAlreadyExists => ApiError::Conflict(e.to_string()),
                AuthError::TwoFactorAlreadyEnabled => ApiError::Validation(e.to_string()),
                AuthError::PasswordHashError(_) => ApiError::Internal(e.to_string()),
            },
            Error::Session(SessionError::LimitReached { current, max }) => {
                ApiError::TooManyRequests {
                    message: format!(
                        "Maximum of {max} active sessions reached, log out elsewhere first"
                    ),
                    current: Some(current),
                    max: Some(max),
                }
            }
            Error::Session(e) => ApiError::Unauthorized(e.to_string()),
            Error::Storage(StorageError::NotFound) => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Locked { .. } => StatusCode::LOCKED,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            ApiError::Locked {
                retry_after_seconds,
            } => json!({
                "error": self.to_string(),
                "code": status.as_u16(),
                "retry_after_seconds": retry_after_seconds,
            }),
            ApiError::TooManyRequests {
                current: Some(current),
                max: Some(max),
                ..
            } => json!({
                "error": self.to_string(),
                "code": status.as_u16(),
                "current": current,
                "max": max,
            }),
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed");
                json!({ "error": self.to_string(), "code": status.as_u16() })
            }
            _ => json!({ "error": self.to_string(), "code": status.as_u16() }),
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::Locked {
            retry_after_seconds,
        } = self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
