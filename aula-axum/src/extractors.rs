use std::net::SocketAddr;

use aula::SessionToken;
use axum::{
    RequestPartsExt,
    extract::{ConnectInfo, FromRequestParts},
    http::{StatusCode, request::Parts},
};
use axum_extra::{TypedHeader, headers::UserAgent};

use crate::{
    error::ApiError,
    types::{Authenticated, ConnectionInfo},
};

impl<S> FromRequestParts<S> for ConnectionInfo
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .extract::<Option<TypedHeader<UserAgent>>>()
            .await
            .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid user agent header"))?
            .map(|ua| ua.to_string());

        let ip = forwarded_for(parts).or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });

        Ok(ConnectionInfo { ip, user_agent })
    }
}

/// First address of `X-Forwarded-For`, as set by a reverse proxy.
fn forwarded_for(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get("X-Forwarded-For")
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

pub(crate) fn bearer_token(parts: &Parts) -> Option<SessionToken> {
    parts
        .headers
        .get("Authorization")
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(SessionToken::new)
}

/// Bearer token of the request, required.
pub struct BearerToken(pub SessionToken);

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        bearer_token(parts)
            .map(BearerToken)
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))
    }
}

/// The authenticated session, placed in the request by [`require_auth`](crate::require_auth).
pub struct AuthSession(pub Authenticated);

impl<S> FromRequestParts<S> for AuthSession
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Authenticated>()
            .cloned()
            .map(AuthSession)
            .ok_or_else(|| ApiError::Unauthorized("Unauthorized".to_string()))
    }
}
