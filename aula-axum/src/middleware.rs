use std::sync::Arc;

use aula::Aula;
use aula_core::repositories::RepositoryProvider;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::{error::ApiError, extractors::bearer_token, types::Authenticated};

pub struct AuthState<R: RepositoryProvider> {
    pub aula: Arc<Aula<R>>,
}

impl<R: RepositoryProvider> Clone for AuthState<R> {
    fn clone(&self) -> Self {
        Self {
            aula: self.aula.clone(),
        }
    }
}

/// Resolve the bearer token to a live session and its user, or refuse the
/// request with 401.
pub async fn require_auth<R>(
    State(state): State<AuthState<R>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError>
where
    R: RepositoryProvider,
{
    let (mut parts, body) = request.into_parts();
    let token = bearer_token(&parts)
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

    let session = state.aula.get_session(&token).await.map_err(|e| {
        tracing::debug!(error = %e, "Rejected bearer token");
        ApiError::from(e)
    })?;

    let user = state
        .aula
        .get_user(&session.user_id)
        .await?
        .ok_or_else(|| {
            tracing::warn!(user_id = %session.user_id, "Session belongs to a missing user");
            ApiError::Unauthorized("Unauthorized".to_string())
        })?;

    parts.extensions.insert(Authenticated { session, user });
    Ok(next.run(Request::from_parts(parts, body)).await)
}
