use std::sync::Arc;

use aula::{Aula, Error, LoginOutcome, Role, SessionId};
use aula_core::{error::SessionError, repositories::RepositoryProvider};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use crate::{
    error::{ApiError, Result},
    extractors::{AuthSession, BearerToken},
    middleware::{AuthState, require_auth},
    types::*,
};

pub fn create_router<R>(aula: Arc<Aula<R>>) -> Router
where
    R: RepositoryProvider + 'static,
{
    let state = AuthState { aula };

    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/login", post(login_handler))
        .route("/login/verify-2fa", post(verify_two_factor_handler));

    let session_routes = Router::new()
        .route("/logout", post(logout_handler))
        .route("/sessions", get(list_sessions_handler))
        .route("/sessions/{id}/block", post(block_session_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_auth::<R>,
        ));

    Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .with_state(state)
}

async fn health_handler<R>(State(state): State<AuthState<R>>) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    state
        .aula
        .health_check()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

fn login_response(outcome: LoginOutcome) -> Result<Json<LoginResponse>> {
    match outcome {
        LoginOutcome::Authenticated { user, session } => {
            let token = session
                .token
                .clone()
                .ok_or_else(|| ApiError::Internal("Session issued without token".to_string()))?;
            Ok(Json(LoginResponse::Authenticated {
                token: token.into_inner(),
                user,
                session,
            }))
        }
        LoginOutcome::TwoFactorRequired { .. } => Ok(Json(LoginResponse::TwoFactorRequired)),
    }
}

async fn login_handler<R>(
    State(state): State<AuthState<R>>,
    connection_info: ConnectionInfo,
    Json(payload): Json<LoginBody>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    let request = payload.into_request()?;
    let outcome = state.aula.login(&request, &connection_info.into()).await?;
    login_response(outcome)
}

async fn verify_two_factor_handler<R>(
    State(state): State<AuthState<R>>,
    connection_info: ConnectionInfo,
    Json(payload): Json<VerifyTwoFactorBody>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    let request = payload.into_request()?;
    let outcome = state
        .aula
        .verify_two_factor(&request, &connection_info.into())
        .await?;
    login_response(outcome)
}

async fn logout_handler<R>(
    State(state): State<AuthState<R>>,
    BearerToken(token): BearerToken,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    state.aula.logout(&token).await?;

    Ok(Json(MessageResponse {
        message: "Successfully logged out".to_string(),
    }))
}

async fn list_sessions_handler<R>(
    State(state): State<AuthState<R>>,
    AuthSession(auth): AuthSession,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    let sessions = state.aula.list_sessions(&auth.user.id).await?;
    Ok(Json(SessionsResponse { sessions }))
}

/// Admins may block any session, everyone else only their own.
async fn block_session_handler<R>(
    State(state): State<AuthState<R>>,
    AuthSession(auth): AuthSession,
    Path(id): Path<String>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    let session_id = SessionId::new(&id);

    if auth.session.role != Role::Admin {
        let own = state.aula.list_sessions(&auth.user.id).await?;
        if !own.iter().any(|s| s.id == session_id) {
            return Err(ApiError::Forbidden(
                "Only administrators can block other users' sessions".to_string(),
            ));
        }
    }

    let session = match state.aula.block_session(&session_id).await {
        Ok(session) => session,
        Err(Error::Session(SessionError::NotFound)) => return Err(ApiError::NotFound),
        Err(e) => return Err(e.into()),
    };

    Ok((StatusCode::OK, Json(SessionResponse { session })))
}
