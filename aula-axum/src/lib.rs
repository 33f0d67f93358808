//! # Aula Axum Integration
//!
//! Axum routes for the aula login gate:
//!
//! | Method | Path                   | Auth   |                                          |
//! | ------ | ---------------------- | ------ | ---------------------------------------- |
//! | GET    | `/health`              |        | storage health                           |
//! | POST   | `/login`               |        | email, password and role                 |
//! | POST   | `/login/verify-2fa`    |        | same, plus a TOTP or recovery code       |
//! | POST   | `/logout`              | bearer | deactivate the calling session           |
//! | GET    | `/sessions`            | bearer | sessions of the calling user             |
//! | POST   | `/sessions/{id}/block` | bearer | block a session (admins: any session)    |
//!
//! Errors are JSON bodies `{ "error": "...", "code": 401 }`. A locked account
//! answers 423 with `retry_after_seconds`, a full session limit 429 with
//! `current` and `max`.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use aula::AulaBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let aula = AulaBuilder::from_env()?
//!         .with_sqlite("sqlite://aula.db")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     let app = axum::Router::new().nest("/auth", aula_axum::routes(Arc::new(aula)));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
//!     )
//!     .await?;
//!     Ok(())
//! }
//! ```

mod error;
mod extractors;
mod middleware;
mod routes;
mod types;

pub use error::{ApiError, Result};
pub use extractors::{AuthSession, BearerToken};
pub use middleware::{AuthState, require_auth};
pub use routes::create_router;
pub use types::{
    Authenticated, ConnectionInfo, HealthResponse, LoginBody, LoginResponse, MessageResponse,
    SessionResponse, SessionsResponse, VerifyTwoFactorBody,
};

use std::sync::Arc;

use aula::Aula;
use aula_core::repositories::RepositoryProvider;
use axum::Router;

/// Create the login and session routes, ready to be nested into an application.
pub fn routes<R>(aula: Arc<Aula<R>>) -> Router
where
    R: RepositoryProvider + 'static,
{
    create_router(aula)
}
