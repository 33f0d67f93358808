//! Core functionality for the aula project
//!
//! This crate contains the domain types shared by every other aula crate:
//!
//! - [`User`] and [`Role`], the accounts that log in
//! - [`ActiveSession`], the unit counted by the concurrent-session limit
//! - the repository traits in [`repositories`] that storage backends implement
//! - the services in [`services`], most importantly the
//!   [`LoginService`](services::LoginService) that runs every login through the
//!   brute-force, role, session-limit and second-factor checks
//! - the table [`sync`] engine that exports source tables to an analytics warehouse
//!
//! Storage backends and the warehouse client live in their own crates; this crate
//! has no database or HTTP dependencies.
pub mod crypto;
pub mod device;
pub mod error;
pub mod events;
pub mod id;
pub mod repositories;
pub mod services;
pub mod session;
pub mod storage;
pub mod sync;
pub mod user;
pub mod validation;

pub use error::Error;
pub use events::{Event, EventBus, EventHandler};
pub use session::{ActiveSession, ClientInfo, SessionId, SessionToken};
pub use storage::{BruteForceProtectionConfig, LockoutStatus, SessionConfig, TwoFactorConfig};
pub use sync::{SyncMode, SyncReport};
pub use user::{Role, User, UserId};
