//! Service layer for business logic
//!
//! This module contains concrete service implementations that encapsulate
//! login defense, session and user management logic.

pub mod brute_force;
pub mod login;
pub mod password;
pub mod session;
pub mod two_factor;
pub mod user;

#[cfg(test)]
pub(crate) mod mock;

pub use brute_force::BruteForceProtectionService;
pub use login::{LoginOutcome, LoginRequest, LoginService, TwoFactorLoginRequest};
pub use password::PasswordService;
pub use session::SessionService;
pub use two_factor::{TwoFactorEnrollment, TwoFactorMethod, TwoFactorService};
pub use user::UserService;
