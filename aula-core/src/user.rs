//! Users and roles
//!
//! | Field          | Type               | Description                                              |
//! | -------------- | ------------------ | -------------------------------------------------------- |
//! | `id`           | `UserId`           | The unique identifier for the user.                      |
//! | `email`        | `String`           | Login identifier.                                        |
//! | `name`         | `Option<String>`   | Display name.                                            |
//! | `roles`        | `Vec<Role>`        | Contexts the user may log in as.                         |
//! | `max_sessions` | `Option<u32>`      | Per-user override of the concurrent session limit.       |
//! | `two_factor`   | `TwoFactorState`   | TOTP secret, confirmation time and recovery code hashes. |
//! | `locked_at`    | `Option<DateTime>` | Set while the account is under a brute-force lockout.    |
//! | `created_at`   | `DateTime`         | The timestamp when the user was created.                 |
//! | `updated_at`   | `DateTime`         | The timestamp when the user was last updated.            |
use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    error::ValidationError,
    id::{generate_prefixed_id, validate_prefixed_id},
};

/// A unique, stable identifier for a specific user
/// This value should be treated as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: &str) -> Self {
        UserId(id.to_string())
    }

    pub fn new_random() -> Self {
        UserId(generate_prefixed_id("usr"))
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        validate_prefixed_id(&self.0, "usr")
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new_random()
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The context a user logs in as. Accounts may hold several roles and pick one
/// per login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
    Developer,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Teacher, Role::Student, Role::Developer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
            Role::Developer => "developer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == wanted)
            .ok_or_else(|| ValidationError::InvalidRole(s.to_string()))
    }
}

/// Second-factor state stored alongside the user.
///
/// A secret exists from the moment 2FA is enabled, but it only guards logins
/// once the first code has been confirmed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwoFactorState {
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing, default)]
    pub recovery_code_hashes: Vec<String>,
}

impl TwoFactorState {
    pub fn is_enabled(&self) -> bool {
        self.secret.is_some() && self.confirmed_at.is_some()
    }

    pub fn is_pending_confirmation(&self) -> bool {
        self.secret.is_some() && self.confirmed_at.is_none()
    }

    pub fn remaining_recovery_codes(&self) -> usize {
        self.recovery_code_hashes.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,

    pub email: String,

    pub name: Option<String>,

    pub roles: Vec<Role>,

    pub max_sessions: Option<u32>,

    pub two_factor: TwoFactorState,

    pub locked_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn builder() -> UserBuilder {
        UserBuilder::default()
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn requires_two_factor(&self) -> bool {
        self.two_factor.is_enabled()
    }
}

#[derive(Default)]
pub struct UserBuilder {
    id: Option<UserId>,
    email: Option<String>,
    name: Option<String>,
    roles: Vec<Role>,
    max_sessions: Option<u32>,
    two_factor: TwoFactorState,
    locked_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl UserBuilder {
    pub fn id(mut self, id: UserId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn email(mut self, email: String) -> Self {
        self.email = Some(email);
        self
    }

    pub fn name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn roles(mut self, roles: Vec<Role>) -> Self {
        self.roles = roles;
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
        self
    }

    pub fn max_sessions(mut self, max_sessions: Option<u32>) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    pub fn two_factor(mut self, two_factor: TwoFactorState) -> Self {
        self.two_factor = two_factor;
        self
    }

    pub fn locked_at(mut self, locked_at: Option<DateTime<Utc>>) -> Self {
        self.locked_at = locked_at;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    pub fn build(self) -> Result<User, Error> {
        let now = Utc::now();
        Ok(User {
            id: self.id.unwrap_or_default(),
            email: self.email.ok_or(ValidationError::MissingField(
                "Email is required".to_string(),
            ))?,
            name: self.name,
            roles: self.roles,
            max_sessions: self.max_sessions,
            two_factor: self.two_factor,
            locked_at: self.locked_at,
            created_at: self.created_at.unwrap_or(now),
            updated_at: self.updated_at.unwrap_or(now),
        })
    }
}
