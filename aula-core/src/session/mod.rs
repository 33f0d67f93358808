//! Session management
//!
//! A session is created for every successful login and is the unit counted by
//! the concurrent-session limit.
//!
//! | Field          | Type             | Description                                              |
//! | -------------- | ---------------- | -------------------------------------------------------- |
//! | `id`           | `SessionId`      | Stable id used by administrators to block a session.     |
//! | `token`        | `SessionToken`   | Opaque bearer token handed to the client, stored hashed. |
//! | `user_id`      | `UserId`         | The owner of the session.                                |
//! | `role`         | `Role`           | The role chosen at login.                                |
//! | `ip_address`   | `Option<String>` | The IP address of the client that created the session.   |
//! | `user_agent`   | `Option<String>` | The user agent of the client that created the session.   |
//! | `device`       | `String`         | Label derived from the user agent.                       |
//! | `active`       | `bool`           | Cleared on logout or when an administrator blocks it.    |
//! | `blocked`      | `bool`           | Set by an administrator; a blocked session never revives. |
//! | `created_at`   | `DateTime`       | The timestamp when the session was created.              |
//! | `updated_at`   | `DateTime`       | The timestamp when the session was last updated.         |
//! | `expires_at`   | `DateTime`       | The timestamp when the session will expire.              |

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    crypto::generate_secure_token,
    device::parse_user_agent,
    error::ValidationError,
    id::generate_prefixed_id,
    user::{Role, UserId},
};

/// Opaque bearer token with 256 bits of entropy, used for lookups in session storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: &str) -> Self {
        SessionToken(token.to_string())
    }

    pub fn new_random() -> Self {
        SessionToken(generate_secure_token())
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionToken {
    fn default() -> Self {
        Self::new_random()
    }
}

impl From<String> for SessionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionToken {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: &str) -> Self {
        SessionId(id.to_string())
    }

    pub fn new_random() -> Self {
        SessionId(generate_prefixed_id("ses"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new_random()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection metadata of the client performing a login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn new(ip_address: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            ip_address,
            user_agent,
        }
    }

    pub fn device_label(&self) -> String {
        parse_user_agent(self.user_agent.as_deref()).label()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSession {
    pub id: SessionId,

    /// The bearer token. Storage keeps only its hash, so this is `None` for
    /// sessions loaded by id or listed for a user.
    #[serde(skip)]
    pub token: Option<SessionToken>,

    pub user_id: UserId,

    pub role: Role,

    pub ip_address: Option<String>,

    pub user_agent: Option<String>,

    pub device: String,

    pub active: bool,

    pub blocked: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,
}

impl ActiveSession {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Whether this session counts towards the user's concurrent-session limit.
    pub fn is_live(&self) -> bool {
        self.active && !self.blocked && !self.is_expired()
    }
}

#[derive(Default)]
pub struct SessionBuilder {
    id: Option<SessionId>,
    token: Option<SessionToken>,
    user_id: Option<UserId>,
    role: Option<Role>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    device: Option<String>,
    active: Option<bool>,
    blocked: bool,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

impl SessionBuilder {
    pub fn id(mut self, id: SessionId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn token(mut self, token: SessionToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn user_id(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn ip_address(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }

    pub fn user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn device(mut self, device: String) -> Self {
        self.device = Some(device);
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn blocked(mut self, blocked: bool) -> Self {
        self.blocked = blocked;
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

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn build(self) -> Result<ActiveSession, Error> {
        let now = Utc::now();
        Ok(ActiveSession {
            id: self.id.unwrap_or_default(),
            token: Some(self.token.unwrap_or_default()),
            user_id: self.user_id.ok_or(ValidationError::MissingField(
                "User ID is required".to_string(),
            ))?,
            role: self
                .role
                .ok_or(ValidationError::MissingField("Role is required".to_string()))?,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            device: self.device.unwrap_or_else(|| "unknown".to_string()),
            active: self.active.unwrap_or(true),
            blocked: self.blocked,
            created_at: self.created_at.unwrap_or(now),
            updated_at: self.updated_at.unwrap_or(now),
            expires_at: self.expires_at.unwrap_or(now + Duration::hours(12)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_random() {
        let token = SessionToken::new_random();
        assert_eq!(token.as_str().len(), 43);
        assert_ne!(token, SessionToken::new_random());
    }

    #[test]
    fn test_session_builder_defaults() {
        let session = ActiveSession::builder()
            .user_id(UserId::new_random())
            .role(Role::Student)
            .build()
            .unwrap();

        assert!(session.active);
        assert!(!session.blocked);
        assert!(session.is_live());
        assert!(session.id.as_str().starts_with("ses_"));
    }

    #[test]
    fn test_session_builder_requires_role() {
        let result = ActiveSession::builder()
            .user_id(UserId::new_random())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_blocked_or_expired_session_is_not_live() {
        let blocked = ActiveSession::builder()
            .user_id(UserId::new_random())
            .role(Role::Teacher)
            .active(false)
            .blocked(true)
            .build()
            .unwrap();
        assert!(!blocked.is_live());

        let expired = ActiveSession::builder()
            .user_id(UserId::new_random())
            .role(Role::Teacher)
            .expires_at(Utc::now() - Duration::minutes(1))
            .build()
            .unwrap();
        assert!(expired.is_expired());
        assert!(!expired.is_live());
    }

    #[test]
    fn test_token_is_not_serialized() {
        let session = ActiveSession::builder()
            .user_id(UserId::new_random())
            .role(Role::Admin)
            .build()
            .unwrap();
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("token").is_none());
        assert_eq!(json["role"], "admin");
    }
}
