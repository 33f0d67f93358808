use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    crypto::MAX_TOTP_SKEW,
    error::ValidationError,
    user::{Role, UserId},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub id: UserId,
    pub email: String,
    pub name: Option<String>,
    pub roles: Vec<Role>,
    pub max_sessions: Option<u32>,
}

impl NewUser {
    pub fn builder() -> NewUserBuilder {
        NewUserBuilder::default()
    }
}

#[derive(Default)]
pub struct NewUserBuilder {
    id: Option<UserId>,
    email: Option<String>,
    name: Option<String>,
    roles: Vec<Role>,
    max_sessions: Option<u32>,
}

impl NewUserBuilder {
    pub fn id(mut self, id: UserId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn email(mut self, email: String) -> Self {
        self.email = Some(email);
        self
    }

    pub fn name(mut self, name: String) -> Self {
        self.name = Some(name);
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
        self
    }

    pub fn roles(mut self, roles: Vec<Role>) -> Self {
        self.roles = roles;
        self
    }

    pub fn max_sessions(mut self, max_sessions: u32) -> Self {
        self.max_sessions = Some(max_sessions);
        self
    }

    pub fn build(self) -> Result<NewUser, Error> {
        Ok(NewUser {
            id: self.id.unwrap_or_default(),
            email: self.email.ok_or(ValidationError::MissingField(
                "Email is required".to_string(),
            ))?,
            name: self.name,
            roles: self.roles,
            max_sessions: self.max_sessions,
        })
    }
}

/// One row of the append-only failed login log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedLoginAttempt {
    pub id: i64,
    pub email: String,
    pub ip_address: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

/// Aggregate over failed attempts inside a time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptStats {
    pub count: u32,
    pub latest_at: Option<DateTime<Utc>>,
}

/// A temporary block placed on an email after too many failed logins.
///
/// `lockout_count` is the number of consecutive lockouts and drives the
/// escalation of `blocked_until`. It outlives the block itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub email: String,
    pub blocked_until: DateTime<Utc>,
    pub reason: String,
    pub lockout_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl BlockRecord {
    pub fn is_active(&self) -> bool {
        self.blocked_until > Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockoutStatus {
    pub email: String,
    pub failed_attempts: u32,
    pub is_locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
    pub lockout_count: u32,
}

impl LockoutStatus {
    pub fn unlocked(email: &str) -> Self {
        Self {
            email: email.to_string(),
            failed_attempts: 0,
            is_locked: false,
            locked_until: None,
            lockout_count: 0,
        }
    }

    /// Seconds until the block lifts, if one is in force.
    pub fn retry_after_seconds(&self) -> Option<i64> {
        self.locked_until
            .filter(|_| self.is_locked)
            .map(|until| (until - Utc::now()).num_seconds().max(0))
    }
}

/// An audit trail entry before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub kind: String,
    pub email: Option<String>,
    pub user_id: Option<UserId>,
    pub ip_address: Option<String>,
    pub detail: serde_json::Value,
}

impl AuditEntry {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            email: None,
            user_id: None,
            ip_address: None,
            detail: serde_json::Value::Null,
        }
    }

    pub fn email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn user_id(mut self, user_id: &UserId) -> Self {
        self.user_id = Some(user_id.clone());
        self
    }

    pub fn ip_address(mut self, ip_address: Option<&str>) -> Self {
        self.ip_address = ip_address.map(str::to_string);
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

/// A stored entry of the login/security audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub kind: String,
    pub email: Option<String>,
    pub user_id: Option<UserId>,
    pub ip_address: Option<String>,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Last successful incremental sync of a source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub table_name: String,
    pub last_synced_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SyncWatermark {
    pub fn new(table_name: &str, last_synced_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            table_name: table_name.to_string(),
            last_synced_at,
            expires_at: Utc::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

pub(crate) fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BruteForceProtectionConfig {
    pub enabled: bool,
    /// Failed attempts for one email inside `attempt_window` that trigger a block.
    pub max_failed_attempts: u32,
    pub attempt_window: Duration,
    /// Duration of the first block. Each consecutive block doubles it.
    pub base_lockout: Duration,
    pub max_lockout: Duration,
    /// Failed attempts from one IP, across all emails, that trigger throttling.
    pub ip_max_failed_attempts: u32,
    pub retention_period: Duration,
}

impl Default for BruteForceProtectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failed_attempts: 5,
            attempt_window: Duration::minutes(15),
            base_lockout: Duration::minutes(15),
            max_lockout: Duration::hours(24),
            ip_max_failed_attempts: 20,
            retention_period: Duration::days(7),
        }
    }
}

impl BruteForceProtectionConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_parse("AULA_BRUTE_FORCE_ENABLED").unwrap_or(defaults.enabled),
            max_failed_attempts: env_parse("AULA_BRUTE_FORCE_MAX_ATTEMPTS")
                .unwrap_or(defaults.max_failed_attempts),
            attempt_window: env_parse("AULA_BRUTE_FORCE_WINDOW_MINUTES")
                .map(Duration::minutes)
                .unwrap_or(defaults.attempt_window),
            base_lockout: env_parse("AULA_BRUTE_FORCE_BASE_LOCKOUT_MINUTES")
                .map(Duration::minutes)
                .unwrap_or(defaults.base_lockout),
            max_lockout: env_parse("AULA_BRUTE_FORCE_MAX_LOCKOUT_HOURS")
                .map(Duration::hours)
                .unwrap_or(defaults.max_lockout),
            ip_max_failed_attempts: env_parse("AULA_BRUTE_FORCE_IP_MAX_ATTEMPTS")
                .unwrap_or(defaults.ip_max_failed_attempts),
            retention_period: env_parse("AULA_BRUTE_FORCE_RETENTION_DAYS")
                .map(Duration::days)
                .unwrap_or(defaults.retention_period),
        }
    }

    pub fn with_max_failed_attempts(mut self, max_failed_attempts: u32) -> Self {
        self.max_failed_attempts = max_failed_attempts;
        self
    }

    pub fn with_ip_max_failed_attempts(mut self, ip_max_failed_attempts: u32) -> Self {
        self.ip_max_failed_attempts = ip_max_failed_attempts;
        self
    }

    pub fn with_base_lockout(mut self, base_lockout: Duration) -> Self {
        self.base_lockout = base_lockout;
        self
    }

    pub fn with_max_lockout(mut self, max_lockout: Duration) -> Self {
        self.max_lockout = max_lockout;
        self
    }

    /// Block length for the `lockout_count`-th consecutive lockout:
    /// `base_lockout * 2^(n-1)`, capped at `max_lockout`.
    pub fn lockout_duration(&self, lockout_count: u32) -> Duration {
        let exponent = lockout_count.saturating_sub(1).min(30);
        let factor = 1i32 << exponent;
        let escalated = self
            .base_lockout
            .checked_mul(factor)
            .unwrap_or(self.max_lockout);
        escalated.min(self.max_lockout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Default limit of live sessions per user; `User::max_sessions` overrides it.
    pub max_active_sessions: u32,
    pub expires_in: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_active_sessions: 3,
            expires_in: Duration::hours(12),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_active_sessions: env_parse("AULA_MAX_SESSIONS")
                .unwrap_or(defaults.max_active_sessions),
            expires_in: env_parse("AULA_SESSION_TTL_HOURS")
                .map(Duration::hours)
                .unwrap_or(defaults.expires_in),
        }
    }

    pub fn with_max_active_sessions(mut self, max_active_sessions: u32) -> Self {
        self.max_active_sessions = max_active_sessions;
        self
    }

    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = expires_in;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoFactorConfig {
    pub issuer: String,
    pub digits: u32,
    pub step_seconds: u64,
    /// Number of adjacent time steps accepted on either side of the current one.
    pub skew: u64,
    pub recovery_codes: usize,
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self {
            issuer: "aula".to_string(),
            digits: 6,
            step_seconds: 30,
            skew: 1,
            recovery_codes: 8,
        }
    }
}

impl TwoFactorConfig {
    /// Reject settings that cannot produce usable codes.
    pub fn validate(&self) -> Result<(), Error> {
        if !(6..=8).contains(&self.digits) {
            return Err(Error::Config(format!(
                "two-factor digits must be between 6 and 8, got {}",
                self.digits
            )));
        }
        if !(1..=300).contains(&self.step_seconds) {
            return Err(Error::Config(format!(
                "two-factor step must be between 1 and 300 seconds, got {}",
                self.step_seconds
            )));
        }
        if self.skew > MAX_TOTP_SKEW {
            return Err(Error::Config(format!(
                "two-factor skew must be at most {MAX_TOTP_SKEW}, got {}",
                self.skew
            )));
        }
        if self.recovery_codes == 0 {
            return Err(Error::Config(
                "at least one recovery code must be issued".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            issuer: std::env::var("AULA_2FA_ISSUER").unwrap_or(defaults.issuer),
            digits: env_parse("AULA_2FA_DIGITS").unwrap_or(defaults.digits),
            step_seconds: env_parse("AULA_2FA_STEP_SECONDS").unwrap_or(defaults.step_seconds),
            skew: env_parse("AULA_2FA_SKEW").unwrap_or(defaults.skew),
            recovery_codes: env_parse("AULA_2FA_RECOVERY_CODES")
                .unwrap_or(defaults.recovery_codes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_builder() {
        let user = NewUser::builder()
            .email("student@example.com".to_string())
            .role(Role::Student)
            .role(Role::Student)
            .max_sessions(2)
            .build()
            .unwrap();

        assert_eq!(user.roles, vec![Role::Student]);
        assert_eq!(user.max_sessions, Some(2));
        assert!(user.id.is_valid());
    }

    #[test]
    fn test_new_user_requires_email() {
        assert!(NewUser::builder().build().is_err());
    }

    #[test]
    fn test_lockout_duration_escalates() {
        let config = BruteForceProtectionConfig::default();
        assert_eq!(config.lockout_duration(1), Duration::minutes(15));
        assert_eq!(config.lockout_duration(2), Duration::minutes(30));
        assert_eq!(config.lockout_duration(3), Duration::minutes(60));
        assert_eq!(config.lockout_duration(7), Duration::hours(16));
        assert_eq!(config.lockout_duration(8), Duration::hours(24));
        assert_eq!(config.lockout_duration(60), Duration::hours(24));
    }

    #[test]
    fn test_lockout_duration_zero_count_is_base() {
        let config = BruteForceProtectionConfig::default();
        assert_eq!(config.lockout_duration(0), Duration::minutes(15));
    }

    #[test]
    fn test_retry_after_seconds() {
        let status = LockoutStatus {
            email: "a@example.com".to_string(),
            failed_attempts: 5,
            is_locked: true,
            locked_until: Some(Utc::now() + Duration::seconds(120)),
            lockout_count: 1,
        };
        let retry = status.retry_after_seconds().unwrap();
        assert!(retry > 115 && retry <= 120);

        assert_eq!(LockoutStatus::unlocked("a@example.com").retry_after_seconds(), None);
    }

    #[test]
    fn test_watermark_expiry() {
        let fresh = SyncWatermark::new("courses", Utc::now(), Duration::days(7));
        assert!(!fresh.is_expired());

        let stale = SyncWatermark::new("courses", Utc::now(), Duration::seconds(-1));
        assert!(stale.is_expired());
    }

    #[test]
    fn test_config_defaults() {
        let sessions = SessionConfig::default();
        assert_eq!(sessions.max_active_sessions, 3);
        assert_eq!(sessions.expires_in, Duration::hours(12));

        let two_factor = TwoFactorConfig::default();
        assert_eq!(two_factor.digits, 6);
        assert_eq!(two_factor.recovery_codes, 8);

        assert!(!BruteForceProtectionConfig::disabled().enabled);
    }

    #[test]
    fn test_two_factor_config_validation() {
        assert!(TwoFactorConfig::default().validate().is_ok());

        let bad = [
            TwoFactorConfig { digits: 10, ..Default::default() },
            TwoFactorConfig { digits: 4, ..Default::default() },
            TwoFactorConfig { step_seconds: 0, ..Default::default() },
            TwoFactorConfig { skew: 1_000_000, ..Default::default() },
            TwoFactorConfig { recovery_codes: 0, ..Default::default() },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }
}
