//! In-memory repositories shared by the service tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error, User, UserId,
    error::AuthError,
    repositories::{
        AuditRepository, BruteForceProtectionRepository, PasswordRepository, SessionRepository,
        TwoFactorRepository, UserRepository,
    },
    session::{ActiveSession, SessionId, SessionToken},
    storage::{AttemptStats, AuditEntry, AuditRecord, BlockRecord, FailedLoginAttempt, NewUser},
    user::TwoFactorState,
};

#[derive(Default)]
pub(crate) struct MockStore {
    pub users: Mutex<Vec<User>>,
    pub passwords: Mutex<Vec<(UserId, String)>>,
    pub sessions: Mutex<Vec<ActiveSession>>,
    pub attempts: Mutex<Vec<FailedLoginAttempt>>,
    pub blocks: Mutex<Vec<BlockRecord>>,
    pub audit: Mutex<Vec<AuditRecord>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt_count(&self, email: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.email == email)
            .count()
    }

    pub fn audit_kinds(&self) -> Vec<String> {
        self.audit
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.kind.clone())
            .collect()
    }

    fn with_user<T>(&self, user_id: &UserId, f: impl FnOnce(&mut User) -> T) -> Result<T, Error> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| &u.id == user_id)
            .ok_or(AuthError::UserNotFound)?;
        Ok(f(user))
    }
}

#[async_trait]
impl UserRepository for MockStore {
    async fn create(&self, user: NewUser) -> Result<User, Error> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.email == user.email) {
            return Err(AuthError::UserAlreadyExists.into());
        }
        let created = User::builder()
            .id(user.id)
            .email(user.email)
            .name(user.name)
            .roles(user.roles)
            .max_sessions(user.max_sessions)
            .build()?;
        users.push(created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, Error> {
        Ok(self.users.lock().unwrap().iter().find(|u| &u.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn update(&self, user: &User) -> Result<User, Error> {
        self.with_user(&user.id, |u| {
            u.name = user.name.clone();
            u.roles = user.roles.clone();
            u.max_sessions = user.max_sessions;
            u.updated_at = Utc::now();
            u.clone()
        })
    }

    async fn delete(&self, id: &UserId) -> Result<(), Error> {
        self.users.lock().unwrap().retain(|u| &u.id != id);
        Ok(())
    }
}

#[async_trait]
impl PasswordRepository for MockStore {
    async fn set_password_hash(&self, user_id: &UserId, hash: &str) -> Result<(), Error> {
        let mut passwords = self.passwords.lock().unwrap();
        passwords.retain(|(id, _)| id != user_id);
        passwords.push((user_id.clone(), hash.to_string()));
        Ok(())
    }

    async fn get_password_hash(&self, user_id: &UserId) -> Result<Option<String>, Error> {
        Ok(self
            .passwords
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| id == user_id)
            .map(|(_, hash)| hash.clone()))
    }

    async fn remove_password_hash(&self, user_id: &UserId) -> Result<(), Error> {
        self.passwords.lock().unwrap().retain(|(id, _)| id != user_id);
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for MockStore {
    async fn create_within_limit(
        &self,
        session: ActiveSession,
        max_live: u32,
    ) -> Result<Option<ActiveSession>, Error> {
        let mut sessions = self.sessions.lock().unwrap();
        let live = sessions
            .iter()
            .filter(|s| s.user_id == session.user_id && s.is_live())
            .count() as u32;
        if live >= max_live {
            return Ok(None);
        }
        sessions.push(session.clone());
        Ok(Some(session))
    }

    async fn find_by_token(&self, token: &SessionToken) -> Result<Option<ActiveSession>, Error> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.token.as_ref() == Some(token))
            .cloned())
    }

    async fn find_by_id(&self, id: &SessionId) -> Result<Option<ActiveSession>, Error> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| &s.id == id)
            .cloned())
    }

    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<ActiveSession>, Error> {
        let mut sessions: Vec<_> = self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| &s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn count_live(&self, user_id: &UserId) -> Result<u32, Error> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| &s.user_id == user_id && s.is_live())
            .count() as u32)
    }

    async fn deactivate(&self, token: &SessionToken) -> Result<bool, Error> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.iter_mut().find(|s| s.token.as_ref() == Some(token) && s.active) {
            Some(session) => {
                session.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn block(&self, id: &SessionId) -> Result<bool, Error> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.iter_mut().find(|s| &s.id == id) {
            Some(session) => {
                session.active = false;
                session.blocked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deactivate_all_for_user(&self, user_id: &UserId) -> Result<u64, Error> {
        let mut count = 0;
        for session in self
            .sessions
            .lock()
            .unwrap()
            .iter_mut()
            .filter(|s| &s.user_id == user_id && s.active)
        {
            session.active = false;
            count += 1;
        }
        Ok(count)
    }

    async fn cleanup_expired(&self) -> Result<u64, Error> {
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|s| !s.is_expired());
        Ok((before - sessions.len()) as u64)
    }
}

#[async_trait]
impl BruteForceProtectionRepository for MockStore {
    async fn record_failed_attempt(
        &self,
        email: &str,
        ip_address: Option<&str>,
    ) -> Result<FailedLoginAttempt, Error> {
        let mut attempts = self.attempts.lock().unwrap();
        let attempt = FailedLoginAttempt {
            id: attempts.len() as i64 + 1,
            email: email.to_string(),
            ip_address: ip_address.map(|s| s.to_string()),
            attempted_at: Utc::now(),
        };
        attempts.push(attempt.clone());
        Ok(attempt)
    }

    async fn get_attempt_stats(
        &self,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<AttemptStats, Error> {
        let attempts = self.attempts.lock().unwrap();
        let matching: Vec<_> = attempts
            .iter()
            .filter(|a| a.email == email && a.attempted_at >= since)
            .collect();
        Ok(AttemptStats {
            count: matching.len() as u32,
            latest_at: matching.iter().map(|a| a.attempted_at).max(),
        })
    }

    async fn get_ip_attempt_stats(
        &self,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> Result<AttemptStats, Error> {
        let attempts = self.attempts.lock().unwrap();
        let matching: Vec<_> = attempts
            .iter()
            .filter(|a| a.ip_address.as_deref() == Some(ip_address) && a.attempted_at >= since)
            .collect();
        Ok(AttemptStats {
            count: matching.len() as u32,
            latest_at: matching.iter().map(|a| a.attempted_at).max(),
        })
    }

    async fn clear_attempts(&self, email: &str) -> Result<u64, Error> {
        let mut attempts = self.attempts.lock().unwrap();
        let before = attempts.len();
        attempts.retain(|a| a.email != email);
        Ok((before - attempts.len()) as u64)
    }

    async fn cleanup_old_attempts(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let blocked: Vec<String> = self
            .blocks
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.is_active())
            .map(|b| b.email.clone())
            .collect();

        let mut attempts = self.attempts.lock().unwrap();
        let len = attempts.len();
        attempts.retain(|a| a.attempted_at >= before || blocked.contains(&a.email));
        let mut removed = (len - attempts.len()) as u64;

        let mut blocks = self.blocks.lock().unwrap();
        let len = blocks.len();
        blocks.retain(|b| b.blocked_until >= before);
        removed += (len - blocks.len()) as u64;
        Ok(removed)
    }

    async fn get_block(&self, email: &str) -> Result<Option<BlockRecord>, Error> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.email == email)
            .cloned())
    }

    async fn upsert_block(&self, block: &BlockRecord) -> Result<(), Error> {
        let mut blocks = self.blocks.lock().unwrap();
        blocks.retain(|b| b.email != block.email);
        blocks.push(block.clone());
        Ok(())
    }

    async fn clear_block(&self, email: &str) -> Result<bool, Error> {
        let mut blocks = self.blocks.lock().unwrap();
        let before = blocks.len();
        blocks.retain(|b| b.email != email);
        Ok(blocks.len() != before)
    }

    async fn set_locked_at(
        &self,
        email: &str,
        locked_at: Option<DateTime<Utc>>,
    ) -> Result<(), Error> {
        if let Some(user) = self
            .users
            .lock()
            .unwrap()
            .iter_mut()
            .find(|u| u.email == email)
        {
            user.locked_at = locked_at;
        }
        Ok(())
    }
}

#[async_trait]
impl TwoFactorRepository for MockStore {
    async fn set_pending_secret(
        &self,
        user_id: &UserId,
        secret: &str,
        recovery_code_hashes: &[String],
    ) -> Result<(), Error> {
        self.with_user(user_id, |u| {
            u.two_factor = TwoFactorState {
                secret: Some(secret.to_string()),
                confirmed_at: None,
                recovery_code_hashes: recovery_code_hashes.to_vec(),
            };
        })
    }

    async fn confirm(&self, user_id: &UserId, confirmed_at: DateTime<Utc>) -> Result<(), Error> {
        self.with_user(user_id, |u| u.two_factor.confirmed_at = Some(confirmed_at))
    }

    async fn disable(&self, user_id: &UserId) -> Result<(), Error> {
        self.with_user(user_id, |u| u.two_factor = TwoFactorState::default())
    }

    async fn replace_recovery_codes(
        &self,
        user_id: &UserId,
        recovery_code_hashes: &[String],
    ) -> Result<(), Error> {
        self.with_user(user_id, |u| {
            u.two_factor.recovery_code_hashes = recovery_code_hashes.to_vec()
        })
    }

    async fn consume_recovery_code(
        &self,
        user_id: &UserId,
        code_hash: &str,
    ) -> Result<bool, Error> {
        self.with_user(user_id, |u| {
            let codes = &mut u.two_factor.recovery_code_hashes;
            let before = codes.len();
            codes.retain(|h| h != code_hash);
            codes.len() != before
        })
    }
}

#[async_trait]
impl AuditRepository for MockStore {
    async fn append(&self, entry: AuditEntry) -> Result<AuditRecord, Error> {
        let mut audit = self.audit.lock().unwrap();
        let record = AuditRecord {
            id: audit.len() as i64 + 1,
            kind: entry.kind,
            email: entry.email,
            user_id: entry.user_id,
            ip_address: entry.ip_address,
            detail: entry.detail,
            created_at: Utc::now(),
        };
        audit.push(record.clone());
        Ok(record)
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<AuditRecord>, Error> {
        Ok(self
            .audit
            .lock()
            .unwrap()
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn list_for_email(&self, email: &str, limit: u32) -> Result<Vec<AuditRecord>, Error> {
        Ok(self
            .audit
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|r| r.email.as_deref() == Some(email))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
