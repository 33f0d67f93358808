use crate::{
    Error, User, UserId,
    error::SessionError,
    repositories::SessionRepository,
    session::{ActiveSession, ClientInfo, SessionId, SessionToken},
    storage::SessionConfig,
    user::Role,
};
use chrono::Utc;
use std::sync::Arc;

/// Service for session management operations
pub struct SessionService<R: SessionRepository> {
    repository: Arc<R>,
    config: SessionConfig,
}

impl<R: SessionRepository> SessionService<R> {
    pub fn new(repository: Arc<R>, config: SessionConfig) -> Self {
        Self { repository, config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Session limit for a user: the per-user override, else the configured default.
    pub fn max_sessions_for(&self, user: &User) -> u32 {
        user.max_sessions
            .unwrap_or(self.config.max_active_sessions)
    }

    /// Fail with `LimitReached` if the user cannot open another session.
    pub async fn check_limit(&self, user: &User) -> Result<(), Error> {
        let max = self.max_sessions_for(user);
        let current = self.repository.count_live(&user.id).await?;
        if current >= max {
            return Err(SessionError::LimitReached { current, max }.into());
        }
        Ok(())
    }

    /// Create a new session for a user logging in as `role`.
    ///
    /// The limit is enforced again at insert time, so a concurrent login that
    /// slipped past [`check_limit`](Self::check_limit) is still refused.
    pub async fn create_session(
        &self,
        user: &User,
        role: Role,
        client: &ClientInfo,
    ) -> Result<ActiveSession, Error> {
        let now = Utc::now();
        let max = self.max_sessions_for(user);
        let session = ActiveSession::builder()
            .user_id(user.id.clone())
            .role(role)
            .ip_address(client.ip_address.clone())
            .user_agent(client.user_agent.clone())
            .device(client.device_label())
            .created_at(now)
            .updated_at(now)
            .expires_at(now + self.config.expires_in)
            .build()?;

        match self.repository.create_within_limit(session, max).await? {
            Some(session) => Ok(session),
            None => {
                let current = self.repository.count_live(&user.id).await?;
                Err(SessionError::LimitReached { current, max }.into())
            }
        }
    }

    /// Resolve a bearer token to a usable session.
    pub async fn get_session(&self, token: &SessionToken) -> Result<ActiveSession, Error> {
        let session = self
            .repository
            .find_by_token(token)
            .await?
            .ok_or(SessionError::NotFound)?;

        if session.blocked {
            return Err(SessionError::Blocked.into());
        }
        if !session.active {
            return Err(SessionError::Inactive.into());
        }
        if session.is_expired() {
            return Err(SessionError::Expired.into());
        }

        Ok(session)
    }

    /// Deactivate the session holding this token.
    pub async fn logout(&self, token: &SessionToken) -> Result<(), Error> {
        if !self.repository.deactivate(token).await? {
            return Err(SessionError::NotFound.into());
        }
        Ok(())
    }

    /// Block a session by id. A blocked session is also inactive and never revives.
    pub async fn block_session(&self, id: &SessionId) -> Result<ActiveSession, Error> {
        if !self.repository.block(id).await? {
            return Err(SessionError::NotFound.into());
        }
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| SessionError::NotFound.into())
    }

    pub async fn list_sessions(&self, user_id: &UserId) -> Result<Vec<ActiveSession>, Error> {
        self.repository.list_by_user(user_id).await
    }

    pub async fn count_live_sessions(&self, user_id: &UserId) -> Result<u32, Error> {
        self.repository.count_live(user_id).await
    }

    /// Deactivate every session of a user
    pub async fn terminate_all(&self, user_id: &UserId) -> Result<u64, Error> {
        self.repository.deactivate_all_for_user(user_id).await
    }

    /// Clean up expired sessions
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, Error> {
        self.repository.cleanup_expired().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock::MockStore;
    use chrono::Duration;

    fn user(max_sessions: Option<u32>) -> User {
        User::builder()
            .email("teacher@example.com".to_string())
            .role(Role::Teacher)
            .max_sessions(max_sessions)
            .build()
            .unwrap()
    }

    fn token(session: &ActiveSession) -> &SessionToken {
        session.token.as_ref().unwrap()
    }

    fn client() -> ClientInfo {
        ClientInfo::new(
            Some("127.0.0.1".to_string()),
            Some("Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0".to_string()),
        )
    }

    #[tokio::test]
    async fn test_create_and_get_session() {
        let service = SessionService::new(Arc::new(MockStore::new()), SessionConfig::default());
        let user = user(None);

        let session = service
            .create_session(&user, Role::Teacher, &client())
            .await
            .unwrap();
        assert_eq!(session.ip_address.as_deref(), Some("127.0.0.1"));
        assert!(session.device.contains("Firefox"));

        let found = service.get_session(token(&session)).await.unwrap();
        assert_eq!(found.id, session.id);
        assert_eq!(found.role, Role::Teacher);
    }

    #[tokio::test]
    async fn test_limit_reached_and_freed_by_logout() {
        let service = SessionService::new(Arc::new(MockStore::new()), SessionConfig::default());
        let user = user(Some(3));

        let mut sessions = Vec::new();
        for _ in 0..3 {
            sessions.push(
                service
                    .create_session(&user, Role::Teacher, &client())
                    .await
                    .unwrap(),
            );
        }

        let err = service
            .create_session(&user, Role::Teacher, &client())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Session(SessionError::LimitReached { current: 3, max: 3 })
        ));
        assert!(service.check_limit(&user).await.is_err());

        service.logout(token(&sessions[0])).await.unwrap();
        service.check_limit(&user).await.unwrap();
        service
            .create_session(&user, Role::Teacher, &client())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_per_user_limit_overrides_default() {
        let service = SessionService::new(
            Arc::new(MockStore::new()),
            SessionConfig::default().with_max_active_sessions(5),
        );
        let user = user(Some(1));
        assert_eq!(service.max_sessions_for(&user), 1);

        service
            .create_session(&user, Role::Teacher, &client())
            .await
            .unwrap();
        assert!(
            service
                .create_session(&user, Role::Teacher, &client())
                .await
                .unwrap_err()
                .is_rate_limit_error()
        );
    }

    #[tokio::test]
    async fn test_blocked_session_is_rejected_and_frees_a_slot() {
        let service = SessionService::new(Arc::new(MockStore::new()), SessionConfig::default());
        let user = user(Some(1));

        let session = service
            .create_session(&user, Role::Teacher, &client())
            .await
            .unwrap();
        let blocked = service.block_session(&session.id).await.unwrap();
        assert!(blocked.blocked);
        assert!(!blocked.active);

        assert!(matches!(
            service.get_session(token(&session)).await.unwrap_err(),
            Error::Session(SessionError::Blocked)
        ));
        assert_eq!(service.count_live_sessions(&user.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_logged_out_session_is_inactive() {
        let service = SessionService::new(Arc::new(MockStore::new()), SessionConfig::default());
        let user = user(None);

        let session = service
            .create_session(&user, Role::Teacher, &client())
            .await
            .unwrap();
        service.logout(token(&session)).await.unwrap();

        assert!(matches!(
            service.get_session(token(&session)).await.unwrap_err(),
            Error::Session(SessionError::Inactive)
        ));
        assert!(service.logout(token(&session)).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_sessions() {
        let service = SessionService::new(
            Arc::new(MockStore::new()),
            SessionConfig::default().with_expires_in(Duration::seconds(-1)),
        );
        let user = user(None);

        let session = service
            .create_session(&user, Role::Teacher, &client())
            .await
            .unwrap();
        assert!(matches!(
            service.get_session(token(&session)).await.unwrap_err(),
            Error::Session(SessionError::Expired)
        ));
        assert_eq!(service.cleanup_expired_sessions().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_terminate_all() {
        let service = SessionService::new(Arc::new(MockStore::new()), SessionConfig::default());
        let user = user(None);

        for _ in 0..2 {
            service
                .create_session(&user, Role::Teacher, &client())
                .await
                .unwrap();
        }

        assert_eq!(service.terminate_all(&user.id).await.unwrap(), 2);
        assert_eq!(service.count_live_sessions(&user.id).await.unwrap(), 0);
        assert_eq!(service.list_sessions(&user.id).await.unwrap().len(), 2);
    }
}
