use crate::{
    Error, UserId,
    session::{ActiveSession, SessionId, SessionToken},
};
use async_trait::async_trait;

/// Repository for session data access
#[async_trait]
pub trait SessionRepository: Send + Sync + 'static {
    /// Insert a session unless the user already holds `max_live` live sessions.
    ///
    /// The count and the insert must happen atomically so that concurrent
    /// logins cannot push a user past the limit. Returns `None` when the limit
    /// has been reached and nothing was inserted.
    async fn create_within_limit(
        &self,
        session: ActiveSession,
        max_live: u32,
    ) -> Result<Option<ActiveSession>, Error>;

    /// Find a session by token
    async fn find_by_token(&self, token: &SessionToken) -> Result<Option<ActiveSession>, Error>;

    /// Find a session by id
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<ActiveSession>, Error>;

    /// All sessions of a user, newest first
    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<ActiveSession>, Error>;

    /// Number of sessions that are active, not blocked and not expired
    async fn count_live(&self, user_id: &UserId) -> Result<u32, Error>;

    /// Mark a session inactive. Returns `false` if no active session had this token.
    async fn deactivate(&self, token: &SessionToken) -> Result<bool, Error>;

    /// Mark a session blocked and inactive. Returns `false` if the id is unknown.
    async fn block(&self, id: &SessionId) -> Result<bool, Error>;

    /// Deactivate every session of a user, returning how many were affected
    async fn deactivate_all_for_user(&self, user_id: &UserId) -> Result<u64, Error>;

    /// Delete expired sessions
    async fn cleanup_expired(&self) -> Result<u64, Error>;
}
