use crate::{Error, User, UserId, storage::NewUser};
use async_trait::async_trait;

/// Repository for user data access
#[async_trait]
pub trait UserRepository: Send + Sync + 'static {
    /// Create a new user with its roles
    async fn create(&self, user: NewUser) -> Result<User, Error>;

    /// Find a user by ID, including roles and two-factor state
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, Error>;

    /// Find a user by email, including roles and two-factor state
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, Error>;

    /// Update name, roles and session limit of an existing user
    async fn update(&self, user: &User) -> Result<User, Error>;

    /// Delete a user by ID
    async fn delete(&self, id: &UserId) -> Result<(), Error>;
}
