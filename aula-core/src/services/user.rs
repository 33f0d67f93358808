use crate::{
    Error, User, UserId,
    error::{AuthError, ValidationError},
    repositories::UserRepository,
    storage::NewUser,
    user::Role,
    validation::{validate_email, validate_name},
};
use std::sync::Arc;

/// Service for user management operations
pub struct UserService<R: UserRepository> {
    repository: Arc<R>,
}

impl<R: UserRepository> UserService<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Create a new user holding `roles`. At least one role is required.
    pub async fn create_user(
        &self,
        email: &str,
        name: Option<String>,
        roles: Vec<Role>,
        max_sessions: Option<u32>,
    ) -> Result<User, Error> {
        validate_email(email)?;
        validate_name(name.as_deref())?;
        if roles.is_empty() {
            return Err(ValidationError::MissingField("At least one role is required".to_string()).into());
        }

        if self.repository.find_by_email(email).await?.is_some() {
            return Err(AuthError::UserAlreadyExists.into());
        }

        let mut builder = NewUser::builder()
            .id(UserId::new_random())
            .email(email.to_string())
            .roles(roles);
        if let Some(name) = name {
            builder = builder.name(name);
        }
        if let Some(max_sessions) = max_sessions {
            builder = builder.max_sessions(max_sessions);
        }

        self.repository.create(builder.build()?).await
    }

    pub async fn get_user(&self, user_id: &UserId) -> Result<Option<User>, Error> {
        self.repository.find_by_id(user_id).await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        self.repository.find_by_email(email).await
    }

    /// Replace the roles of a user
    pub async fn set_roles(&self, user_id: &UserId, roles: Vec<Role>) -> Result<User, Error> {
        if roles.is_empty() {
            return Err(ValidationError::MissingField("At least one role is required".to_string()).into());
        }
        let mut user = self.require_user(user_id).await?;
        user.roles = roles;
        self.repository.update(&user).await
    }

    /// Set or clear the per-user concurrent session limit
    pub async fn set_max_sessions(
        &self,
        user_id: &UserId,
        max_sessions: Option<u32>,
    ) -> Result<User, Error> {
        let mut user = self.require_user(user_id).await?;
        user.max_sessions = max_sessions;
        self.repository.update(&user).await
    }

    pub async fn update_user(&self, user: &User) -> Result<User, Error> {
        self.repository.update(user).await
    }

    pub async fn delete_user(&self, user_id: &UserId) -> Result<(), Error> {
        self.repository.delete(user_id).await
    }

    async fn require_user(&self, user_id: &UserId) -> Result<User, Error> {
        self.repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::UserNotFound.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock::MockStore;

    #[tokio::test]
    async fn test_create_user_with_roles() {
        let service = UserService::new(Arc::new(MockStore::new()));

        let user = service
            .create_user(
                "teacher@example.com",
                Some("Ada".to_string()),
                vec![Role::Teacher, Role::Admin],
                Some(2),
            )
            .await
            .unwrap();

        assert!(user.has_role(Role::Teacher));
        assert!(user.has_role(Role::Admin));
        assert_eq!(user.max_sessions, Some(2));
    }

    #[tokio::test]
    async fn test_create_user_rejects_duplicates_and_bad_input() {
        let service = UserService::new(Arc::new(MockStore::new()));

        service
            .create_user("a@example.com", None, vec![Role::Student], None)
            .await
            .unwrap();

        assert!(matches!(
            service
                .create_user("a@example.com", None, vec![Role::Student], None)
                .await
                .unwrap_err(),
            Error::Auth(AuthError::UserAlreadyExists)
        ));
        assert!(
            service
                .create_user("not-an-email", None, vec![Role::Student], None)
                .await
                .unwrap_err()
                .is_validation_error()
        );
        assert!(
            service
                .create_user("b@example.com", None, vec![], None)
                .await
                .unwrap_err()
                .is_validation_error()
        );
    }

    #[tokio::test]
    async fn test_set_roles_and_limit() {
        let service = UserService::new(Arc::new(MockStore::new()));
        let user = service
            .create_user("a@example.com", None, vec![Role::Student], None)
            .await
            .unwrap();

        let user = service
            .set_roles(&user.id, vec![Role::Developer])
            .await
            .unwrap();
        assert_eq!(user.roles, vec![Role::Developer]);

        let user = service.set_max_sessions(&user.id, Some(1)).await.unwrap();
        assert_eq!(user.max_sessions, Some(1));

        assert!(
            service
                .set_max_sessions(&UserId::new_random(), None)
                .await
                .is_err()
        );
    }
}
