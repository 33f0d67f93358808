use crate::{
    Error, User, UserId,
    error::AuthError,
    repositories::{PasswordRepository, UserRepository},
    validation::validate_password,
};
use std::sync::{Arc, LazyLock};

/// Hash verified against when the email is unknown, so the response time does
/// not reveal whether an account exists.
static DUMMY_HASH: LazyLock<String> =
    LazyLock::new(|| password_auth::generate_hash("aula-timing-equalizer"));

/// Service for password authentication operations
pub struct PasswordService<U: UserRepository, P: PasswordRepository> {
    user_repository: Arc<U>,
    password_repository: Arc<P>,
}

impl<U: UserRepository, P: PasswordRepository> PasswordService<U, P> {
    pub fn new(user_repository: Arc<U>, password_repository: Arc<P>) -> Self {
        Self {
            user_repository,
            password_repository,
        }
    }

    /// Authenticate a user with email and password
    ///
    /// Unknown emails and wrong passwords both yield `InvalidCredentials`.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User, Error> {
        let Some(user) = self.user_repository.find_by_email(email).await? else {
            let _ = Self::verify_password(password, &DUMMY_HASH);
            return Err(AuthError::InvalidCredentials.into());
        };

        let Some(password_hash) = self.password_repository.get_password_hash(&user.id).await?
        else {
            let _ = Self::verify_password(password, &DUMMY_HASH);
            return Err(AuthError::InvalidCredentials.into());
        };

        if !Self::verify_password(password, &password_hash) {
            return Err(AuthError::InvalidCredentials.into());
        }

        Ok(user)
    }

    /// Set a user's password (admin operation, no old password required)
    pub async fn set_password(&self, user_id: &UserId, password: &str) -> Result<(), Error> {
        validate_password(password)?;

        let password_hash = Self::hash_password(password);
        self.password_repository
            .set_password_hash(user_id, &password_hash)
            .await
    }

    /// Change a user's password
    pub async fn change_password(
        &self,
        user_id: &UserId,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), Error> {
        validate_password(new_password)?;

        let current_hash = self
            .password_repository
            .get_password_hash(user_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !Self::verify_password(old_password, &current_hash) {
            return Err(AuthError::InvalidCredentials.into());
        }

        let new_hash = Self::hash_password(new_password);
        self.password_repository
            .set_password_hash(user_id, &new_hash)
            .await
    }

    pub async fn remove_password(&self, user_id: &UserId) -> Result<(), Error> {
        self.password_repository.remove_password_hash(user_id).await
    }

    fn hash_password(password: &str) -> String {
        password_auth::generate_hash(password)
    }

    fn verify_password(password: &str, hash: &str) -> bool {
        password_auth::verify_password(password, hash).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{services::mock::MockStore, storage::NewUser, user::Role};

    async fn setup() -> (PasswordService<MockStore, MockStore>, User) {
        let store = Arc::new(MockStore::new());
        let user = store
            .create(
                NewUser::builder()
                    .email("teacher@example.com".to_string())
                    .role(Role::Teacher)
                    .build()
                    .unwrap(),
            )
            .await
            .unwrap();
        let service = PasswordService::new(store.clone(), store);
        service
            .set_password(&user.id, "correct horse battery")
            .await
            .unwrap();
        (service, user)
    }

    #[tokio::test]
    async fn test_authenticate() {
        let (service, user) = setup().await;

        let authenticated = service
            .authenticate("teacher@example.com", "correct horse battery")
            .await
            .unwrap();
        assert_eq!(authenticated.id, user.id);
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_email_look_the_same() {
        let (service, _) = setup().await;

        let wrong_password = service
            .authenticate("teacher@example.com", "wrong password")
            .await
            .unwrap_err();
        let unknown_email = service
            .authenticate("nobody@example.com", "correct horse battery")
            .await
            .unwrap_err();

        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
        assert!(wrong_password.is_auth_error());
    }

    #[tokio::test]
    async fn test_set_password_rejects_weak_password() {
        let (service, user) = setup().await;
        assert!(
            service
                .set_password(&user.id, "short")
                .await
                .unwrap_err()
                .is_validation_error()
        );
    }

    #[tokio::test]
    async fn test_change_password() {
        let (service, user) = setup().await;

        assert!(
            service
                .change_password(&user.id, "wrong password", "another long password")
                .await
                .is_err()
        );

        service
            .change_password(&user.id, "correct horse battery", "another long password")
            .await
            .unwrap();
        service
            .authenticate("teacher@example.com", "another long password")
            .await
            .unwrap();
    }
}
