use async_trait::async_trait;
use aula_core::{
    Error, Role, User, UserId,
    error::{AuthError, StorageError},
    repositories::UserRepository,
    storage::NewUser,
    user::TwoFactorState,
};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::from_timestamp;

#[derive(Debug, Clone, sqlx::FromRow)]
struct SqliteUser {
    id: String,
    email: String,
    name: Option<String>,
    roles: String,
    max_sessions: Option<i64>,
    two_factor_secret: Option<String>,
    two_factor_confirmed_at: Option<i64>,
    locked_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl SqliteUser {
    fn into_user(self, recovery_code_hashes: Vec<String>) -> Result<User, Error> {
        let roles: Vec<Role> = serde_json::from_str(&self.roles).map_err(|e| {
            tracing::error!(user_id = %self.id, error = %e, "Stored roles are not valid");
            StorageError::Database(format!("Invalid roles for user {}", self.id))
        })?;

        let two_factor = TwoFactorState {
            secret: self.two_factor_secret,
            confirmed_at: self
                .two_factor_confirmed_at
                .map(from_timestamp)
                .transpose()?,
            recovery_code_hashes,
        };

        User::builder()
            .id(UserId::new(&self.id))
            .email(self.email)
            .name(self.name)
            .roles(roles)
            .max_sessions(self.max_sessions.and_then(|n| u32::try_from(n).ok()))
            .two_factor(two_factor)
            .locked_at(self.locked_at.map(from_timestamp).transpose()?)
            .created_at(from_timestamp(self.created_at)?)
            .updated_at(from_timestamp(self.updated_at)?)
            .build()
    }
}

fn encode_roles(roles: &[Role]) -> Result<String, Error> {
    serde_json::to_string(roles)
        .map_err(|e| StorageError::Database(format!("Failed to encode roles: {e}")).into())
}

pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn recovery_code_hashes(&self, user_id: &str) -> Result<Vec<String>, Error> {
        sqlx::query_scalar("SELECT code_hash FROM recovery_codes WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to load recovery codes");
                StorageError::Database("Failed to load recovery codes".to_string()).into()
            })
    }

    async fn hydrate(&self, row: Option<SqliteUser>) -> Result<Option<User>, Error> {
        match row {
            Some(row) => {
                let hashes = self.recovery_code_hashes(&row.id).await?;
                Ok(Some(row.into_user(hashes)?))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create(&self, user: NewUser) -> Result<User, Error> {
        let now = Utc::now().timestamp();

        let row = sqlx::query_as::<_, SqliteUser>(
            r#"
            INSERT INTO users (id, email, name, roles, max_sessions, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            RETURNING *
            "#,
        )
        .bind(user.id.as_str())
        .bind(&user.email)
        .bind(&user.name)
        .bind(encode_roles(&user.roles)?)
        .bind(user.max_sessions.map(i64::from))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| -> Error {
            if e
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                return AuthError::UserAlreadyExists.into();
            }
            tracing::error!(error = %e, "Failed to create user");
            StorageError::Database("Failed to create user".to_string()).into()
        })?;

        row.into_user(Vec::new())
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, Error> {
        let row = sqlx::query_as::<_, SqliteUser>("SELECT * FROM users WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to find user by id");
                StorageError::Database("Failed to find user".to_string())
            })?;

        self.hydrate(row).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        let row = sqlx::query_as::<_, SqliteUser>("SELECT * FROM users WHERE email = ?1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to find user by email");
                StorageError::Database("Failed to find user".to_string())
            })?;

        self.hydrate(row).await
    }

    async fn update(&self, user: &User) -> Result<User, Error> {
        let now = Utc::now().timestamp();

        let row = sqlx::query_as::<_, SqliteUser>(
            r#"
            UPDATE users
            SET email = ?2, name = ?3, roles = ?4, max_sessions = ?5, updated_at = ?6
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(user.id.as_str())
        .bind(&user.email)
        .bind(&user.name)
        .bind(encode_roles(&user.roles)?)
        .bind(user.max_sessions.map(i64::from))
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to update user");
            StorageError::Database("Failed to update user".to_string())
        })?;

        self.hydrate(row)
            .await?
            .ok_or_else(|| AuthError::UserNotFound.into())
    }

    async fn delete(&self, id: &UserId) -> Result<(), Error> {
        sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to delete user");
                StorageError::Database("Failed to delete user".to_string())
            })?;

        Ok(())
    }
}
