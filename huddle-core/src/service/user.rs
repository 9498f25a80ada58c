use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::{
    models::{PublicUser, User, UserId, UserRole, UserStatus},
    repository::UserRepository,
    Error, Result,
};

use super::auth::{hash_password, verify_password, JwtService};

/// Account management: registration, login, admin approval.
#[derive(Clone)]
pub struct UserService {
    user_repository: Arc<UserRepository>,
    jwt: JwtService,
}

impl UserService {
    #[must_use]
    pub const fn new(user_repository: Arc<UserRepository>, jwt: JwtService) -> Self {
        Self {
            user_repository,
            jwt,
        }
    }

    /// Register a new account. The account starts `pending` and cannot
    /// log in until an admin approves it.
    pub async fn register(
        &self,
        username: &str,
        email: Option<&str>,
        password: &str,
    ) -> Result<(PublicUser, String)> {
        if username.trim().is_empty() {
            return Err(Error::InvalidInput("Username is required".to_string()));
        }
        if password.len() < 6 {
            return Err(Error::InvalidInput(
                "Password must be at least 6 characters".to_string(),
            ));
        }

        let password_hash = hash_password(password).await?;

        let user = User {
            id: UserId::new(),
            username: username.trim().to_string(),
            email: email.map(str::to_string),
            password_hash,
            status: UserStatus::Pending,
            role: UserRole::User,
            is_online: false,
            last_seen: None,
            created_at: Utc::now(),
        };

        let created = self.user_repository.create(&user).await?;
        let token = self.jwt.sign(&created.id, created.role)?;

        info!(user_id = %created.id, username = %created.username, "User registered");

        Ok((PublicUser::from(&created), token))
    }

    /// Authenticate and issue a token. Wrong credentials are an
    /// authentication error; a pending or rejected account is an
    /// authorization error.
    pub async fn login(&self, username: &str, password: &str) -> Result<(PublicUser, String)> {
        let user = self
            .user_repository
            .find_by_username(username)
            .await?
            .ok_or_else(|| Error::Authentication("Invalid username or password".to_string()))?;

        if !verify_password(password, &user.password_hash).await? {
            return Err(Error::Authentication(
                "Invalid username or password".to_string(),
            ));
        }

        if !user.status.can_login() {
            return Err(Error::Authorization(format!(
                "Account is {}",
                user.status.as_str()
            )));
        }

        let token = self.jwt.sign(&user.id, user.role)?;
        Ok((PublicUser::from(&user), token))
    }

    pub async fn get(&self, user_id: &UserId) -> Result<User> {
        self.user_repository
            .get(user_id)
            .await?
            .ok_or_else(|| Error::NotFound("User not found".to_string()))
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<PublicUser>> {
        let users = self.user_repository.list(limit, offset).await?;
        Ok(users.iter().map(PublicUser::from).collect())
    }

    pub async fn list_pending(&self) -> Result<Vec<PublicUser>> {
        let users = self.user_repository.list_pending().await?;
        Ok(users.iter().map(PublicUser::from).collect())
    }

    /// Admin status transition (approve / reject).
    pub async fn set_status(&self, user_id: &UserId, status: UserStatus) -> Result<PublicUser> {
        let user = self.user_repository.set_status(user_id, status).await?;
        info!(user_id = %user.id, status = %user.status, "User status changed");
        Ok(PublicUser::from(&user))
    }

    #[must_use]
    pub const fn jwt(&self) -> &JwtService {
        &self.jwt
    }
}
