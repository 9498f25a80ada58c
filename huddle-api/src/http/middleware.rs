use axum::{extract::FromRequestParts, http::request::Parts};
use huddle_core::models::{UserId, UserRole};

use super::{AppError, AppState};

/// Authenticated caller, extracted from the `Authorization: Bearer`
/// header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub role: UserRole,
}

/// Same as [`AuthUser`] but requires the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get("Authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::unauthorized("Missing bearer token"))?;

        let claims = state
            .user_service
            .jwt()
            .verify(token)
            .map_err(|e| AppError::unauthorized(e.client_message()))?;

        Ok(Self {
            user_id: claims.user_id(),
            role: claims
                .role()
                .map_err(|e| AppError::unauthorized(e.client_message()))?,
        })
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.role.is_admin() {
            return Err(AppError::forbidden("Admin role required"));
        }
        Ok(Self(user))
    }
}
