use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use huddle_core::models::PublicUser;

use super::{AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: Option<String>,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: PublicUser,
    pub token: String,
}

/// Register a new account. It starts pending until an admin approves it.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Json<AuthResponse>> {
    let (user, token) = state
        .user_service
        .register(&req.username, req.email.as_deref(), &req.password)
        .await?;

    Ok(Json(AuthResponse { user, token }))
}

/// Login with username and password.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let (user, token) = state.user_service.login(&req.username, &req.password).await?;

    Ok(Json(AuthResponse { user, token }))
}
