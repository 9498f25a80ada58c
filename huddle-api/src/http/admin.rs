use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use huddle_core::models::{PublicUser, UserId, UserStatus};

use super::{middleware::AdminUser, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

const fn default_limit() -> i64 {
    50
}

/// Paginated user listing.
pub async fn list_users(
    _admin: AdminUser,
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Vec<PublicUser>>> {
    let users = state
        .user_service
        .list(page.limit.clamp(1, 200), page.offset.max(0))
        .await?;
    Ok(Json(users))
}

/// Accounts waiting for approval.
pub async fn list_pending(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<PublicUser>>> {
    let users = state.user_service.list_pending().await?;
    Ok(Json(users))
}

pub async fn approve_user(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<PublicUser>> {
    let user = state
        .user_service
        .set_status(&UserId::from(user_id), UserStatus::Active)
        .await?;
    Ok(Json(user))
}

pub async fn reject_user(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<PublicUser>> {
    let user = state
        .user_service
        .set_status(&UserId::from(user_id), UserStatus::Rejected)
        .await?;
    Ok(Json(user))
}
