// HTTP/JSON REST surface: auth, admin, uploads, health, and the
// WebSocket upgrade endpoint.

pub mod admin;
pub mod auth;
pub mod error;
pub mod middleware;
pub mod upload;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use huddle_core::service::{
    CallService, ChatService, PresenceService, RoomService, SessionRegistry, SfuServer,
    UserService,
};
use huddle_core::Config;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub user_service: Arc<UserService>,
    pub room_service: Arc<RoomService>,
    pub chat_service: Arc<ChatService>,
    pub call_service: Arc<CallService>,
    pub presence: Arc<PresenceService>,
    pub registry: Arc<SessionRegistry>,
    pub sfu: Arc<SfuServer>,
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let upload_limit = state.config.upload.max_bytes;
    let uploads_dir = state.config.upload.dir.clone();

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Authentication routes
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        // Admin routes
        .route("/api/admin/users", get(admin::list_users))
        .route("/api/admin/users/pending", get(admin::list_pending))
        .route("/api/admin/users/:id/approve", post(admin::approve_user))
        .route("/api/admin/users/:id/reject", post(admin::reject_user))
        // Chat attachment upload + static serving
        .route(
            "/api/upload",
            post(upload::upload).layer(DefaultBodyLimit::max(upload_limit + 64 * 1024)),
        )
        .nest_service("/uploads", ServeDir::new(uploads_dir))
        // Real-time socket
        .route("/ws", get(crate::ws::ws_handler))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
