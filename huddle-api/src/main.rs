mod http;
mod ws;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use huddle_core::repository::{
    CallRepository, MessageRepository, ReceiptRepository, RoomRepository, UserRepository,
};
use huddle_core::service::{
    CallService, ChatService, JwtService, PresenceService, RecordingController, RoomFanout,
    RoomService, SessionRegistry, SfuServer, UserService,
};
use huddle_core::{logging, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}");
        eprintln!("Using default configuration");
        Config::default()
    });

    logging::init_logging(&config.logging)?;

    info!("Huddle server starting...");
    info!("HTTP address: {}", config.http_address());

    // Database pool + migrations
    let pool: sqlx::PgPool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_seconds))
        .connect(config.database_url())
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {e}");
            anyhow::anyhow!("Database connection failed: {e}")
        })?;
    info!("Database connected");

    sqlx::migrate!("../migrations").run(&pool).await.map_err(|e| {
        error!("Failed to run migrations: {e}");
        anyhow::anyhow!("Migration failed: {e}")
    })?;
    info!("Migrations completed");

    // Repositories
    let user_repository = Arc::new(UserRepository::new(pool.clone()));
    let room_repository = Arc::new(RoomRepository::new(pool.clone()));
    let message_repository = Arc::new(MessageRepository::new(pool.clone()));
    let receipt_repository = Arc::new(ReceiptRepository::new(pool.clone()));
    let call_repository = Arc::new(CallRepository::new(pool));

    // Services
    let jwt = JwtService::new(&config.jwt)?;
    let user_service = Arc::new(UserService::new(Arc::clone(&user_repository), jwt));
    let registry = Arc::new(SessionRegistry::new());
    let presence = Arc::new(PresenceService::new(
        Arc::clone(&registry),
        Arc::clone(&user_repository),
    ));
    let fanout = RoomFanout::new(Arc::clone(&registry), Arc::clone(&room_repository));
    let chat_service = Arc::new(ChatService::new(
        message_repository,
        receipt_repository,
        Arc::clone(&room_repository),
        Arc::clone(&registry),
        fanout,
    ));
    let room_service = Arc::new(RoomService::new(room_repository, user_repository));
    let call_service = Arc::new(CallService::new(call_repository, Arc::clone(&registry)));
    let recording = Arc::new(RecordingController::new(
        config.recording.clone(),
        Arc::clone(&call_service),
    ));
    let sfu = Arc::new(SfuServer::new(&config.media, Arc::clone(&registry), recording).await?);
    info!("SFU ready");

    let state = http::AppState {
        config: Arc::new(config.clone()),
        user_service,
        room_service,
        chat_service,
        call_service,
        presence,
        registry,
        sfu: Arc::clone(&sfu),
    };

    let router = http::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.http_address()).await?;
    info!("Listening on {}", config.http_address());

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(sfu))
        .await?;

    Ok(())
}

/// Wait for ctrl-c, then finalize any in-flight recordings before the
/// process exits.
async fn shutdown_signal(sfu: Arc<SfuServer>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        return;
    }
    info!("Shutting down, stopping active recordings");
    sfu.stop_all_recordings().await;
}
