use axum::{
    extract::{Multipart, State},
    Json,
};
use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use huddle_core::models::{MessageKind, RoomId, UserId};

use super::{AppError, AppResult, AppState};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// Multipart chat attachment upload. Stores the blob under the uploads
/// directory and emits a chat message pointing at it.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut room_id: Option<RoomId> = None;
    let mut sender_id: Option<UserId> = None;
    let mut sender_username: Option<String> = None;
    let mut message_type: Option<MessageKind> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("Malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                let filename = field
                    .file_name()
                    .unwrap_or("upload.bin")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::bad_request(format!("Failed to read file: {e}")))?;
                if bytes.len() > state.config.upload.max_bytes {
                    return Err(AppError::payload_too_large("File exceeds upload limit"));
                }
                file = Some((filename, bytes.to_vec()));
            }
            "roomId" => room_id = Some(RoomId::from(read_text(field).await?)),
            "senderId" => sender_id = Some(UserId::from(read_text(field).await?)),
            "senderUsername" => sender_username = Some(read_text(field).await?),
            "messageType" => {
                let raw = read_text(field).await?;
                message_type = Some(
                    MessageKind::from_str(&raw)
                        .map_err(AppError::bad_request)?,
                );
            }
            _ => {}
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| AppError::bad_request("Missing file field"))?;
    let room_id = room_id.ok_or_else(|| AppError::bad_request("Missing roomId field"))?;
    let sender_id = sender_id.ok_or_else(|| AppError::bad_request("Missing senderId field"))?;

    // Reject before the blob hits disk.
    state.room_service.get_room(&room_id).await?;

    let extension = Path::new(&filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("bin")
        .to_ascii_lowercase();

    let kind = message_type.unwrap_or_else(|| {
        if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            MessageKind::Image
        } else {
            MessageKind::File
        }
    });

    let stored_name = format!(
        "{}-{}.{}",
        Utc::now().timestamp_millis(),
        rand::thread_rng().gen_range(0..1_000_000_000u32),
        extension
    );

    tokio::fs::create_dir_all(&state.config.upload.dir)
        .await
        .map_err(huddle_core::Error::from)?;
    let stored_path = Path::new(&state.config.upload.dir).join(&stored_name);
    tokio::fs::write(&stored_path, &bytes)
        .await
        .map_err(huddle_core::Error::from)?;

    info!(
        path = %stored_path.display(),
        bytes = bytes.len(),
        room_id = %room_id,
        "Upload stored"
    );

    let sender_username = match sender_username {
        Some(name) => name,
        None => state.user_service.get(&sender_id).await?.username,
    };

    let payload = state
        .chat_service
        .send_message(
            room_id,
            sender_id,
            sender_username,
            Some(filename),
            kind,
            Some(format!("/uploads/{stored_name}")),
            false,
        )
        .await?;

    Ok(Json(json!({ "success": true, "message": payload })))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|e| AppError::bad_request(format!("Malformed multipart field: {e}")))
}
