use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;

use crate::{
    models::{Message, MessageKind, RoomId, UserId},
    Error, Result,
};

/// Chat message repository
#[derive(Clone)]
pub struct MessageRepository {
    pool: PgPool,
}

impl MessageRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, message: &Message) -> Result<Message> {
        let row = sqlx::query(
            r"
            INSERT INTO messages (id, room_id, sender_id, content, kind, file_url, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, room_id, sender_id, content, kind, file_url, created_at, edited_at
            ",
        )
        .bind(&message.id)
        .bind(&message.room_id)
        .bind(&message.sender_id)
        .bind(&message.content)
        .bind(message.kind.as_str())
        .bind(&message.file_url)
        .bind(message.created_at)
        .fetch_one(&self.pool)
        .await?;

        row_to_message(&row)
    }

    pub async fn get(&self, message_id: &str) -> Result<Option<Message>> {
        let row = sqlx::query(
            r"
            SELECT id, room_id, sender_id, content, kind, file_url, created_at, edited_at
            FROM messages
            WHERE id = $1
            ",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_message).transpose()
    }

    /// Update a message's content; only the original sender may edit.
    pub async fn edit(
        &self,
        message_id: &str,
        sender_id: &UserId,
        content: &str,
    ) -> Result<Message> {
        let row = sqlx::query(
            r"
            UPDATE messages
            SET content = $3, edited_at = $4
            WHERE id = $1 AND sender_id = $2
            RETURNING id, room_id, sender_id, content, kind, file_url, created_at, edited_at
            ",
        )
        .bind(message_id)
        .bind(sender_id)
        .bind(content)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound("Message not found or not the sender".to_string()))?;

        row_to_message(&row)
    }

    /// Chat history joined with the sender's username, newest first.
    /// Delivery aggregation happens in the service from the receipt rows.
    pub async fn history(
        &self,
        room_id: &RoomId,
        before: Option<DateTime<Utc>>,
        limit: i32,
    ) -> Result<Vec<(Message, String)>> {
        let limit = limit.clamp(1, 100);

        let rows = sqlx::query(
            r"
            SELECT m.id, m.room_id, m.sender_id, m.content, m.kind, m.file_url,
                   m.created_at, m.edited_at,
                   u.username AS sender_username
            FROM messages m
            JOIN users u ON u.id = m.sender_id
            WHERE m.room_id = $1 AND ($2::timestamptz IS NULL OR m.created_at < $2)
            ORDER BY m.created_at DESC
            LIMIT $3
            ",
        )
        .bind(room_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let message = row_to_message(row)?;
                let sender_username: String = row.try_get("sender_username")?;
                Ok((message, sender_username))
            })
            .collect()
    }

    /// Distinct senders appearing in a room's recent history, used to
    /// notify originators after a bulk read.
    pub async fn recent_senders(&self, room_id: &RoomId, limit: i32) -> Result<Vec<UserId>> {
        let rows = sqlx::query(
            r"
            SELECT DISTINCT sender_id FROM (
                SELECT sender_id FROM messages
                WHERE room_id = $1
                ORDER BY created_at DESC
                LIMIT $2
            ) recent
            ",
        )
        .bind(room_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(row.try_get::<UserId, _>("sender_id")?))
            .collect()
    }
}

fn row_to_message(row: &PgRow) -> Result<Message> {
    let kind: String = row.try_get("kind")?;

    Ok(Message {
        id: row.try_get("id")?,
        room_id: row.try_get("room_id")?,
        sender_id: row.try_get("sender_id")?,
        content: row.try_get("content")?,
        kind: MessageKind::from_str(&kind).map_err(Error::Internal)?,
        file_url: row.try_get("file_url")?,
        created_at: row.try_get("created_at")?,
        edited_at: row.try_get("edited_at")?,
    })
}
