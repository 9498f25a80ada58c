use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;

use crate::{
    models::{Call, CallId, CallParticipant, CallStatus, CallType, RecordingRow, RoomId, UserId},
    Error, Result,
};

const CALL_COLUMNS: &str = "id, room_id, initiator_id, call_type, status, started_at, ended_at";

/// Call lifecycle repository
#[derive(Clone)]
pub struct CallRepository {
    pool: PgPool,
}

impl CallRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a ringing call and its initiating participant.
    pub async fn create(
        &self,
        room_id: &RoomId,
        initiator_id: &UserId,
        call_type: CallType,
    ) -> Result<Call> {
        let row = sqlx::query(&format!(
            r"
            INSERT INTO calls (id, room_id, initiator_id, call_type, status, started_at)
            VALUES ($1, $2, $3, $4, 'ringing', $5)
            RETURNING {CALL_COLUMNS}
            "
        ))
        .bind(CallId::new())
        .bind(room_id)
        .bind(initiator_id)
        .bind(call_type.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        let call = row_to_call(&row)?;
        self.add_participant(&call.id, initiator_id, true).await?;

        Ok(call)
    }

    pub async fn get(&self, call_id: &CallId) -> Result<Option<Call>> {
        let row = sqlx::query(&format!("SELECT {CALL_COLUMNS} FROM calls WHERE id = $1"))
            .bind(call_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_call).transpose()
    }

    /// Conditional status transition; the `WHERE status` guard makes the
    /// update a no-op if another handler moved the call first.
    pub async fn transition(
        &self,
        call_id: &CallId,
        from: CallStatus,
        to: CallStatus,
    ) -> Result<bool> {
        let ended_at = to.is_terminal().then(Utc::now);

        let result = sqlx::query(
            r"
            UPDATE calls
            SET status = $3, ended_at = COALESCE($4, ended_at)
            WHERE id = $1 AND status = $2
            ",
        )
        .bind(call_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(ended_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn add_participant(
        &self,
        call_id: &CallId,
        user_id: &UserId,
        answered: bool,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO call_participants (call_id, user_id, joined_at, answered)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (call_id, user_id) DO UPDATE
            SET answered = call_participants.answered OR EXCLUDED.answered,
                left_at = NULL
            ",
        )
        .bind(call_id)
        .bind(user_id)
        .bind(Utc::now())
        .bind(answered)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn participants(&self, call_id: &CallId) -> Result<Vec<CallParticipant>> {
        let rows = sqlx::query(
            r"
            SELECT call_id, user_id, joined_at, left_at, answered
            FROM call_participants
            WHERE call_id = $1
            ",
        )
        .bind(call_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(CallParticipant {
                    call_id: row.try_get("call_id")?,
                    user_id: row.try_get("user_id")?,
                    joined_at: row.try_get("joined_at")?,
                    left_at: row.try_get("left_at")?,
                    answered: row.try_get("answered")?,
                })
            })
            .collect()
    }

    pub async fn history_by_room(
        &self,
        room_id: &RoomId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Call>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {CALL_COLUMNS} FROM calls
            WHERE room_id = $1
            ORDER BY started_at DESC
            LIMIT $2 OFFSET $3
            "
        ))
        .bind(room_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_call).collect()
    }

    /// Persist finished recording artifact metadata.
    pub async fn insert_recording(&self, recording: &RecordingRow) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO recordings
                (id, call_id, room_id, file_path, has_video, started_at, duration_seconds)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(&recording.id)
        .bind(&recording.call_id)
        .bind(&recording.room_id)
        .bind(&recording.file_path)
        .bind(recording.has_video)
        .bind(recording.started_at)
        .bind(recording.duration_seconds)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn recordings_by_call(&self, call_id: &CallId) -> Result<Vec<RecordingRow>> {
        let rows = sqlx::query(
            r"
            SELECT id, call_id, room_id, file_path, has_video, started_at, duration_seconds
            FROM recordings
            WHERE call_id = $1
            ORDER BY started_at DESC
            ",
        )
        .bind(call_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(RecordingRow {
                    id: row.try_get("id")?,
                    call_id: row.try_get("call_id")?,
                    room_id: row.try_get("room_id")?,
                    file_path: row.try_get("file_path")?,
                    has_video: row.try_get("has_video")?,
                    started_at: row.try_get("started_at")?,
                    duration_seconds: row.try_get("duration_seconds")?,
                })
            })
            .collect()
    }
}

fn row_to_call(row: &PgRow) -> Result<Call> {
    let call_type: String = row.try_get("call_type")?;
    let status: String = row.try_get("status")?;

    Ok(Call {
        id: row.try_get("id")?,
        room_id: row.try_get("room_id")?,
        initiator_id: row.try_get("initiator_id")?,
        call_type: CallType::from_str(&call_type).map_err(Error::Internal)?,
        status: CallStatus::from_str(&status).map_err(Error::Internal)?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
    })
}
