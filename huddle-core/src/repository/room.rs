use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;

use crate::{
    models::{
        private_pair_key, ParticipantRole, Room, RoomId, RoomKind, RoomParticipant,
        RoomWithParticipants, UserId,
    },
    Error, Result,
};

/// Room and participant repository
#[derive(Clone)]
pub struct RoomRepository {
    pool: PgPool,
}

impl RoomRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get or create the private room for an unordered user pair.
    ///
    /// Returns the room and whether it was created by this call. The
    /// `pair_key` unique constraint makes concurrent calls converge on a
    /// single row.
    pub async fn get_or_create_private(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<(Room, bool)> {
        let pair_key = private_pair_key(a, b);

        let inserted = sqlx::query(
            r"
            INSERT INTO rooms (id, kind, pair_key, created_at)
            VALUES ($1, 'private', $2, $3)
            ON CONFLICT (pair_key) DO NOTHING
            RETURNING id, kind, name, created_at
            ",
        )
        .bind(RoomId::new())
        .bind(&pair_key)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            let room = row_to_room(&row)?;
            for user_id in [a, b] {
                self.add_participant(&room.id, user_id, ParticipantRole::Member)
                    .await?;
            }
            return Ok((room, true));
        }

        let row = sqlx::query("SELECT id, kind, name, created_at FROM rooms WHERE pair_key = $1")
            .bind(&pair_key)
            .fetch_one(&self.pool)
            .await?;

        Ok((row_to_room(&row)?, false))
    }

    pub async fn create_group(
        &self,
        name: &str,
        member_ids: &[UserId],
        created_by: &UserId,
    ) -> Result<Room> {
        let row = sqlx::query(
            r"
            INSERT INTO rooms (id, kind, name, created_at)
            VALUES ($1, 'group', $2, $3)
            RETURNING id, kind, name, created_at
            ",
        )
        .bind(RoomId::new())
        .bind(name)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        let room = row_to_room(&row)?;

        self.add_participant(&room.id, created_by, ParticipantRole::Admin)
            .await?;
        for user_id in member_ids {
            if user_id != created_by {
                self.add_participant(&room.id, user_id, ParticipantRole::Member)
                    .await?;
            }
        }

        Ok(room)
    }

    pub async fn get(&self, room_id: &RoomId) -> Result<Option<Room>> {
        let row = sqlx::query("SELECT id, kind, name, created_at FROM rooms WHERE id = $1")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_room).transpose()
    }

    /// Re-joining a room a user previously left reactivates the row.
    pub async fn add_participant(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        role: ParticipantRole,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO room_participants (room_id, user_id, role, joined_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (room_id, user_id) DO UPDATE
            SET left_at = NULL
            ",
        )
        .bind(room_id)
        .bind(user_id)
        .bind(role.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Active participants of a room (`left_at IS NULL`).
    pub async fn active_participants(&self, room_id: &RoomId) -> Result<Vec<RoomParticipant>> {
        let rows = sqlx::query(
            r"
            SELECT room_id, user_id, role, joined_at, left_at
            FROM room_participants
            WHERE room_id = $1 AND left_at IS NULL
            ",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_participant).collect()
    }

    /// All rooms a user is an active participant of, with their
    /// participant rows.
    pub async fn rooms_for_user(&self, user_id: &UserId) -> Result<Vec<RoomWithParticipants>> {
        let rows = sqlx::query(
            r"
            SELECT r.id, r.kind, r.name, r.created_at
            FROM rooms r
            JOIN room_participants p ON p.room_id = r.id
            WHERE p.user_id = $1 AND p.left_at IS NULL
            ORDER BY r.created_at DESC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut result = Vec::with_capacity(rows.len());
        for row in &rows {
            let room = row_to_room(row)?;
            let participants = self.active_participants(&room.id).await?;
            result.push(RoomWithParticipants { room, participants });
        }

        Ok(result)
    }
}

fn row_to_room(row: &PgRow) -> Result<Room> {
    let kind: String = row.try_get("kind")?;

    Ok(Room {
        id: row.try_get("id")?,
        kind: RoomKind::from_str(&kind).map_err(Error::Internal)?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_participant(row: &PgRow) -> Result<RoomParticipant> {
    let role: String = row.try_get("role")?;

    Ok(RoomParticipant {
        room_id: row.try_get("room_id")?,
        user_id: row.try_get("user_id")?,
        role: ParticipantRole::from_str(&role).map_err(Error::Internal)?,
        joined_at: row.try_get("joined_at")?,
        left_at: row.try_get("left_at")?,
    })
}
