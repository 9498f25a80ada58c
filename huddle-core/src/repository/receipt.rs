use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;

use crate::{
    models::{DeliveryStatus, MessageReceipt, RoomId, UserId},
    Error, Result,
};

/// SQL expression ranking a receipt status column, derived from
/// [`DeliveryStatus::rank`] so the ordering lives in one place.
fn rank_case(column: &str) -> String {
    format!(
        "CASE {column} WHEN '{read}' THEN {read_rank} WHEN '{delivered}' THEN {delivered_rank} ELSE {sent_rank} END",
        read = DeliveryStatus::Read.as_str(),
        read_rank = DeliveryStatus::Read.rank(),
        delivered = DeliveryStatus::Delivered.as_str(),
        delivered_rank = DeliveryStatus::Delivered.rank(),
        sent_rank = DeliveryStatus::Sent.rank(),
    )
}

/// Delivery receipt repository.
///
/// All writes are monotonic: a receipt only ever advances along
/// `sent -> delivered -> read`; downgrades are no-ops at the SQL level.
#[derive(Clone)]
pub struct ReceiptRepository {
    pool: PgPool,
}

impl ReceiptRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Seed `sent` rows for every recipient of a freshly persisted message.
    pub async fn seed_sent(&self, message_id: &str, recipients: &[UserId]) -> Result<()> {
        for user_id in recipients {
            sqlx::query(
                r"
                INSERT INTO message_receipts (message_id, user_id, status, updated_at)
                VALUES ($1, $2, 'sent', $3)
                ON CONFLICT (message_id, user_id) DO NOTHING
                ",
            )
            .bind(message_id)
            .bind(user_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Advance a single receipt. Returns whether the row actually moved
    /// forward (a downgrade or repeat leaves it untouched).
    pub async fn advance(
        &self,
        message_id: &str,
        user_id: &UserId,
        status: DeliveryStatus,
    ) -> Result<bool> {
        let sql = format!(
            r"
            INSERT INTO message_receipts (message_id, user_id, status, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (message_id, user_id) DO UPDATE
            SET status = EXCLUDED.status, updated_at = EXCLUDED.updated_at
            WHERE {new_rank} > {old_rank}
            ",
            new_rank = rank_case("excluded.status"),
            old_rank = rank_case("message_receipts.status"),
        );

        let result = sqlx::query(&sql)
            .bind(message_id)
            .bind(user_id)
            .bind(status.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Bulk-advance to `read` every message in a room not authored by the
    /// reader. Missing rows are created directly at `read`.
    pub async fn mark_room_read(&self, room_id: &RoomId, reader: &UserId) -> Result<u64> {
        let sql = format!(
            r"
            INSERT INTO message_receipts (message_id, user_id, status, updated_at)
            SELECT m.id, $2, $3, $4
            FROM messages m
            WHERE m.room_id = $1 AND m.sender_id <> $2
            ON CONFLICT (message_id, user_id) DO UPDATE
            SET status = EXCLUDED.status, updated_at = EXCLUDED.updated_at
            WHERE {new_rank} > {old_rank}
            ",
            new_rank = rank_case("excluded.status"),
            old_rank = rank_case("message_receipts.status"),
        );

        let result = sqlx::query(&sql)
            .bind(room_id)
            .bind(reader)
            .bind(DeliveryStatus::Read.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Every receipt row for the given messages, for aggregation.
    pub async fn list_for_messages(&self, message_ids: &[String]) -> Result<Vec<MessageReceipt>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r"
            SELECT message_id, user_id, status, updated_at
            FROM message_receipts
            WHERE message_id = ANY($1)
            ",
        )
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_receipt).collect()
    }
}

fn row_to_receipt(row: &PgRow) -> Result<MessageReceipt> {
    let status: String = row.try_get("status")?;

    Ok(MessageReceipt {
        message_id: row.try_get("message_id")?,
        user_id: row.try_get("user_id")?,
        status: DeliveryStatus::from_str(&status).map_err(Error::Internal)?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_case_expression() {
        assert_eq!(
            rank_case("r.status"),
            "CASE r.status WHEN 'read' THEN 3 WHEN 'delivered' THEN 2 ELSE 1 END"
        );
    }
}
