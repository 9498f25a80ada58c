use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;

use crate::{
    models::{User, UserId, UserRole, UserStatus},
    Error, Result,
};

const USER_COLUMNS: &str =
    "id, username, email, password_hash, status, role, is_online, last_seen, created_at";

/// User repository for database operations
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, user: &User) -> Result<User> {
        let row = sqlx::query(&format!(
            r"
            INSERT INTO users (id, username, email, password_hash, status, role, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            ",
        ))
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.status.as_str())
        .bind(user.role.as_str())
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await?;

        row_to_user(&row)
    }

    pub async fn get(&self, user_id: &UserId) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    /// Approve or reject a pending account.
    pub async fn set_status(&self, user_id: &UserId, status: UserStatus) -> Result<User> {
        let row = sqlx::query(&format!(
            "UPDATE users SET status = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(user_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound("User not found".to_string()))?;

        row_to_user(&row)
    }

    /// Flip the online flag; stamps `last_seen` when going offline.
    pub async fn set_online(&self, user_id: &UserId, is_online: bool) -> Result<()> {
        sqlx::query(
            r"
            UPDATE users
            SET is_online = $2,
                last_seen = CASE WHEN $2 THEN last_seen ELSE $3 END
            WHERE id = $1
            ",
        )
        .bind(user_id)
        .bind(is_online)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {USER_COLUMNS} FROM users
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_user).collect()
    }

    pub async fn list_pending(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {USER_COLUMNS} FROM users
            WHERE status = 'pending'
            ORDER BY created_at ASC
            "
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_user).collect()
    }
}

fn row_to_user(row: &PgRow) -> Result<User> {
    let status: String = row.try_get("status")?;
    let role: String = row.try_get("role")?;

    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        status: UserStatus::from_str(&status).map_err(Error::Internal)?,
        role: UserRole::from_str(&role).map_err(Error::Internal)?,
        is_online: row.try_get("is_online")?,
        last_seen: row.try_get("last_seen")?,
        created_at: row.try_get("created_at")?,
    })
}
