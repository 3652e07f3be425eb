//! User records
//!
//! Users are created on first interaction and never deleted. Profile fields
//! are refreshed on every interaction; the admin flag only latches on.

use sqlx::PgConnection;

use crate::error::ClubResult;
use crate::types::User;

/// Incoming profile data from the chat platform
#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_admin: bool,
}

pub async fn get_or_create(
    conn: &mut PgConnection,
    tg_id: i64,
    profile: &UserProfile,
) -> ClubResult<User> {
    let user: User = sqlx::query_as(
        r#"
        INSERT INTO users (tg_id, username, first_name, last_name, is_admin)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (tg_id) DO UPDATE SET
            username = $2,
            first_name = $3,
            last_name = $4,
            is_admin = users.is_admin OR $5,
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(tg_id)
    .bind(&profile.username)
    .bind(&profile.first_name)
    .bind(&profile.last_name)
    .bind(profile.is_admin)
    .fetch_one(conn)
    .await?;
    Ok(user)
}

/// Latch the admin flag on for the configured operator ids. Run at
/// startup; returns how many rows were promoted. Ids without a user row
/// yet are picked up by `get_or_create` on their first interaction.
pub async fn promote_admins(conn: &mut PgConnection, tg_ids: &[i64]) -> ClubResult<u64> {
    if tg_ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query(
        "UPDATE users SET is_admin = TRUE, updated_at = NOW() WHERE tg_id = ANY($1) AND NOT is_admin",
    )
    .bind(tg_ids)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn get_by_id(conn: &mut PgConnection, user_id: i64) -> ClubResult<Option<User>> {
    let user = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(conn)
        .await?;
    Ok(user)
}

pub async fn get_by_tg_id(conn: &mut PgConnection, tg_id: i64) -> ClubResult<Option<User>> {
    let user = sqlx::query_as("SELECT * FROM users WHERE tg_id = $1")
        .bind(tg_id)
        .fetch_optional(conn)
        .await?;
    Ok(user)
}

pub async fn get_by_username(conn: &mut PgConnection, username: &str) -> ClubResult<Option<User>> {
    let user = sqlx::query_as("SELECT * FROM users WHERE LOWER(username) = LOWER($1)")
        .bind(username.trim_start_matches('@'))
        .fetch_optional(conn)
        .await?;
    Ok(user)
}
