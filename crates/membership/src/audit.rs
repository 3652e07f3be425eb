//! Audit trail and idempotency-key ledger
//!
//! The audit log is append-only. Idempotency uses a dedicated table with a
//! primary-key constraint: a key is claimed atomically via
//! `INSERT .. ON CONFLICT DO NOTHING`, so two concurrent schedulers cannot
//! both win the claim.

use sqlx::PgConnection;

use crate::error::ClubResult;

pub async fn add_entry(
    conn: &mut PgConnection,
    action: &str,
    payload: serde_json::Value,
    actor_user_id: Option<i64>,
) -> ClubResult<()> {
    sqlx::query("INSERT INTO audit_log (action, payload, actor_user_id) VALUES ($1, $2, $3)")
        .bind(action)
        .bind(payload)
        .bind(actor_user_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Atomically claim an idempotency key. Returns true when this caller won
/// the claim and may proceed; false when the key was already claimed.
pub async fn claim_key(conn: &mut PgConnection, key: &str) -> ClubResult<bool> {
    let claimed: Option<(String,)> = sqlx::query_as(
        r#"
        INSERT INTO idempotency_keys (key)
        VALUES ($1)
        ON CONFLICT (key) DO NOTHING
        RETURNING key
        "#,
    )
    .bind(key)
    .fetch_optional(conn)
    .await?;
    Ok(claimed.is_some())
}
