//! Promo codes and per-user promo application
//!
//! A user carries at most one *effective* promo at a time: the latest
//! applied one wins. Validity is re-checked at price-apply time, not at
//! application time, so a promo whose window elapses silently stops
//! discounting.

use sqlx::PgConnection;
use time::OffsetDateTime;

use crate::error::{ClubError, ClubResult};
use crate::types::{PromoCode, PromoKind, UserPromo};

/// A promo is usable when it is active, inside its optional date window and
/// below its optional use cap.
pub fn is_promo_valid(promo: &PromoCode, now: OffsetDateTime) -> bool {
    if !promo.active {
        return false;
    }
    if let Some(starts_at) = promo.starts_at {
        if now < starts_at {
            return false;
        }
    }
    if let Some(ends_at) = promo.ends_at {
        if now > ends_at {
            return false;
        }
    }
    if let Some(max_uses) = promo.max_uses {
        if promo.used_count >= max_uses {
            return false;
        }
    }
    true
}

/// Discount arithmetic. The result is always within `[0, base_price]`.
pub fn discounted_price(kind: PromoKind, value: i64, base_price: i64) -> i64 {
    match kind {
        PromoKind::Free => 0,
        PromoKind::Percent => (base_price * (100 - value) / 100).max(0),
        PromoKind::Fixed => (base_price - value).max(0),
    }
}

pub async fn get_by_code(conn: &mut PgConnection, code: &str) -> ClubResult<Option<PromoCode>> {
    let promo = sqlx::query_as("SELECT * FROM promo_codes WHERE code = $1")
        .bind(code.to_uppercase())
        .fetch_optional(conn)
        .await?;
    Ok(promo)
}

pub async fn create(
    conn: &mut PgConnection,
    code: &str,
    kind: PromoKind,
    value_int: i64,
    max_uses: Option<i64>,
    starts_at: Option<OffsetDateTime>,
    ends_at: Option<OffsetDateTime>,
) -> ClubResult<PromoCode> {
    if matches!(kind, PromoKind::Percent) && !(0..=100).contains(&value_int) {
        return Err(ClubError::Validation(
            "percent promo value must be in 0..=100".to_string(),
        ));
    }
    if value_int < 0 {
        return Err(ClubError::Validation(
            "promo value must not be negative".to_string(),
        ));
    }
    let promo: PromoCode = sqlx::query_as(
        r#"
        INSERT INTO promo_codes (code, kind, value_int, active, max_uses, starts_at, ends_at)
        VALUES ($1, $2, $3, TRUE, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(code.to_uppercase())
    .bind(kind)
    .bind(value_int)
    .bind(max_uses)
    .bind(starts_at)
    .bind(ends_at)
    .fetch_one(conn)
    .await
    .map_err(|err| {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return ClubError::Validation(format!("promo code {code} already exists"));
            }
        }
        err.into()
    })?;
    Ok(promo)
}

pub async fn disable(conn: &mut PgConnection, code: &str) -> ClubResult<bool> {
    let result = sqlx::query(
        "UPDATE promo_codes SET active = FALSE, updated_at = NOW() WHERE code = $1",
    )
    .bind(code.to_uppercase())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_recent(conn: &mut PgConnection, limit: i64) -> ClubResult<Vec<PromoCode>> {
    let promos = sqlx::query_as("SELECT * FROM promo_codes ORDER BY created_at DESC LIMIT $1")
        .bind(limit)
        .fetch_all(conn)
        .await?;
    Ok(promos)
}

/// Attach a promo to a user. Re-applying the same code refreshes its
/// timestamp; a different code logically supersedes the prior one because
/// only the latest `applied_at` is consulted at pricing time.
pub async fn add_user_promo(conn: &mut PgConnection, user_id: i64, code: &str) -> ClubResult<()> {
    sqlx::query(
        r#"
        INSERT INTO user_promos (user_id, code, applied_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (user_id, code) DO UPDATE SET applied_at = NOW()
        "#,
    )
    .bind(user_id)
    .bind(code.to_uppercase())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn latest_user_promo(
    conn: &mut PgConnection,
    user_id: i64,
) -> ClubResult<Option<UserPromo>> {
    let promo = sqlx::query_as(
        "SELECT * FROM user_promos WHERE user_id = $1 ORDER BY applied_at DESC LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(conn)
    .await?;
    Ok(promo)
}

/// Admin reset: drop every promo the user has applied
pub async fn reset_user_promos(conn: &mut PgConnection, user_id: i64) -> ClubResult<()> {
    sqlx::query("DELETE FROM user_promos WHERE user_id = $1")
        .bind(user_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Apply the user's latest promo to a base price. Returns the base
/// unchanged when no promo is applied or the promo is no longer valid.
pub async fn apply_to_price(
    conn: &mut PgConnection,
    user_id: i64,
    base_price: i64,
    now: OffsetDateTime,
) -> ClubResult<i64> {
    let Some(user_promo) = latest_user_promo(conn, user_id).await? else {
        return Ok(base_price);
    };
    let Some(promo) = get_by_code(conn, &user_promo.code).await? else {
        return Ok(base_price);
    };
    if !is_promo_valid(&promo, now) {
        return Ok(base_price);
    }
    Ok(discounted_price(promo.kind, promo.value_int, base_price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn promo(kind: PromoKind, value: i64) -> PromoCode {
        PromoCode {
            code: "SAVE50".to_string(),
            kind,
            value_int: value,
            active: true,
            max_uses: None,
            used_count: 0,
            starts_at: None,
            ends_at: None,
            created_at: datetime!(2026-01-01 00:00 UTC),
            updated_at: datetime!(2026-01-01 00:00 UTC),
        }
    }

    #[test]
    fn percent_promo_halves_price() {
        assert_eq!(discounted_price(PromoKind::Percent, 50, 2990), 1495);
    }

    #[test]
    fn free_promo_is_exactly_zero() {
        assert_eq!(discounted_price(PromoKind::Free, 0, 2990), 0);
        assert_eq!(discounted_price(PromoKind::Free, 100, 1), 0);
    }

    #[test]
    fn fixed_promo_saturates_at_zero() {
        assert_eq!(discounted_price(PromoKind::Fixed, 500, 2990), 2490);
        assert_eq!(discounted_price(PromoKind::Fixed, 5000, 2990), 0);
    }

    #[test]
    fn result_never_exceeds_base() {
        for kind in [PromoKind::Percent, PromoKind::Fixed, PromoKind::Free] {
            for value in [0, 1, 50, 100, 10_000] {
                let price = discounted_price(kind, value, 2990);
                assert!((0..=2990).contains(&price), "{kind:?} {value} -> {price}");
            }
        }
    }

    #[test]
    fn inactive_promo_is_invalid() {
        let mut p = promo(PromoKind::Percent, 50);
        p.active = false;
        assert!(!is_promo_valid(&p, datetime!(2026-03-01 00:00 UTC)));
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let mut p = promo(PromoKind::Percent, 50);
        p.starts_at = Some(datetime!(2026-03-01 00:00 UTC));
        p.ends_at = Some(datetime!(2026-03-10 00:00 UTC));
        assert!(is_promo_valid(&p, datetime!(2026-03-01 00:00 UTC)));
        assert!(is_promo_valid(&p, datetime!(2026-03-10 00:00 UTC)));
        assert!(!is_promo_valid(&p, datetime!(2026-02-28 23:59 UTC)));
        assert!(!is_promo_valid(&p, datetime!(2026-03-10 00:01 UTC)));
    }

    #[test]
    fn exhausted_promo_is_invalid_and_unbounded_when_cap_absent() {
        let mut p = promo(PromoKind::Percent, 50);
        p.max_uses = Some(10);
        p.used_count = 10;
        assert!(!is_promo_valid(&p, datetime!(2026-03-01 00:00 UTC)));

        p.max_uses = None;
        p.used_count = 1_000_000;
        assert!(is_promo_valid(&p, datetime!(2026-03-01 00:00 UTC)));
    }
}
