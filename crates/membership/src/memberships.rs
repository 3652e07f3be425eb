//! Membership state machine
//!
//! One membership per (user, flow). Transitions: grant (upsert to active),
//! revoke, extend, pay-later deferral, expiry. Every transition recomputes
//! `grace_end_at` from the new `access_end_at`, so
//! `access_end_at <= grace_end_at` holds by construction.

use sqlx::PgConnection;
use time::{Duration, OffsetDateTime};

use crate::error::{ClubError, ClubResult};
use crate::flows;
use crate::settings::EffectiveSettings;
use crate::types::{Flow, Membership, MembershipStatus};

pub fn compute_grace_end(access_end: OffsetDateTime, grace_days: i64) -> OffsetDateTime {
    access_end + Duration::days(grace_days)
}

/// Whether a payment at `at` counts as a renewal for this membership.
/// Grace is measured from the membership's own `access_end_at`.
pub fn is_within_grace(membership: &Membership, at: OffsetDateTime, grace_days: i64) -> bool {
    at <= compute_grace_end(membership.access_end_at, grace_days)
}

pub async fn get_active(conn: &mut PgConnection, user_id: i64) -> ClubResult<Option<Membership>> {
    let membership = sqlx::query_as(
        r#"
        SELECT * FROM memberships
        WHERE user_id = $1 AND status = 'active'
        ORDER BY access_end_at DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(conn)
    .await?;
    Ok(membership)
}

pub async fn get_by_flow(
    conn: &mut PgConnection,
    user_id: i64,
    flow_id: i64,
) -> ClubResult<Option<Membership>> {
    let membership = sqlx::query_as("SELECT * FROM memberships WHERE user_id = $1 AND flow_id = $2")
        .bind(user_id)
        .bind(flow_id)
        .fetch_optional(conn)
        .await?;
    Ok(membership)
}

/// Most recently created membership, regardless of status. This is the
/// authoritative record for status queries.
pub async fn get_latest(conn: &mut PgConnection, user_id: i64) -> ClubResult<Option<Membership>> {
    let membership = sqlx::query_as(
        r#"
        SELECT * FROM memberships
        WHERE user_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(conn)
    .await?;
    Ok(membership)
}

/// The expiry rule: access ends when `access_end_at` passes. Grace only
/// softens the price of a renewal; it never keeps a seat open.
pub fn access_has_ended(membership: &Membership, now: OffsetDateTime) -> bool {
    membership.access_end_at < now
}

/// Active memberships whose access window has ended.
pub async fn list_to_expire(
    conn: &mut PgConnection,
    now: OffsetDateTime,
) -> ClubResult<Vec<Membership>> {
    let memberships = sqlx::query_as(
        "SELECT * FROM memberships WHERE status = 'active' AND access_end_at < $1",
    )
    .bind(now)
    .fetch_all(conn)
    .await?;
    Ok(memberships)
}

/// Active memberships whose pay-later deadline has passed. Checked
/// independently of `access_end_at` because the deferral can push the
/// deadline past the access end.
pub async fn list_pay_later_due(
    conn: &mut PgConnection,
    now: OffsetDateTime,
) -> ClubResult<Vec<Membership>> {
    let memberships = sqlx::query_as(
        r#"
        SELECT * FROM memberships
        WHERE status = 'active'
          AND pay_later_deadline_at IS NOT NULL
          AND pay_later_deadline_at <= $1
        "#,
    )
    .bind(now)
    .fetch_all(conn)
    .await?;
    Ok(memberships)
}

/// Active memberships that lapse before a paid flow starts and never used
/// pay-later; evicted on the flow's first day.
pub async fn list_non_renewed_for_flow(
    conn: &mut PgConnection,
    flow: &Flow,
) -> ClubResult<Vec<Membership>> {
    let memberships = sqlx::query_as(
        r#"
        SELECT * FROM memberships
        WHERE status = 'active'
          AND access_end_at < $1
          AND pay_later_used_at IS NULL
        "#,
    )
    .bind(flow.start_at)
    .fetch_all(conn)
    .await?;
    Ok(memberships)
}

/// Grant transition: create or overwrite the (user, flow) membership as
/// active with the given access window. The database uniqueness constraint
/// makes concurrent grants converge on one row.
pub async fn upsert_for_flow(
    conn: &mut PgConnection,
    user_id: i64,
    flow_id: i64,
    access_start_at: OffsetDateTime,
    access_end_at: OffsetDateTime,
    grace_days: i64,
    last_payment_id: Option<i64>,
) -> ClubResult<Membership> {
    let membership: Membership = sqlx::query_as(
        r#"
        INSERT INTO memberships
            (user_id, flow_id, status, access_start_at, access_end_at, grace_end_at,
             last_payment_id)
        VALUES ($1, $2, 'active', $3, $4, $5, $6)
        ON CONFLICT (user_id, flow_id) DO UPDATE SET
            status = 'active',
            access_start_at = $3,
            access_end_at = $4,
            grace_end_at = $5,
            last_payment_id = COALESCE($6, memberships.last_payment_id),
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(flow_id)
    .bind(access_start_at)
    .bind(access_end_at)
    .bind(compute_grace_end(access_end_at, grace_days))
    .bind(last_payment_id)
    .fetch_one(conn)
    .await?;
    Ok(membership)
}

/// Revoke transition: mark expired. The chat-side ban is the caller's
/// best-effort concern.
pub async fn mark_expired(conn: &mut PgConnection, membership_id: i64) -> ClubResult<()> {
    sqlx::query("UPDATE memberships SET status = 'expired', updated_at = NOW() WHERE id = $1")
        .bind(membership_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Admin extension: push `access_end_at` out by `days` and recompute grace.
pub async fn extend_days(
    conn: &mut PgConnection,
    membership_id: i64,
    days: i64,
    grace_days: i64,
) -> ClubResult<Membership> {
    let membership: Option<Membership> = sqlx::query_as(
        r#"
        UPDATE memberships SET
            access_end_at = access_end_at + make_interval(days => $2::int),
            grace_end_at = access_end_at + make_interval(days => $2::int + $3::int),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(membership_id)
    .bind(days)
    .bind(grace_days)
    .fetch_optional(conn)
    .await?;
    membership.ok_or_else(|| ClubError::Validation("no membership to extend".to_string()))
}

/// A successful payment makes any pending deferral moot.
pub async fn clear_pay_later(conn: &mut PgConnection, membership_id: i64) -> ClubResult<()> {
    sqlx::query(
        r#"
        UPDATE memberships SET
            pay_later_used_at = NULL,
            pay_later_deadline_at = NULL,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(membership_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Why a pay-later request was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayLaterRefusal {
    NoMembership,
    NoUpcomingPaidFlow,
    FlowAlreadyStarted,
    /// Access already covers the next flow's start; nothing to defer.
    RenewalNotRequired,
}

impl PayLaterRefusal {
    pub fn reason(&self) -> &'static str {
        match self {
            PayLaterRefusal::NoMembership => "no membership on record",
            PayLaterRefusal::NoUpcomingPaidFlow => "no upcoming paid flow",
            PayLaterRefusal::FlowAlreadyStarted => "the flow has already started",
            PayLaterRefusal::RenewalNotRequired => "renewal is not required",
        }
    }
}

/// Computed effect of a granted deferral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayLaterPlan {
    pub deadline_at: OffsetDateTime,
    pub access_end_at: OffsetDateTime,
    pub grace_end_at: OffsetDateTime,
}

/// Decide a pay-later request. Pure; the idempotence of re-requests falls
/// out of `RenewalNotRequired` once the extended access covers the flow.
pub fn plan_pay_later(
    membership: Option<&Membership>,
    next_paid_flow: Option<&Flow>,
    now: OffsetDateTime,
    settings: &EffectiveSettings,
) -> Result<PayLaterPlan, PayLaterRefusal> {
    let membership = membership.ok_or(PayLaterRefusal::NoMembership)?;
    let flow = next_paid_flow.ok_or(PayLaterRefusal::NoUpcomingPaidFlow)?;
    if now >= flow.start_at {
        return Err(PayLaterRefusal::FlowAlreadyStarted);
    }
    if membership.access_end_at >= flow.start_at {
        return Err(PayLaterRefusal::RenewalNotRequired);
    }

    let deadline_at = flow.start_at + Duration::days(settings.pay_later_max_days);
    Ok(PayLaterPlan {
        deadline_at,
        access_end_at: membership.access_end_at.max(deadline_at),
        grace_end_at: deadline_at + Duration::days(settings.grace_days),
    })
}

/// Apply a pay-later deferral for the user's latest membership.
pub async fn apply_pay_later(
    conn: &mut PgConnection,
    user_id: i64,
    now: OffsetDateTime,
    settings: &EffectiveSettings,
) -> ClubResult<Result<PayLaterPlan, PayLaterRefusal>> {
    let membership = get_latest(conn, user_id).await?;
    let next_flow = flows::next_paid_flow(conn, now).await?;

    let plan = match plan_pay_later(membership.as_ref(), next_flow.as_ref(), now, settings) {
        Ok(plan) => plan,
        Err(refusal) => return Ok(Err(refusal)),
    };
    // plan_pay_later returned Ok, so membership is present
    let membership = membership.ok_or_else(|| {
        ClubError::Validation("membership vanished while planning deferral".to_string())
    })?;

    sqlx::query(
        r#"
        UPDATE memberships SET
            pay_later_used_at = $2,
            pay_later_deadline_at = $3,
            access_end_at = $4,
            grace_end_at = $5,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(membership.id)
    .bind(now)
    .bind(plan.deadline_at)
    .bind(plan.access_end_at)
    .bind(plan.grace_end_at)
    .execute(conn)
    .await?;

    tracing::info!(
        user_id = user_id,
        membership_id = membership.id,
        deadline_at = %plan.deadline_at,
        "Pay-later deferral applied"
    );
    Ok(Ok(plan))
}

/// Why free-flow self-enrollment was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollRefusal {
    NoFreeFlow,
    SalesNotOpen,
    SalesClosed,
    AlreadyEnrolled,
}

/// Self-enrollment into the free flow, gated on its sales window.
pub async fn enroll_in_free_flow(
    conn: &mut PgConnection,
    user_id: i64,
    now: OffsetDateTime,
    settings: &EffectiveSettings,
) -> ClubResult<Result<Membership, EnrollRefusal>> {
    let flow = match flows::active_free_flow(conn, now).await? {
        Some(flow) => Some(flow),
        None => flows::next_free_flow(conn, now).await?,
    };
    let Some(flow) = flow else {
        return Ok(Err(EnrollRefusal::NoFreeFlow));
    };
    if now < flow.sales_open_at {
        return Ok(Err(EnrollRefusal::SalesNotOpen));
    }
    if now > flow.sales_close_at {
        return Ok(Err(EnrollRefusal::SalesClosed));
    }
    if get_by_flow(conn, user_id, flow.id).await?.is_some() {
        return Ok(Err(EnrollRefusal::AlreadyEnrolled));
    }

    let membership = upsert_for_flow(
        conn,
        user_id,
        flow.id,
        flow.start_at,
        flow.end_at,
        settings.grace_days,
        None,
    )
    .await?;
    Ok(Ok(membership))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn settings() -> EffectiveSettings {
        EffectiveSettings {
            intro_price: 2990,
            renewal_price: 1990,
            grace_days: 1,
            pay_later_max_days: 7,
        }
    }

    fn membership(access_end: OffsetDateTime) -> Membership {
        Membership {
            id: 1,
            user_id: 10,
            flow_id: 20,
            status: MembershipStatus::Active,
            access_start_at: access_end - Duration::weeks(5),
            access_end_at: access_end,
            grace_end_at: access_end + Duration::days(1),
            pay_later_used_at: None,
            pay_later_deadline_at: None,
            last_payment_id: None,
            created_at: access_end - Duration::weeks(5),
            updated_at: access_end - Duration::weeks(5),
        }
    }

    fn paid_flow(start_at: OffsetDateTime) -> Flow {
        let (sales_open_at, sales_close_at) = crate::flows::sales_window_for_start(start_at);
        Flow {
            id: 30,
            title: "Paid flow".to_string(),
            start_at,
            end_at: start_at + Duration::weeks(5),
            duration_weeks: 5,
            is_free: false,
            sales_open_at,
            sales_close_at,
            created_at: start_at - Duration::weeks(10),
            updated_at: start_at - Duration::weeks(10),
        }
    }

    #[test]
    fn grace_window_boundary_is_inclusive() {
        let m = membership(datetime!(2026-04-01 00:00 UTC));
        assert!(is_within_grace(&m, datetime!(2026-04-02 00:00 UTC), 1));
        assert!(!is_within_grace(&m, datetime!(2026-04-03 00:00 UTC), 1));
    }

    #[test]
    fn pay_later_deadline_is_flow_start_plus_max_days() {
        let m = membership(datetime!(2026-04-05 00:00 UTC));
        let flow = paid_flow(datetime!(2026-04-10 00:00 UTC));
        let plan = plan_pay_later(
            Some(&m),
            Some(&flow),
            datetime!(2026-04-04 00:00 UTC),
            &settings(),
        )
        .expect("deferral should be granted");
        assert_eq!(plan.deadline_at, datetime!(2026-04-17 00:00 UTC));
        assert_eq!(plan.access_end_at, datetime!(2026-04-17 00:00 UTC));
        assert_eq!(plan.grace_end_at, datetime!(2026-04-18 00:00 UTC));
    }

    #[test]
    fn pay_later_preserves_longer_access() {
        // Access already past the deadline stays untouched.
        let m = membership(datetime!(2026-04-09 00:00 UTC));
        let flow = paid_flow(datetime!(2026-04-10 00:00 UTC));
        let mut s = settings();
        s.pay_later_max_days = 0;
        let err = plan_pay_later(Some(&m), Some(&flow), datetime!(2026-04-08 00:00 UTC), &s);
        // access_end (04-09) < start (04-10): granted, deadline == start
        let plan = err.expect("deferral should be granted");
        assert_eq!(plan.deadline_at, datetime!(2026-04-10 00:00 UTC));
        assert_eq!(plan.access_end_at, datetime!(2026-04-10 00:00 UTC));
    }

    #[test]
    fn pay_later_refused_when_access_covers_next_flow() {
        let m = membership(datetime!(2026-04-12 00:00 UTC));
        let flow = paid_flow(datetime!(2026-04-10 00:00 UTC));
        let refusal = plan_pay_later(
            Some(&m),
            Some(&flow),
            datetime!(2026-04-05 00:00 UTC),
            &settings(),
        )
        .expect_err("should be refused");
        assert_eq!(refusal, PayLaterRefusal::RenewalNotRequired);
    }

    #[test]
    fn pay_later_refused_after_flow_start() {
        let m = membership(datetime!(2026-04-05 00:00 UTC));
        let flow = paid_flow(datetime!(2026-04-10 00:00 UTC));
        let refusal = plan_pay_later(
            Some(&m),
            Some(&flow),
            datetime!(2026-04-10 00:00 UTC),
            &settings(),
        )
        .expect_err("should be refused");
        assert_eq!(refusal, PayLaterRefusal::FlowAlreadyStarted);
    }

    #[test]
    fn pay_later_refused_without_membership_or_flow() {
        let m = membership(datetime!(2026-04-05 00:00 UTC));
        let flow = paid_flow(datetime!(2026-04-10 00:00 UTC));
        let now = datetime!(2026-04-01 00:00 UTC);
        assert_eq!(
            plan_pay_later(None, Some(&flow), now, &settings()),
            Err(PayLaterRefusal::NoMembership)
        );
        assert_eq!(
            plan_pay_later(Some(&m), None, now, &settings()),
            Err(PayLaterRefusal::NoUpcomingPaidFlow)
        );
    }

    #[test]
    fn plan_always_keeps_grace_at_or_after_access_end() {
        let m = membership(datetime!(2026-04-05 00:00 UTC));
        let flow = paid_flow(datetime!(2026-04-10 00:00 UTC));
        for grace in 0..=5 {
            for max_days in 0..=10 {
                let s = EffectiveSettings {
                    grace_days: grace,
                    pay_later_max_days: max_days,
                    ..settings()
                };
                if let Ok(plan) =
                    plan_pay_later(Some(&m), Some(&flow), datetime!(2026-04-01 00:00 UTC), &s)
                {
                    assert!(plan.access_end_at <= plan.grace_end_at);
                }
            }
        }
    }
}
