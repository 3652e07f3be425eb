//! Payment creation and reconciliation
//!
//! A payment transitions out of `pending` exactly once. Confirmation is
//! reached by two independent paths (provider webhook and the pending-poll
//! sweep) which must converge: the transition itself is a conditional
//! `UPDATE .. WHERE status = 'pending' RETURNING`, so under a double
//! invocation exactly one caller performs the membership grant.

use sqlx::PgConnection;
use time::OffsetDateTime;

use crate::access::{AccessGateway, Notifier};
use crate::audit;
use crate::error::{ClubError, ClubResult};
use crate::flows;
use crate::memberships;
use crate::provider::PaymentProvider;
use crate::settings::EffectiveSettings;
use crate::templates;
use crate::types::{Flow, Payment, PaymentStatus};
use crate::users;

pub async fn get_by_id(conn: &mut PgConnection, payment_id: i64) -> ClubResult<Option<Payment>> {
    let payment = sqlx::query_as("SELECT * FROM payments WHERE id = $1")
        .bind(payment_id)
        .fetch_optional(conn)
        .await?;
    Ok(payment)
}

pub async fn get_by_external_id(
    conn: &mut PgConnection,
    external_id: &str,
) -> ClubResult<Option<Payment>> {
    let payment = sqlx::query_as("SELECT * FROM payments WHERE external_id = $1")
        .bind(external_id)
        .fetch_optional(conn)
        .await?;
    Ok(payment)
}

/// Pending payments that have not passed their provider-side expiry.
pub async fn list_pending(
    conn: &mut PgConnection,
    now: OffsetDateTime,
) -> ClubResult<Vec<Payment>> {
    let payments = sqlx::query_as(
        r#"
        SELECT * FROM payments
        WHERE status = 'pending'
          AND external_id IS NOT NULL
          AND (expires_at IS NULL OR expires_at >= $1)
        "#,
    )
    .bind(now)
    .fetch_all(conn)
    .await?;
    Ok(payments)
}

/// Deterministic provider idempotency key for an internal payment id.
/// Retried checkout-creation calls therefore cannot double-create.
pub fn idempotency_key(payment_id: i64) -> String {
    format!("flowclub:{payment_id}")
}

/// Result of checkout creation
#[derive(Debug, Clone)]
pub struct Checkout {
    pub payment: Payment,
    pub redirect_url: String,
}

/// Create a local pending payment, then the provider checkout. Provider
/// failure is NOT best-effort: the local record is marked failed and the
/// error propagates to the caller.
pub async fn create_checkout(
    conn: &mut PgConnection,
    provider: &dyn PaymentProvider,
    provider_name: &str,
    user_id: i64,
    amount_minor: i64,
    description: &str,
) -> ClubResult<Checkout> {
    if amount_minor <= 0 {
        return Err(ClubError::Validation(
            "checkout amount must be positive".to_string(),
        ));
    }

    let payment: Payment = sqlx::query_as(
        r#"
        INSERT INTO payments (user_id, provider, status, amount_minor, currency)
        VALUES ($1, $2, 'pending', $3, 'RUB')
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(provider_name)
    .bind(amount_minor)
    .fetch_one(&mut *conn)
    .await?;

    let metadata = serde_json::json!({
        "user_id": user_id,
        "internal_payment_id": payment.id,
    });
    let created = match provider
        .create_payment(
            amount_minor,
            description,
            metadata,
            &idempotency_key(payment.id),
        )
        .await
    {
        Ok(created) => created,
        Err(error) => {
            sqlx::query(
                "UPDATE payments SET status = 'failed', updated_at = NOW() WHERE id = $1",
            )
            .bind(payment.id)
            .execute(conn)
            .await?;
            tracing::error!(
                payment_id = payment.id,
                user_id = user_id,
                error = %error,
                "Provider checkout creation failed"
            );
            return Err(error);
        }
    };

    let payment: Payment = sqlx::query_as(
        "UPDATE payments SET external_id = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(payment.id)
    .bind(&created.external_id)
    .fetch_one(conn)
    .await?;

    Ok(Checkout {
        payment,
        redirect_url: created.redirect_url,
    })
}

/// Early-full-intro-payment predicate: the paid amount equals the intro
/// price and a free flow still lies ahead of `paid_at`. Such a purchase is
/// an early-bird full-price buy that bypasses the free tier and credits the
/// next *paid* flow with immediate access.
pub fn is_early_full_payment(
    amount_minor: i64,
    settings: &EffectiveSettings,
    next_free_flow: Option<&Flow>,
    paid_at: OffsetDateTime,
) -> bool {
    if amount_minor != settings.intro_price {
        return false;
    }
    match next_free_flow {
        Some(flow) => paid_at < flow.start_at,
        None => false,
    }
}

/// Pick the flow to credit from the resolution chain: an already-frozen
/// flow id wins, then the early-payment target, then the flow whose sales
/// window contains `paid_at`, then the currently active paid flow.
pub fn pick_target_flow(
    frozen: Option<i64>,
    early: Option<i64>,
    in_sales_window: Option<i64>,
    active_paid: Option<i64>,
) -> Option<i64> {
    frozen.or(early).or(in_sales_window).or(active_paid)
}

async fn resolve_early_flow(
    conn: &mut PgConnection,
    payment: &Payment,
    paid_at: OffsetDateTime,
    settings: &EffectiveSettings,
) -> ClubResult<Option<i64>> {
    let next_free = flows::next_free_flow(conn, paid_at).await?;
    if !is_early_full_payment(payment.amount_minor, settings, next_free.as_ref(), paid_at) {
        return Ok(None);
    }
    Ok(flows::next_paid_flow(conn, paid_at).await?.map(|f| f.id))
}

/// Outcome of a confirmation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed { flow_id: i64, membership_id: i64 },
    /// Already terminal, or another caller won the race. No-op.
    AlreadyProcessed,
    /// No flow could be resolved; parked for manual reconciliation.
    NeedsReview,
}

/// What a confirmation attempt should do, decided before any row is
/// touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmPlan {
    /// The payment already settled; grant nothing, send nothing.
    AlreadyProcessed,
    /// No flow resolved; park the payment.
    NeedsReview,
    Grant {
        flow_id: i64,
        access_start_at: OffsetDateTime,
    },
}

/// Decide what confirming the payment should do. An already-paid payment
/// plans no second grant, whichever path (webhook or poll) asks again.
/// Early full payments unlock access at `paid_at`; regular purchases start
/// with the cohort.
pub fn plan_confirmation(
    payment: &Payment,
    flow: Option<&Flow>,
    early: bool,
    paid_at: OffsetDateTime,
) -> ConfirmPlan {
    if payment.status == PaymentStatus::Paid {
        return ConfirmPlan::AlreadyProcessed;
    }
    match flow {
        None => ConfirmPlan::NeedsReview,
        Some(flow) => ConfirmPlan::Grant {
            flow_id: flow.id,
            access_start_at: if early { paid_at } else { flow.start_at },
        },
    }
}

/// Confirm a provider-verified payment and grant membership.
///
/// Idempotent: re-invocation on an already-paid payment performs no
/// membership mutation and no access-grant call.
pub async fn confirm_payment(
    conn: &mut PgConnection,
    gateway: &dyn AccessGateway,
    notifier: &dyn Notifier,
    payment: &Payment,
    paid_at: OffsetDateTime,
    settings: &EffectiveSettings,
) -> ClubResult<ConfirmOutcome> {
    if payment.status == PaymentStatus::Paid {
        return Ok(ConfirmOutcome::AlreadyProcessed);
    }

    let early_flow_id = resolve_early_flow(conn, payment, paid_at, settings).await?;
    let window_flow_id = flows::flow_in_sales_window(conn, paid_at).await?.map(|f| f.id);
    let active_paid_id = flows::active_paid_flow(conn, paid_at).await?.map(|f| f.id);
    let resolved = pick_target_flow(
        payment.flow_id,
        early_flow_id,
        window_flow_id,
        active_paid_id,
    );
    let flow = match resolved {
        Some(flow_id) => flows::get_by_id(conn, flow_id).await?,
        None => None,
    };

    let (flow, flow_id, access_start_at) =
        match plan_confirmation(payment, flow.as_ref(), early_flow_id.is_some(), paid_at) {
            ConfirmPlan::AlreadyProcessed => return Ok(ConfirmOutcome::AlreadyProcessed),
            ConfirmPlan::NeedsReview => {
                return park_for_review(conn, payment, "no flow resolved for the payment").await;
            }
            ConfirmPlan::Grant {
                flow_id,
                access_start_at,
            } => {
                let Some(flow) = flow else {
                    return park_for_review(conn, payment, "resolved flow does not exist").await;
                };
                (flow, flow_id, access_start_at)
            }
        };

    // Atomic claim: exactly one concurrent confirmation can move the
    // payment out of pending.
    let claimed: Option<(i64,)> = sqlx::query_as(
        r#"
        UPDATE payments
        SET status = 'paid', paid_at = $2, flow_id = $3, updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING id
        "#,
    )
    .bind(payment.id)
    .bind(paid_at)
    .bind(flow_id)
    .fetch_optional(&mut *conn)
    .await?;
    if claimed.is_none() {
        tracing::info!(
            payment_id = payment.id,
            "Payment already processed by a concurrent caller"
        );
        return Ok(ConfirmOutcome::AlreadyProcessed);
    }

    let membership = memberships::upsert_for_flow(
        conn,
        payment.user_id,
        flow_id,
        access_start_at,
        flow.end_at,
        settings.grace_days,
        Some(payment.id),
    )
    .await?;
    memberships::clear_pay_later(conn, membership.id).await?;

    audit::add_entry(
        conn,
        "payment_confirmed",
        serde_json::json!({
            "payment_id": payment.id,
            "flow_id": flow_id,
            "user_id": payment.user_id,
            "amount_minor": payment.amount_minor,
        }),
        None,
    )
    .await?;

    if let Some(user) = users::get_by_id(conn, payment.user_id).await? {
        let links = gateway.grant(user.tg_id).await;
        let mut text = templates::get_text(conn, "payment_confirmed").await?;
        if let Some(link) = &links.channel_invite_link {
            text.push_str(&format!("\nChannel: {link}"));
        }
        if let Some(link) = &links.group_invite_link {
            text.push_str(&format!("\nGroup: {link}"));
        }
        if notifier.send_text(user.tg_id, &text).await.is_failed() {
            tracing::warn!(
                user_id = payment.user_id,
                payment_id = payment.id,
                "Failed to deliver access links after payment"
            );
        }
    }

    tracing::info!(
        payment_id = payment.id,
        flow_id = flow_id,
        membership_id = membership.id,
        "Payment confirmed and membership granted"
    );
    Ok(ConfirmOutcome::Confirmed {
        flow_id,
        membership_id: membership.id,
    })
}

/// Manual admin confirmation with an explicit target flow; used to resolve
/// `needs_review` payments.
pub async fn manual_confirm(
    conn: &mut PgConnection,
    gateway: &dyn AccessGateway,
    notifier: &dyn Notifier,
    payment: &Payment,
    flow_id: i64,
    paid_at: OffsetDateTime,
    settings: &EffectiveSettings,
) -> ClubResult<ConfirmOutcome> {
    let Some(flow) = flows::get_by_id(conn, flow_id).await? else {
        return Err(ClubError::FlowNotFound(flow_id));
    };

    let claimed: Option<(i64,)> = sqlx::query_as(
        r#"
        UPDATE payments
        SET status = 'paid', paid_at = $2, flow_id = $3, updated_at = NOW()
        WHERE id = $1 AND status IN ('pending', 'needs_review')
        RETURNING id
        "#,
    )
    .bind(payment.id)
    .bind(paid_at)
    .bind(flow_id)
    .fetch_optional(&mut *conn)
    .await?;
    if claimed.is_none() {
        return Ok(ConfirmOutcome::AlreadyProcessed);
    }

    let membership = memberships::upsert_for_flow(
        conn,
        payment.user_id,
        flow_id,
        flow.start_at,
        flow.end_at,
        settings.grace_days,
        Some(payment.id),
    )
    .await?;
    memberships::clear_pay_later(conn, membership.id).await?;

    if let Some(user) = users::get_by_id(conn, payment.user_id).await? {
        gateway.grant(user.tg_id).await;
        let text = templates::get_text(conn, "payment_confirmed").await?;
        let _ = notifier.send_text(user.tg_id, &text).await;
    }

    Ok(ConfirmOutcome::Confirmed {
        flow_id,
        membership_id: membership.id,
    })
}

async fn park_for_review(
    conn: &mut PgConnection,
    payment: &Payment,
    reason: &str,
) -> ClubResult<ConfirmOutcome> {
    let parked: Option<(i64,)> = sqlx::query_as(
        r#"
        UPDATE payments
        SET status = 'needs_review', updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING id
        "#,
    )
    .bind(payment.id)
    .fetch_optional(conn)
    .await?;
    if parked.is_none() {
        return Ok(ConfirmOutcome::AlreadyProcessed);
    }
    tracing::error!(
        payment_id = payment.id,
        external_id = ?payment.external_id,
        reason = reason,
        "Payment needs manual review"
    );
    Ok(ConfirmOutcome::NeedsReview)
}

/// Move a pending payment to a terminal failure state reported by the
/// provider. No-op when the payment already left pending.
pub async fn mark_terminal(
    conn: &mut PgConnection,
    payment_id: i64,
    status: PaymentStatus,
) -> ClubResult<bool> {
    debug_assert!(matches!(
        status,
        PaymentStatus::Failed | PaymentStatus::Expired
    ));
    let updated: Option<(i64,)> = sqlx::query_as(
        r#"
        UPDATE payments
        SET status = $2, updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING id
        "#,
    )
    .bind(payment_id)
    .bind(status)
    .fetch_optional(conn)
    .await?;
    Ok(updated.is_some())
}
