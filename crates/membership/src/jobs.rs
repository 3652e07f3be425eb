//! Scheduled sweeps
//!
//! Each sweep takes the current instant as an argument, so tests can drive
//! any point in time. A failure on one item is logged and the sweep moves
//! on; one broken record must never stall the rest of the queue.

use sqlx::PgPool;
use time::OffsetDateTime;

use crate::access::{AccessGateway, Notifier};
use crate::audit;
use crate::error::ClubResult;
use crate::flows;
use crate::mailings;
use crate::memberships;
use crate::payments;
use crate::provider::{PaymentProvider, ProviderPaymentStatus};
use crate::settings::SettingsResolver;
use crate::types::{Membership, PaymentStatus};
use crate::users;

/// Per-sweep outcome counts, logged at the end of every run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub processed: usize,
    pub failed: usize,
}

impl SweepSummary {
    fn log(&self, sweep: &str) {
        if self.failed > 0 {
            tracing::warn!(
                sweep = sweep,
                processed = self.processed,
                failed = self.failed,
                "Sweep finished with failures"
            );
        } else {
            tracing::info!(sweep = sweep, processed = self.processed, "Sweep finished");
        }
    }
}

async fn expire_one(
    pool: &PgPool,
    gateway: &dyn AccessGateway,
    membership: &Membership,
    action: &str,
) -> ClubResult<()> {
    let mut conn = pool.acquire().await?;
    memberships::mark_expired(&mut conn, membership.id).await?;
    audit::add_entry(
        &mut conn,
        action,
        serde_json::json!({
            "membership_id": membership.id,
            "user_id": membership.user_id,
            "flow_id": membership.flow_id,
        }),
        None,
    )
    .await?;
    if let Some(user) = users::get_by_id(&mut conn, membership.user_id).await? {
        drop(conn);
        gateway.revoke(user.tg_id).await;
    }
    Ok(())
}

/// Expire active memberships whose access window has ended and revoke
/// their chat access.
pub async fn expire_lapsed(
    pool: &PgPool,
    gateway: &dyn AccessGateway,
    now: OffsetDateTime,
) -> ClubResult<SweepSummary> {
    let mut conn = pool.acquire().await?;
    let due = memberships::list_to_expire(&mut conn, now).await?;
    drop(conn);

    let mut summary = SweepSummary::default();
    for membership in due.iter().filter(|m| memberships::access_has_ended(m, now)) {
        match expire_one(pool, gateway, membership, "membership_expired").await {
            Ok(()) => summary.processed += 1,
            Err(error) => {
                summary.failed += 1;
                tracing::error!(
                    membership_id = membership.id,
                    error = %error,
                    "Failed to expire membership"
                );
            }
        }
    }
    summary.log("expire_lapsed");
    Ok(summary)
}

/// Evict members whose pay-later deadline passed without a payment.
pub async fn enforce_pay_later_deadlines(
    pool: &PgPool,
    gateway: &dyn AccessGateway,
    now: OffsetDateTime,
) -> ClubResult<SweepSummary> {
    let mut conn = pool.acquire().await?;
    let due = memberships::list_pay_later_due(&mut conn, now).await?;
    drop(conn);

    let mut summary = SweepSummary::default();
    for membership in &due {
        match expire_one(pool, gateway, membership, "pay_later_deadline_missed").await {
            Ok(()) => summary.processed += 1,
            Err(error) => {
                summary.failed += 1;
                tracing::error!(
                    membership_id = membership.id,
                    error = %error,
                    "Failed to enforce pay-later deadline"
                );
            }
        }
    }
    summary.log("enforce_pay_later_deadlines");
    Ok(summary)
}

/// On the first day of a paid flow, evict members whose access lapsed
/// before the start and who never requested a deferral.
pub async fn evict_non_renewed(
    pool: &PgPool,
    gateway: &dyn AccessGateway,
    now: OffsetDateTime,
) -> ClubResult<SweepSummary> {
    let mut conn = pool.acquire().await?;
    let Some(flow) = flows::active_paid_flow(&mut conn, now).await? else {
        return Ok(SweepSummary::default());
    };
    if flow.start_at.date() != now.date() {
        return Ok(SweepSummary::default());
    }
    let lapsed = memberships::list_non_renewed_for_flow(&mut conn, &flow).await?;
    drop(conn);

    let mut summary = SweepSummary::default();
    for membership in &lapsed {
        match expire_one(pool, gateway, membership, "non_renewed_evicted").await {
            Ok(()) => summary.processed += 1,
            Err(error) => {
                summary.failed += 1;
                tracing::error!(
                    membership_id = membership.id,
                    error = %error,
                    "Failed to evict non-renewed membership"
                );
            }
        }
    }
    summary.log("evict_non_renewed");
    Ok(summary)
}

async fn poll_one_payment(
    pool: &PgPool,
    provider: &dyn PaymentProvider,
    gateway: &dyn AccessGateway,
    notifier: &dyn Notifier,
    resolver: &SettingsResolver,
    payment: &crate::types::Payment,
    now: OffsetDateTime,
) -> ClubResult<bool> {
    let Some(external_id) = payment.external_id.as_deref() else {
        return Ok(false);
    };
    let status = provider.get_payment_status(external_id).await?;
    match status {
        ProviderPaymentStatus::Paid => {
            let mut conn = pool.begin().await?;
            let settings = resolver.effective(&mut conn).await?;
            payments::confirm_payment(&mut conn, gateway, notifier, payment, now, &settings)
                .await?;
            conn.commit().await?;
            Ok(true)
        }
        ProviderPaymentStatus::Failed => {
            let mut conn = pool.acquire().await?;
            payments::mark_terminal(&mut conn, payment.id, PaymentStatus::Failed).await?;
            Ok(true)
        }
        ProviderPaymentStatus::Expired => {
            let mut conn = pool.acquire().await?;
            payments::mark_terminal(&mut conn, payment.id, PaymentStatus::Expired).await?;
            Ok(true)
        }
        ProviderPaymentStatus::Pending => Ok(false),
    }
}

/// Reconcile pending payments against the provider. Safety net for missed
/// webhooks; converges on the same claim as the webhook path.
pub async fn poll_pending_payments(
    pool: &PgPool,
    provider: &dyn PaymentProvider,
    gateway: &dyn AccessGateway,
    notifier: &dyn Notifier,
    resolver: &SettingsResolver,
    now: OffsetDateTime,
) -> ClubResult<SweepSummary> {
    let mut conn = pool.acquire().await?;
    let pending = payments::list_pending(&mut conn, now).await?;
    drop(conn);

    let mut summary = SweepSummary::default();
    for payment in &pending {
        match poll_one_payment(pool, provider, gateway, notifier, resolver, payment, now).await {
            Ok(true) => summary.processed += 1,
            Ok(false) => {}
            Err(error) => {
                summary.failed += 1;
                tracing::error!(
                    payment_id = payment.id,
                    error = %error,
                    "Failed to reconcile pending payment"
                );
            }
        }
    }
    summary.log("poll_pending_payments");
    Ok(summary)
}

/// Pre-start marketing mailings for upcoming paid flows. Skipped entirely
/// when mailings are disabled.
pub async fn send_scheduled_mailings(
    pool: &PgPool,
    notifier: &dyn Notifier,
    resolver: &SettingsResolver,
    now: OffsetDateTime,
) -> ClubResult<SweepSummary> {
    let mut conn = pool.acquire().await?;
    if !resolver.mailings_enabled(&mut conn).await? {
        tracing::debug!("Mailings disabled, skipping scheduled mailings");
        return Ok(SweepSummary::default());
    }
    let sent = mailings::send_flow_start_mailings(&mut conn, notifier, now).await?;
    let summary = SweepSummary {
        processed: sent,
        failed: 0,
    };
    summary.log("send_scheduled_mailings");
    Ok(summary)
}

/// Access-ending reminder mailings for running flows.
pub async fn send_end_mailings(
    pool: &PgPool,
    notifier: &dyn Notifier,
    resolver: &SettingsResolver,
    now: OffsetDateTime,
) -> ClubResult<SweepSummary> {
    let mut conn = pool.acquire().await?;
    if !resolver.mailings_enabled(&mut conn).await? {
        tracing::debug!("Mailings disabled, skipping end mailings");
        return Ok(SweepSummary::default());
    }
    let sent = mailings::send_auto_end_mailings(&mut conn, notifier, now).await?;
    let summary = SweepSummary {
        processed: sent,
        failed: 0,
    };
    summary.log("send_end_mailings");
    Ok(summary)
}
