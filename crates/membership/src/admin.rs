//! Admin operations
//!
//! Every mutation an operator can perform is a variant of `AdminAction`,
//! dispatched through one function and written to the audit log with the
//! acting admin's id. The closed enum means there is no admin mutation
//! that can bypass auditing.

use sqlx::PgConnection;
use time::OffsetDateTime;

use crate::access::AccessGateway;
use crate::audit;
use crate::error::{ClubError, ClubResult};
use crate::flows;
use crate::memberships;
use crate::promos;
use crate::settings::SettingsResolver;
use crate::types::{Flow, Membership, PromoKind};
use crate::users;

const EXTENSION_DAYS: i64 = 7;

/// One operator mutation. Audited as a unit.
#[derive(Debug, Clone)]
pub enum AdminAction {
    /// Grant membership in a flow to a user, bypassing payment.
    GrantAccess { user_id: i64, flow_id: i64 },
    /// Expire the user's active membership and ban them from the chats.
    RevokeAccess { user_id: i64 },
    /// Push the user's active membership out by seven days.
    ExtendSevenDays { user_id: i64 },
    /// Clear a stuck pay-later deferral.
    ResetPayLater { user_id: i64 },
    /// Detach all promo codes from a user.
    ResetPromo { user_id: i64 },
    /// Override a business setting (price, grace, pay-later window).
    SetSetting { key: String, value: i64 },
    /// Move a flow's start and end dates; recomputes the sales window.
    EditFlowDates {
        flow_id: i64,
        start_at: OffsetDateTime,
        end_at: OffsetDateTime,
    },
    /// Create the paid flow that follows the current free flow.
    CreateNextPaidFlow,
    CreatePromo {
        code: String,
        kind: PromoKind,
        value_int: i64,
        max_uses: Option<i64>,
        starts_at: Option<OffsetDateTime>,
        ends_at: Option<OffsetDateTime>,
    },
    DisablePromo { code: String },
}

impl AdminAction {
    fn name(&self) -> &'static str {
        match self {
            AdminAction::GrantAccess { .. } => "admin_grant_access",
            AdminAction::RevokeAccess { .. } => "admin_revoke_access",
            AdminAction::ExtendSevenDays { .. } => "admin_extend_seven_days",
            AdminAction::ResetPayLater { .. } => "admin_reset_pay_later",
            AdminAction::ResetPromo { .. } => "admin_reset_promo",
            AdminAction::SetSetting { .. } => "admin_set_setting",
            AdminAction::EditFlowDates { .. } => "admin_edit_flow_dates",
            AdminAction::CreateNextPaidFlow => "admin_create_next_paid_flow",
            AdminAction::CreatePromo { .. } => "admin_create_promo",
            AdminAction::DisablePromo { .. } => "admin_disable_promo",
        }
    }

    fn payload(&self) -> serde_json::Value {
        match self {
            AdminAction::GrantAccess { user_id, flow_id } => {
                serde_json::json!({ "user_id": user_id, "flow_id": flow_id })
            }
            AdminAction::RevokeAccess { user_id }
            | AdminAction::ExtendSevenDays { user_id }
            | AdminAction::ResetPayLater { user_id }
            | AdminAction::ResetPromo { user_id } => serde_json::json!({ "user_id": user_id }),
            AdminAction::SetSetting { key, value } => {
                serde_json::json!({ "key": key, "value": value })
            }
            AdminAction::EditFlowDates {
                flow_id,
                start_at,
                end_at,
            } => serde_json::json!({
                "flow_id": flow_id,
                "start_at": start_at.to_string(),
                "end_at": end_at.to_string(),
            }),
            AdminAction::CreateNextPaidFlow => serde_json::json!({}),
            AdminAction::CreatePromo {
                code,
                kind,
                value_int,
                max_uses,
                ..
            } => serde_json::json!({
                "code": code,
                "kind": kind,
                "value_int": value_int,
                "max_uses": max_uses,
            }),
            AdminAction::DisablePromo { code } => serde_json::json!({ "code": code }),
        }
    }
}

/// What an executed action produced, for the operator's confirmation.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    Membership(Membership),
    Flow(Flow),
    Done,
}

/// Execute one admin action and audit it. The chat-side grant/revoke stays
/// best-effort; the database mutation is the authoritative part.
pub async fn execute(
    conn: &mut PgConnection,
    gateway: &dyn AccessGateway,
    resolver: &SettingsResolver,
    actor_user_id: i64,
    action: AdminAction,
    now: OffsetDateTime,
) -> ClubResult<ActionOutcome> {
    let outcome = match &action {
        AdminAction::GrantAccess { user_id, flow_id } => {
            let flow = flows::get_by_id(conn, *flow_id)
                .await?
                .ok_or(ClubError::FlowNotFound(*flow_id))?;
            let settings = resolver.effective(conn).await?;
            let membership = memberships::upsert_for_flow(
                conn,
                *user_id,
                flow.id,
                flow.start_at.max(now),
                flow.end_at,
                settings.grace_days,
                None,
            )
            .await?;
            if let Some(user) = users::get_by_id(conn, *user_id).await? {
                gateway.grant(user.tg_id).await;
            }
            ActionOutcome::Membership(membership)
        }
        AdminAction::RevokeAccess { user_id } => {
            let membership = memberships::get_active(conn, *user_id)
                .await?
                .ok_or_else(|| {
                    ClubError::Validation("the user has no active membership".to_string())
                })?;
            memberships::mark_expired(conn, membership.id).await?;
            if let Some(user) = users::get_by_id(conn, *user_id).await? {
                gateway.revoke(user.tg_id).await;
            }
            ActionOutcome::Done
        }
        AdminAction::ExtendSevenDays { user_id } => {
            let membership = memberships::get_active(conn, *user_id)
                .await?
                .ok_or_else(|| {
                    ClubError::Validation("the user has no active membership".to_string())
                })?;
            let settings = resolver.effective(conn).await?;
            let membership =
                memberships::extend_days(conn, membership.id, EXTENSION_DAYS, settings.grace_days)
                    .await?;
            ActionOutcome::Membership(membership)
        }
        AdminAction::ResetPayLater { user_id } => {
            let membership = memberships::get_latest(conn, *user_id)
                .await?
                .ok_or_else(|| {
                    ClubError::Validation("the user has no membership on record".to_string())
                })?;
            memberships::clear_pay_later(conn, membership.id).await?;
            ActionOutcome::Done
        }
        AdminAction::ResetPromo { user_id } => {
            promos::reset_user_promos(conn, *user_id).await?;
            ActionOutcome::Done
        }
        AdminAction::SetSetting { key, value } => {
            resolver.set_override(conn, key, *value).await?;
            ActionOutcome::Done
        }
        AdminAction::EditFlowDates {
            flow_id,
            start_at,
            end_at,
        } => {
            let flow = flows::update_dates(conn, *flow_id, *start_at, *end_at).await?;
            ActionOutcome::Flow(flow)
        }
        AdminAction::CreateNextPaidFlow => {
            let flow = flows::create_next_paid_flow(conn, now).await?;
            ActionOutcome::Flow(flow)
        }
        AdminAction::CreatePromo {
            code,
            kind,
            value_int,
            max_uses,
            starts_at,
            ends_at,
        } => {
            promos::create(conn, code, *kind, *value_int, *max_uses, *starts_at, *ends_at).await?;
            ActionOutcome::Done
        }
        AdminAction::DisablePromo { code } => {
            if !promos::disable(conn, code).await? {
                return Err(ClubError::Validation(format!(
                    "no promo code named {code}"
                )));
            }
            ActionOutcome::Done
        }
    };

    audit::add_entry(conn, action.name(), action.payload(), Some(actor_user_id)).await?;
    tracing::info!(
        actor_user_id = actor_user_id,
        action = action.name(),
        "Admin action executed"
    );
    Ok(outcome)
}
