//! Persisted row types and status enums

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Membership lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    Expired,
    /// Reserved; no current flow cancels memberships.
    Canceled,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Active => "active",
            MembershipStatus::Expired => "expired",
            MembershipStatus::Canceled => "canceled",
        }
    }
}

/// Payment lifecycle status. `pending` transitions exactly once to one of
/// the terminal states; `paid` is never revoked by this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Expired,
    /// Automatic reconciliation could not determine which flow to credit.
    /// Requires manual admin resolution; money is never dropped silently.
    NeedsReview,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Expired => "expired",
            PaymentStatus::NeedsReview => "needs_review",
        }
    }

    /// Terminal payments are never reprocessed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

/// Discount kind for promo codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PromoKind {
    Percent,
    Fixed,
    Free,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub tg_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_admin: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A time-boxed enrollment cohort with its own access and sales windows
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Flow {
    pub id: i64,
    pub title: String,
    pub start_at: OffsetDateTime,
    pub end_at: OffsetDateTime,
    pub duration_weeks: i64,
    pub is_free: bool,
    pub sales_open_at: OffsetDateTime,
    pub sales_close_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Access record for one (user, flow) pair.
///
/// Invariant after every transition: `access_end_at <= grace_end_at`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Membership {
    pub id: i64,
    pub user_id: i64,
    pub flow_id: i64,
    pub status: MembershipStatus,
    pub access_start_at: OffsetDateTime,
    pub access_end_at: OffsetDateTime,
    pub grace_end_at: OffsetDateTime,
    pub pay_later_used_at: Option<OffsetDateTime>,
    pub pay_later_deadline_at: Option<OffsetDateTime>,
    pub last_payment_id: Option<i64>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Payment {
    pub id: i64,
    pub user_id: i64,
    /// Null until reconciliation resolves which flow the payment credits.
    pub flow_id: Option<i64>,
    pub provider: String,
    /// Null until the provider acknowledges checkout creation.
    pub external_id: Option<String>,
    pub status: PaymentStatus,
    pub amount_minor: i64,
    pub currency: String,
    pub paid_at: Option<OffsetDateTime>,
    pub expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PromoCode {
    pub code: String,
    pub kind: PromoKind,
    pub value_int: i64,
    pub active: bool,
    pub max_uses: Option<i64>,
    pub used_count: i64,
    pub starts_at: Option<OffsetDateTime>,
    pub ends_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserPromo {
    pub user_id: i64,
    pub code: String,
    pub applied_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageTemplate {
    pub id: i64,
    pub key: String,
    pub text: String,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub actor_user_id: Option<i64>,
    pub action: String,
    pub payload: serde_json::Value,
    pub created_at: OffsetDateTime,
}
