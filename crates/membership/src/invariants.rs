//! Membership Invariants Module
//!
//! Provides runnable consistency checks for the membership system.
//! These invariants can be run after any reconciliation sweep or webhook
//! replay to ensure the system is in a valid state.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::ClubResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Affected row ids
    pub ids: Vec<i64>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - members may have wrong access or money may be lost
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct GraceRow {
    id: i64,
    user_id: i64,
    access_end_at: OffsetDateTime,
    grace_end_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct UnresolvedPaidRow {
    id: i64,
    user_id: i64,
    flow_id: Option<i64>,
    paid_at: Option<OffsetDateTime>,
}

#[derive(Debug, sqlx::FromRow)]
struct FlowWindowRow {
    id: i64,
    title: String,
}

#[derive(Debug, sqlx::FromRow)]
struct HalfDeferralRow {
    id: i64,
    user_id: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct OverusedPromoRow {
    code: String,
    used_count: i64,
    max_uses: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct StuckCheckoutRow {
    id: i64,
    user_id: i64,
    created_at: OffsetDateTime,
}

/// Service for running membership invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> ClubResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_grace_covers_access().await?);
        violations.extend(self.check_paid_payments_resolved().await?);
        violations.extend(self.check_flow_windows_ordered().await?);
        violations.extend(self.check_deferral_fields_paired().await?);
        violations.extend(self.check_promo_usage_within_cap().await?);
        violations.extend(self.check_no_stuck_checkouts().await?);

        let checks_run = 6;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: Grace never ends before access
    ///
    /// `grace_end_at` is always recomputed from `access_end_at`; a row where
    /// grace precedes access end means a transition skipped the recompute.
    async fn check_grace_covers_access(&self) -> ClubResult<Vec<InvariantViolation>> {
        let rows: Vec<GraceRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, access_end_at, grace_end_at
            FROM memberships
            WHERE grace_end_at < access_end_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "grace_covers_access".to_string(),
                ids: vec![row.id],
                description: format!(
                    "Membership {} has grace_end_at before access_end_at",
                    row.id
                ),
                context: serde_json::json!({
                    "user_id": row.user_id,
                    "access_end_at": row.access_end_at.to_string(),
                    "grace_end_at": row.grace_end_at.to_string(),
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: Paid payments are fully resolved
    ///
    /// A paid payment without a flow or a paid_at timestamp means the
    /// confirmation claim succeeded but the resolution did not stick.
    async fn check_paid_payments_resolved(&self) -> ClubResult<Vec<InvariantViolation>> {
        let rows: Vec<UnresolvedPaidRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, flow_id, paid_at
            FROM payments
            WHERE status = 'paid' AND (flow_id IS NULL OR paid_at IS NULL)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "paid_payments_resolved".to_string(),
                ids: vec![row.id],
                description: format!("Paid payment {} lacks a flow or paid_at", row.id),
                context: serde_json::json!({
                    "user_id": row.user_id,
                    "flow_id": row.flow_id,
                    "paid_at": row.paid_at.map(|t| t.to_string()),
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 3: Flow windows are ordered
    ///
    /// Sales open before start, close after start, and end strictly after
    /// start. Broken ordering makes a flow unsellable or never-ending.
    async fn check_flow_windows_ordered(&self) -> ClubResult<Vec<InvariantViolation>> {
        let rows: Vec<FlowWindowRow> = sqlx::query_as(
            r#"
            SELECT id, title
            FROM flows
            WHERE end_at <= start_at
               OR sales_open_at > start_at
               OR sales_close_at < start_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "flow_windows_ordered".to_string(),
                ids: vec![row.id],
                description: format!("Flow {} ({}) has disordered dates", row.id, row.title),
                context: serde_json::json!({ "title": row.title }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: Deferral fields come in pairs
    ///
    /// `pay_later_used_at` and `pay_later_deadline_at` are set and cleared
    /// together; a half-set pair breaks the eviction sweeps.
    async fn check_deferral_fields_paired(&self) -> ClubResult<Vec<InvariantViolation>> {
        let rows: Vec<HalfDeferralRow> = sqlx::query_as(
            r#"
            SELECT id, user_id
            FROM memberships
            WHERE (pay_later_used_at IS NULL) <> (pay_later_deadline_at IS NULL)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "deferral_fields_paired".to_string(),
                ids: vec![row.id],
                description: format!("Membership {} has a half-set deferral", row.id),
                context: serde_json::json!({ "user_id": row.user_id }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 5: Promo usage stays within its cap
    async fn check_promo_usage_within_cap(&self) -> ClubResult<Vec<InvariantViolation>> {
        let rows: Vec<OverusedPromoRow> = sqlx::query_as(
            r#"
            SELECT code, used_count, max_uses
            FROM promo_codes
            WHERE max_uses IS NOT NULL AND used_count > max_uses
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "promo_usage_within_cap".to_string(),
                ids: Vec::new(),
                description: format!(
                    "Promo {} used {} times with a cap of {}",
                    row.code, row.used_count, row.max_uses
                ),
                context: serde_json::json!({
                    "code": row.code,
                    "used_count": row.used_count,
                    "max_uses": row.max_uses,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 6: No checkout stuck without a provider id
    ///
    /// A pending payment older than a day with no external id means the
    /// provider call failed but the local row was not marked failed.
    async fn check_no_stuck_checkouts(&self) -> ClubResult<Vec<InvariantViolation>> {
        let rows: Vec<StuckCheckoutRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, created_at
            FROM payments
            WHERE status = 'pending'
              AND external_id IS NULL
              AND created_at < NOW() - INTERVAL '1 day'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "no_stuck_checkouts".to_string(),
                ids: vec![row.id],
                description: format!("Payment {} has no provider id after a day", row.id),
                context: serde_json::json!({
                    "user_id": row.user_id,
                    "created_at": row.created_at.to_string(),
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }
}
