//! Bulk mailings with delivery pacing and send-once keys
//!
//! A mailing is a text blast to a recipient set. Sends are paced with a
//! fixed inter-message delay to stay under chat-platform rate limits, and
//! per-recipient failures are counted, never propagated. Automatic
//! mailings carry an idempotency key so an overlapping or restarted sweep
//! cannot send the same blast twice.

use sqlx::PgConnection;
use time::{Duration, OffsetDateTime};

use crate::access::Notifier;
use crate::audit;
use crate::error::ClubResult;
use crate::templates;
use crate::types::Flow;

/// Inter-message pause during a bulk send.
const SEND_DELAY_MS: u64 = 50;

/// Delivery counts for one bulk send
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Who a manual mailing goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Active,
    Former,
    FlowActive(i64),
}

/// Idempotency key for an automatic mailing: one send per template per
/// flow per calendar day.
pub fn auto_key(template_key: &str, flow_id: i64, date: time::Date) -> String {
    format!("auto:{template_key}:{flow_id}:{date}")
}

/// Templates for the pre-start marketing blast at the given number of days
/// before a flow starts. Returns (active-members, former-members).
pub fn start_offset_templates(days_until_start: i64) -> Option<(&'static str, &'static str)> {
    match days_until_start {
        7 => Some(("mailing_active_7", "mailing_former_7")),
        3 => Some(("mailing_active_3", "mailing_former_3")),
        _ => None,
    }
}

/// Pre-start reminder templates a flow is due today. Free and paid flows
/// both get the 7 and 3 day reminders.
pub fn pre_start_templates(
    flow: &Flow,
    now: OffsetDateTime,
) -> Option<(&'static str, &'static str)> {
    start_offset_templates(days_until(now, flow.start_at))
}

/// Template and claim key for the access-ending reminder a flow is due
/// today, if any. The key is stable within a calendar day, so a rerun of
/// the sweep on the same day claims nothing new and sends nothing.
pub fn auto_end_send(flow: &Flow, now: OffsetDateTime) -> Option<(&'static str, String)> {
    let template = end_offset_template(flow.is_free, days_until(now, flow.end_at))?;
    let key = auto_key(template, flow.id, now.date());
    Some((template, key))
}

/// Template for the access-ending reminder at the given number of days
/// before a flow ends. Free and paid cohorts are reminded on different
/// offsets.
pub fn end_offset_template(is_free: bool, days_until_end: i64) -> Option<&'static str> {
    match (is_free, days_until_end) {
        (true, 7) => Some("free_end_minus_7"),
        (true, 3) => Some("free_end_minus_3"),
        (false, 3) => Some("paid_end_minus_3"),
        (false, 1) => Some("paid_end_minus_1"),
        _ => None,
    }
}

/// Drops recipients whose access window has already ended. A lapsed but
/// not-yet-swept membership still reads `active` in the table; such
/// members are not mailed.
fn with_current_access(rows: Vec<(i64, OffsetDateTime)>, now: OffsetDateTime) -> Vec<i64> {
    rows.into_iter()
        .filter(|(_, access_end_at)| *access_end_at >= now)
        .map(|(tg_id, _)| tg_id)
        .collect()
}

/// Telegram ids of users with a current active membership in the given flow.
pub async fn active_recipients_for_flow(
    conn: &mut PgConnection,
    flow_id: i64,
    now: OffsetDateTime,
) -> ClubResult<Vec<i64>> {
    let rows: Vec<(i64, OffsetDateTime)> = sqlx::query_as(
        r#"
        SELECT u.tg_id, m.access_end_at FROM users u
        JOIN memberships m ON m.user_id = u.id
        WHERE m.flow_id = $1 AND m.status = 'active'
        ORDER BY u.id
        "#,
    )
    .bind(flow_id)
    .fetch_all(conn)
    .await?;
    Ok(with_current_access(rows, now))
}

/// Telegram ids of users with any current active membership.
pub async fn all_active_recipients(
    conn: &mut PgConnection,
    now: OffsetDateTime,
) -> ClubResult<Vec<i64>> {
    let rows: Vec<(i64, OffsetDateTime)> = sqlx::query_as(
        r#"
        SELECT u.tg_id, m.access_end_at FROM users u
        JOIN memberships m ON m.user_id = u.id
        WHERE m.status = 'active'
        "#,
    )
    .fetch_all(conn)
    .await?;
    let mut ids = with_current_access(rows, now);
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Telegram ids of users whose most recent membership is no longer active.
pub async fn former_recipients(conn: &mut PgConnection) -> ClubResult<Vec<i64>> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        r#"
        SELECT u.tg_id FROM users u
        JOIN LATERAL (
            SELECT status FROM memberships m
            WHERE m.user_id = u.id
            ORDER BY m.created_at DESC, m.id DESC
            LIMIT 1
        ) latest ON TRUE
        WHERE latest.status <> 'active'
        ORDER BY u.tg_id
        "#,
    )
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|(tg_id,)| tg_id).collect())
}

/// Paced bulk send. Every recipient is attempted regardless of earlier
/// failures.
pub async fn send_bulk(notifier: &dyn Notifier, recipients: &[i64], text: &str) -> SendReport {
    let mut report = SendReport::default();
    for &tg_id in recipients {
        report.attempted += 1;
        if notifier.send_text(tg_id, text).await.is_failed() {
            report.failed += 1;
        } else {
            report.delivered += 1;
        }
        tokio::time::sleep(std::time::Duration::from_millis(SEND_DELAY_MS)).await;
    }
    report
}

/// Keyed bulk send: claim the key first, skip entirely when it was already
/// claimed. Returns `None` on a duplicate.
pub async fn send_keyed(
    conn: &mut PgConnection,
    notifier: &dyn Notifier,
    key: &str,
    recipients: &[i64],
    text: &str,
) -> ClubResult<Option<SendReport>> {
    if !audit::claim_key(conn, key).await? {
        tracing::debug!(key = key, "Mailing key already claimed, skipping");
        return Ok(None);
    }
    let report = send_bulk(notifier, recipients, text).await;
    audit::add_entry(
        conn,
        "mailing_sent",
        serde_json::json!({
            "key": key,
            "attempted": report.attempted,
            "delivered": report.delivered,
            "failed": report.failed,
        }),
        None,
    )
    .await?;
    tracing::info!(
        key = key,
        attempted = report.attempted,
        delivered = report.delivered,
        failed = report.failed,
        "Mailing sent"
    );
    Ok(Some(report))
}

fn days_until(now: OffsetDateTime, boundary: OffsetDateTime) -> i64 {
    (boundary.date() - now.date()).whole_days()
}

/// Pre-start marketing blasts for upcoming flows, free and paid alike
/// (7 and 3 days out). Active members get the renewal pitch, former
/// members the comeback one.
pub async fn send_flow_start_mailings(
    conn: &mut PgConnection,
    notifier: &dyn Notifier,
    now: OffsetDateTime,
) -> ClubResult<usize> {
    let upcoming: Vec<Flow> = sqlx::query_as(
        r#"
        SELECT * FROM flows
        WHERE start_at > $1 AND start_at <= $2
        ORDER BY start_at ASC
        "#,
    )
    .bind(now)
    .bind(now + Duration::days(8))
    .fetch_all(&mut *conn)
    .await?;

    let mut sent = 0;
    for flow in upcoming {
        let Some((active_key, former_key)) = pre_start_templates(&flow, now) else {
            continue;
        };

        let active = all_active_recipients(conn, now).await?;
        let text = templates::get_text(conn, active_key).await?;
        let key = auto_key(active_key, flow.id, now.date());
        if send_keyed(conn, notifier, &key, &active, &text).await?.is_some() {
            sent += 1;
        }

        let former = former_recipients(conn).await?;
        let text = templates::get_text(conn, former_key).await?;
        let key = auto_key(former_key, flow.id, now.date());
        if send_keyed(conn, notifier, &key, &former, &text).await?.is_some() {
            sent += 1;
        }
    }
    Ok(sent)
}

/// Access-ending reminders for currently running flows. Free cohorts are
/// reminded 7 and 3 days before the end, paid cohorts 3 and 1.
pub async fn send_auto_end_mailings(
    conn: &mut PgConnection,
    notifier: &dyn Notifier,
    now: OffsetDateTime,
) -> ClubResult<usize> {
    let running: Vec<Flow> = sqlx::query_as(
        "SELECT * FROM flows WHERE start_at <= $1 AND end_at >= $1 ORDER BY start_at ASC",
    )
    .bind(now)
    .fetch_all(&mut *conn)
    .await?;

    let mut sent = 0;
    for flow in running {
        let Some((template_key, key)) = auto_end_send(&flow, now) else {
            continue;
        };
        let recipients = active_recipients_for_flow(conn, flow.id, now).await?;
        let text = templates::get_text(conn, template_key).await?;
        if send_keyed(conn, notifier, &key, &recipients, &text).await?.is_some() {
            sent += 1;
        }
    }
    Ok(sent)
}

/// Manual admin-initiated mailing. Unkeyed: the admin decides when to
/// repeat it.
pub async fn send_manual(
    conn: &mut PgConnection,
    notifier: &dyn Notifier,
    audience: Audience,
    text: &str,
    now: OffsetDateTime,
) -> ClubResult<SendReport> {
    let recipients = match audience {
        Audience::Active => all_active_recipients(conn, now).await?,
        Audience::Former => former_recipients(conn).await?,
        Audience::FlowActive(flow_id) => active_recipients_for_flow(conn, flow_id, now).await?,
    };
    let report = send_bulk(notifier, &recipients, text).await;
    audit::add_entry(
        conn,
        "manual_mailing_sent",
        serde_json::json!({
            "audience": format!("{audience:?}"),
            "attempted": report.attempted,
            "delivered": report.delivered,
            "failed": report.failed,
        }),
        None,
    )
    .await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::testing::RecordingNotifier;
    use time::macros::{date, datetime};

    fn flow(id: i64, is_free: bool, start_at: OffsetDateTime, weeks: i64) -> Flow {
        let (sales_open_at, sales_close_at) = crate::flows::sales_window_for_start(start_at);
        Flow {
            id,
            title: format!("Flow {id}"),
            start_at,
            end_at: start_at + Duration::weeks(weeks),
            duration_weeks: weeks,
            is_free,
            sales_open_at,
            sales_close_at,
            created_at: start_at - Duration::weeks(10),
            updated_at: start_at - Duration::weeks(10),
        }
    }

    #[test]
    fn auto_key_is_stable_per_day() {
        let key = auto_key("free_end_minus_7", 3, date!(2026 - 04 - 01));
        assert_eq!(key, "auto:free_end_minus_7:3:2026-04-01");
        assert_eq!(key, auto_key("free_end_minus_7", 3, date!(2026 - 04 - 01)));
        assert_ne!(key, auto_key("free_end_minus_7", 3, date!(2026 - 04 - 02)));
    }

    #[test]
    fn start_offsets_match_only_seven_and_three() {
        assert_eq!(
            start_offset_templates(7),
            Some(("mailing_active_7", "mailing_former_7"))
        );
        assert_eq!(
            start_offset_templates(3),
            Some(("mailing_active_3", "mailing_former_3"))
        );
        assert_eq!(start_offset_templates(5), None);
        assert_eq!(start_offset_templates(0), None);
        assert_eq!(start_offset_templates(-1), None);
    }

    #[test]
    fn end_offsets_differ_for_free_and_paid() {
        assert_eq!(end_offset_template(true, 7), Some("free_end_minus_7"));
        assert_eq!(end_offset_template(true, 3), Some("free_end_minus_3"));
        assert_eq!(end_offset_template(true, 1), None);
        assert_eq!(end_offset_template(false, 3), Some("paid_end_minus_3"));
        assert_eq!(end_offset_template(false, 1), Some("paid_end_minus_1"));
        assert_eq!(end_offset_template(false, 7), None);
    }

    // The pre-start reminder is keyed off the start date alone; free
    // cohorts are reminded on the same offsets as paid ones.
    #[test]
    fn free_flows_get_pre_start_reminders_too() {
        let now = datetime!(2026-04-01 09:00 UTC);
        let free = flow(1, true, datetime!(2026-04-08 00:00 UTC), 4);
        let paid = flow(2, false, datetime!(2026-04-04 00:00 UTC), 5);
        assert_eq!(
            pre_start_templates(&free, now),
            Some(("mailing_active_7", "mailing_former_7"))
        );
        assert_eq!(
            pre_start_templates(&paid, now),
            Some(("mailing_active_3", "mailing_former_3"))
        );
        let off_schedule = flow(3, true, datetime!(2026-04-06 00:00 UTC), 4);
        assert_eq!(pre_start_templates(&off_schedule, now), None);
    }

    // A rerun of the end-reminder sweep on the same day derives the same
    // claim key, so the second pass loses the claim and sends nothing.
    #[test]
    fn same_day_rerun_derives_an_already_claimed_key() {
        let now = datetime!(2026-04-01 10:00 UTC);
        let ending = flow(4, false, datetime!(2026-03-07 00:00 UTC), 4);
        assert_eq!(ending.end_at.date(), date!(2026 - 04 - 04));

        let mut claimed = std::collections::HashSet::new();
        let (_, first_key) = auto_end_send(&ending, now).unwrap();
        assert!(claimed.insert(first_key));

        let rerun = datetime!(2026-04-01 23:00 UTC);
        let (_, second_key) = auto_end_send(&ending, rerun).unwrap();
        assert!(!claimed.insert(second_key));

        let final_reminder_day = datetime!(2026-04-03 10:00 UTC);
        let (_, next_key) = auto_end_send(&ending, final_reminder_day).unwrap();
        assert!(claimed.insert(next_key));
    }

    // Members whose access window already ended still read `active` until
    // the expiry sweep runs; they are filtered out of every recipient set.
    #[test]
    fn lapsed_members_are_not_mailed() {
        let now = datetime!(2026-04-01 12:00 UTC);
        let rows = vec![
            (10, datetime!(2026-04-05 00:00 UTC)),
            (20, datetime!(2026-04-01 00:00 UTC)),
            (30, datetime!(2026-04-01 12:00 UTC)),
        ];
        assert_eq!(with_current_access(rows, now), vec![10, 30]);
    }

    #[test]
    fn days_until_uses_calendar_dates() {
        let now = datetime!(2026-04-01 23:50 UTC);
        let boundary = datetime!(2026-04-08 00:10 UTC);
        assert_eq!(days_until(now, boundary), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn bulk_send_counts_failures_and_continues() {
        let notifier = RecordingNotifier::failing_for(&[20]);
        let report = send_bulk(&notifier, &[10, 20, 30], "hello").await;
        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(notifier.sent_to(), vec![10, 30]);
    }
}
