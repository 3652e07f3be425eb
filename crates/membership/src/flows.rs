//! Flow (cohort) windowing and management
//!
//! A flow is a time-boxed enrollment batch. Its sales window is derived from
//! the start date and is not configurable: start −7 days through start +7
//! days. At most one flow may exist per `(start_at, is_free)` pair.

use sqlx::PgConnection;
use time::{Duration, OffsetDateTime};

use crate::error::{ClubError, ClubResult};
use crate::types::Flow;

/// Sales window bounds for a flow starting at `start_at`.
/// Fixed at start ±7 days by product agreement.
pub fn sales_window_for_start(start_at: OffsetDateTime) -> (OffsetDateTime, OffsetDateTime) {
    (start_at - Duration::days(7), start_at + Duration::days(7))
}

/// Whole weeks between start and end, floored, minimum one.
pub fn duration_weeks(start_at: OffsetDateTime, end_at: OffsetDateTime) -> i64 {
    ((end_at - start_at).whole_days() / 7).max(1)
}

pub async fn get_by_id(conn: &mut PgConnection, flow_id: i64) -> ClubResult<Option<Flow>> {
    let flow = sqlx::query_as("SELECT * FROM flows WHERE id = $1")
        .bind(flow_id)
        .fetch_optional(conn)
        .await?;
    Ok(flow)
}

pub async fn list_all(conn: &mut PgConnection) -> ClubResult<Vec<Flow>> {
    let flows = sqlx::query_as("SELECT * FROM flows ORDER BY start_at")
        .fetch_all(conn)
        .await?;
    Ok(flows)
}

async fn active_flow(
    conn: &mut PgConnection,
    is_free: bool,
    now: OffsetDateTime,
) -> ClubResult<Option<Flow>> {
    // Tie-break by latest start; the (start_at, is_free) uniqueness
    // invariant makes overlap unlikely but not impossible after date edits.
    let flow = sqlx::query_as(
        r#"
        SELECT * FROM flows
        WHERE is_free = $1 AND start_at <= $2 AND end_at >= $2
        ORDER BY start_at DESC
        LIMIT 1
        "#,
    )
    .bind(is_free)
    .bind(now)
    .fetch_optional(conn)
    .await?;
    Ok(flow)
}

pub async fn active_free_flow(
    conn: &mut PgConnection,
    now: OffsetDateTime,
) -> ClubResult<Option<Flow>> {
    active_flow(conn, true, now).await
}

pub async fn active_paid_flow(
    conn: &mut PgConnection,
    now: OffsetDateTime,
) -> ClubResult<Option<Flow>> {
    active_flow(conn, false, now).await
}

async fn next_flow(
    conn: &mut PgConnection,
    is_free: bool,
    now: OffsetDateTime,
) -> ClubResult<Option<Flow>> {
    let flow = sqlx::query_as(
        r#"
        SELECT * FROM flows
        WHERE is_free = $1 AND start_at >= $2
        ORDER BY start_at ASC
        LIMIT 1
        "#,
    )
    .bind(is_free)
    .bind(now)
    .fetch_optional(conn)
    .await?;
    Ok(flow)
}

pub async fn next_free_flow(
    conn: &mut PgConnection,
    now: OffsetDateTime,
) -> ClubResult<Option<Flow>> {
    next_flow(conn, true, now).await
}

pub async fn next_paid_flow(
    conn: &mut PgConnection,
    now: OffsetDateTime,
) -> ClubResult<Option<Flow>> {
    next_flow(conn, false, now).await
}

/// Flow whose sales window contains `now`, earliest start first
pub async fn flow_in_sales_window(
    conn: &mut PgConnection,
    now: OffsetDateTime,
) -> ClubResult<Option<Flow>> {
    let flow = sqlx::query_as(
        r#"
        SELECT * FROM flows
        WHERE sales_open_at <= $1 AND sales_close_at >= $1
        ORDER BY start_at ASC
        LIMIT 1
        "#,
    )
    .bind(now)
    .fetch_optional(conn)
    .await?;
    Ok(flow)
}

/// Active flow if any (free preferred over paid), else soonest future flow
pub async fn current_or_next(
    conn: &mut PgConnection,
    now: OffsetDateTime,
) -> ClubResult<Option<Flow>> {
    if let Some(flow) = active_free_flow(conn, now).await? {
        return Ok(Some(flow));
    }
    if let Some(flow) = active_paid_flow(conn, now).await? {
        return Ok(Some(flow));
    }
    let next_free = next_free_flow(conn, now).await?;
    let next_paid = next_paid_flow(conn, now).await?;
    Ok(match (next_free, next_paid) {
        (Some(free), Some(paid)) => {
            if free.start_at <= paid.start_at {
                Some(free)
            } else {
                Some(paid)
            }
        }
        (free, paid) => free.or(paid),
    })
}

fn map_unique_violation(err: sqlx::Error) -> ClubError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return ClubError::Validation(
                "a flow with this start date and tier already exists".to_string(),
            );
        }
    }
    err.into()
}

/// Insert a new flow; the `(start_at, is_free)` uniqueness invariant is
/// enforced by the database and surfaced as a validation error.
pub async fn create(
    conn: &mut PgConnection,
    title: &str,
    start_at: OffsetDateTime,
    end_at: OffsetDateTime,
    is_free: bool,
) -> ClubResult<Flow> {
    if end_at <= start_at {
        return Err(ClubError::Validation(
            "flow end date must be strictly after the start date".to_string(),
        ));
    }
    let (sales_open_at, sales_close_at) = sales_window_for_start(start_at);
    let flow: Flow = sqlx::query_as(
        r#"
        INSERT INTO flows
            (title, start_at, end_at, duration_weeks, is_free, sales_open_at, sales_close_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(title)
    .bind(start_at)
    .bind(end_at)
    .bind(duration_weeks(start_at, end_at))
    .bind(is_free)
    .bind(sales_open_at)
    .bind(sales_close_at)
    .fetch_one(conn)
    .await
    .map_err(map_unique_violation)?;
    Ok(flow)
}

/// Edit a flow's dates. Recomputes the sales window and duration; rejects
/// an end date that is not strictly after the start date.
pub async fn update_dates(
    conn: &mut PgConnection,
    flow_id: i64,
    start_at: OffsetDateTime,
    end_at: OffsetDateTime,
) -> ClubResult<Flow> {
    if end_at <= start_at {
        return Err(ClubError::Validation(
            "flow end date must be strictly after the start date".to_string(),
        ));
    }
    let (sales_open_at, sales_close_at) = sales_window_for_start(start_at);
    let flow: Option<Flow> = sqlx::query_as(
        r#"
        UPDATE flows SET
            start_at = $2,
            end_at = $3,
            duration_weeks = $4,
            sales_open_at = $5,
            sales_close_at = $6,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(flow_id)
    .bind(start_at)
    .bind(end_at)
    .bind(duration_weeks(start_at, end_at))
    .bind(sales_open_at)
    .bind(sales_close_at)
    .fetch_optional(conn)
    .await
    .map_err(map_unique_violation)?;
    flow.ok_or(ClubError::FlowNotFound(flow_id))
}

/// Create the paid flow that follows the current (or next) free flow:
/// starts the day after the free flow ends, runs five weeks. Refused when a
/// paid flow is already scheduled past that point.
pub async fn create_next_paid_flow(
    conn: &mut PgConnection,
    now: OffsetDateTime,
) -> ClubResult<Flow> {
    let free_flow = match active_free_flow(conn, now).await? {
        Some(flow) => Some(flow),
        None => next_free_flow(conn, now).await?,
    };
    let free_flow = free_flow.ok_or_else(|| {
        ClubError::Validation("no free flow exists to anchor the paid flow".to_string())
    })?;

    let start_at = free_flow.end_at + Duration::days(1);
    if next_paid_flow(conn, start_at).await?.is_some() {
        return Err(ClubError::Validation(
            "the next paid flow already exists".to_string(),
        ));
    }
    let end_at = start_at + Duration::weeks(5);
    create(conn, "Paid flow", start_at, end_at, false).await
}

/// Idempotent seed bootstrap for the configured free flow and the first
/// paid flow. Existing rows (matched on start date and tier) are kept.
pub async fn ensure_seed_flows(
    conn: &mut PgConnection,
    free_start: OffsetDateTime,
    free_end: OffsetDateTime,
) -> ClubResult<()> {
    let exists: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM flows WHERE start_at = $1 AND is_free = TRUE")
            .bind(free_start)
            .fetch_optional(&mut *conn)
            .await?;
    if exists.is_none() {
        create(conn, "Free flow", free_start, free_end, true).await?;
    }

    let paid_start = free_end + Duration::days(1);
    let exists: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM flows WHERE start_at = $1 AND is_free = FALSE")
            .bind(paid_start)
            .fetch_optional(&mut *conn)
            .await?;
    if exists.is_none() {
        create(
            conn,
            "Paid flow",
            paid_start,
            paid_start + Duration::weeks(5),
            false,
        )
        .await?;
    }
    Ok(())
}
