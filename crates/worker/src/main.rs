//! FlowClub Background Worker
//!
//! Handles scheduled jobs including:
//! - Membership expiry once the access window ends (every 30 minutes)
//! - Pay-later deadline enforcement (every 30 minutes)
//! - Eviction of non-renewed members on a paid flow's first day (every 12 hours)
//! - Pending payment reconciliation against the provider (every 10 minutes)
//! - Pre-start marketing mailings (every 12 hours)
//! - Access-ending reminder mailings (daily at 10:00 UTC)

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use flowclub_membership::{
    jobs, SettingsDefaults, SettingsResolver, TelegramClient, YookassaAdapter,
};
use flowclub_shared::{create_pool, Config};

/// Everything a sweep needs, cloned into each scheduled closure.
#[derive(Clone)]
struct WorkerContext {
    pool: sqlx::PgPool,
    telegram: Arc<TelegramClient>,
    provider: Arc<YookassaAdapter>,
    resolver: SettingsResolver,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Starting FlowClub Worker");

    let config = Config::from_env()?;
    let pool = create_pool(&config.database_url).await?;
    info!("Database pool created");

    let ctx = WorkerContext {
        pool,
        telegram: Arc::new(TelegramClient::new(
            &config.bot_token,
            config.primary_channel_id,
            config.secondary_discussion_id,
        )),
        provider: Arc::new(YookassaAdapter::new(
            &config.yookassa_shop_id,
            &config.yookassa_secret_key,
            &config.public_base_url,
        )),
        resolver: SettingsResolver::new(SettingsDefaults::from(&config)),
    };

    let scheduler = JobScheduler::new().await?;

    // Job 1: Expire memberships whose access window ended (every 30 minutes)
    let expire_ctx = ctx.clone();
    scheduler
        .add(Job::new_async("0 */30 * * * *", move |_uuid, _l| {
            let ctx = expire_ctx.clone();
            Box::pin(async move {
                info!("Running membership expiry sweep");
                let now = OffsetDateTime::now_utc();
                if let Err(e) =
                    jobs::expire_lapsed(&ctx.pool, ctx.telegram.as_ref(), now).await
                {
                    error!(error = %e, "Membership expiry sweep failed");
                }
            })
        })?)
        .await?;
    info!("Scheduled: Membership expiry (every 30 minutes)");

    // Job 2: Enforce pay-later deadlines (every 30 minutes, offset)
    let deadline_ctx = ctx.clone();
    scheduler
        .add(Job::new_async("0 15,45 * * * *", move |_uuid, _l| {
            let ctx = deadline_ctx.clone();
            Box::pin(async move {
                info!("Running pay-later deadline sweep");
                let now = OffsetDateTime::now_utc();
                if let Err(e) =
                    jobs::enforce_pay_later_deadlines(&ctx.pool, ctx.telegram.as_ref(), now).await
                {
                    error!(error = %e, "Pay-later deadline sweep failed");
                }
            })
        })?)
        .await?;
    info!("Scheduled: Pay-later deadline enforcement (every 30 minutes)");

    // Job 3: Evict non-renewed members on a paid flow's first day (every 12 hours)
    let evict_ctx = ctx.clone();
    scheduler
        .add(Job::new_async("0 0 */12 * * *", move |_uuid, _l| {
            let ctx = evict_ctx.clone();
            Box::pin(async move {
                info!("Running non-renewed eviction sweep");
                let now = OffsetDateTime::now_utc();
                if let Err(e) = jobs::evict_non_renewed(&ctx.pool, ctx.telegram.as_ref(), now).await
                {
                    error!(error = %e, "Non-renewed eviction sweep failed");
                }
            })
        })?)
        .await?;
    info!("Scheduled: Non-renewed eviction (every 12 hours)");

    // Job 4: Reconcile pending payments against the provider (every 10 minutes)
    let poll_ctx = ctx.clone();
    scheduler
        .add(Job::new_async("0 */10 * * * *", move |_uuid, _l| {
            let ctx = poll_ctx.clone();
            Box::pin(async move {
                info!("Running pending payment reconciliation");
                let now = OffsetDateTime::now_utc();
                if let Err(e) = jobs::poll_pending_payments(
                    &ctx.pool,
                    ctx.provider.as_ref(),
                    ctx.telegram.as_ref(),
                    ctx.telegram.as_ref(),
                    &ctx.resolver,
                    now,
                )
                .await
                {
                    error!(error = %e, "Pending payment reconciliation failed");
                }
            })
        })?)
        .await?;
    info!("Scheduled: Pending payment reconciliation (every 10 minutes)");

    // Job 5: Pre-start marketing mailings (every 12 hours, offset from eviction)
    let mailing_ctx = ctx.clone();
    scheduler
        .add(Job::new_async("0 30 */12 * * *", move |_uuid, _l| {
            let ctx = mailing_ctx.clone();
            Box::pin(async move {
                info!("Running scheduled mailings");
                let now = OffsetDateTime::now_utc();
                if let Err(e) = jobs::send_scheduled_mailings(
                    &ctx.pool,
                    ctx.telegram.as_ref(),
                    &ctx.resolver,
                    now,
                )
                .await
                {
                    error!(error = %e, "Scheduled mailings failed");
                }
            })
        })?)
        .await?;
    info!("Scheduled: Pre-start mailings (every 12 hours)");

    // Job 6: Access-ending reminder mailings (daily at 10:00 UTC)
    let end_mailing_ctx = ctx.clone();
    scheduler
        .add(Job::new_async("0 0 10 * * *", move |_uuid, _l| {
            let ctx = end_mailing_ctx.clone();
            Box::pin(async move {
                info!("Running end-of-access mailings");
                let now = OffsetDateTime::now_utc();
                if let Err(e) =
                    jobs::send_end_mailings(&ctx.pool, ctx.telegram.as_ref(), &ctx.resolver, now)
                        .await
                {
                    error!(error = %e, "End-of-access mailings failed");
                }
            })
        })?)
        .await?;
    info!("Scheduled: End-of-access mailings (daily at 10:00 UTC)");

    // Job 7: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("FlowClub Worker started successfully with {} scheduled jobs", 7);

    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
