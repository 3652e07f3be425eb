//! FlowClub API Server
//!
//! Receives payment provider webhooks and exposes a health endpoint. All
//! business decisions live in `flowclub-membership`; this binary wires the
//! HTTP surface to them.

mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowclub_membership::{SettingsDefaults, SettingsResolver, TelegramClient, YookassaAdapter};
use flowclub_shared::{create_pool, run_migrations, Config};

use crate::routes::create_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flowclub_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting FlowClub API Server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    tracing::info!("Running database migrations...");
    run_migrations(&pool).await?;

    let mut conn = pool.acquire().await?;
    flowclub_membership::flows::ensure_seed_flows(
        &mut conn,
        config.free_flow_start.midnight().assume_utc(),
        config.free_flow_end.midnight().assume_utc(),
    )
    .await?;
    let promoted = flowclub_membership::users::promote_admins(&mut conn, &config.admin_tg_ids).await?;
    if promoted > 0 {
        tracing::info!(promoted, "Promoted configured admin accounts");
    }
    drop(conn);

    let telegram = Arc::new(TelegramClient::new(
        &config.bot_token,
        config.primary_channel_id,
        config.secondary_discussion_id,
    ));
    let provider = Arc::new(YookassaAdapter::new(
        &config.yookassa_shop_id,
        &config.yookassa_secret_key,
        &config.public_base_url,
    ));
    let resolver = SettingsResolver::new(SettingsDefaults::from(&config));

    let state = AppState {
        pool,
        provider,
        gateway: telegram.clone(),
        notifier: telegram,
        resolver,
    };

    let app = create_router(state).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
