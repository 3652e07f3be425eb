//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use flowclub_membership::{AccessGateway, Notifier, PaymentProvider, SettingsResolver};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub provider: Arc<dyn PaymentProvider>,
    pub gateway: Arc<dyn AccessGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub resolver: SettingsResolver,
}
