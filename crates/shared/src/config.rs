//! Environment configuration
//!
//! All deployment-level knobs live here. Business parameters (prices, grace
//! days, pay-later window) are *defaults* only: the membership crate resolves
//! runtime overrides from the `app_settings` table on top of these values.

use time::macros::format_description;
use time::Date;

/// Errors raised while loading configuration at startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    InvalidVar { var: &'static str, reason: String },
}

/// Application configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // HTTP server (webhook host)
    pub bind_address: String,

    // Telegram
    pub bot_token: String,
    pub primary_channel_id: i64,
    pub secondary_discussion_id: i64,
    pub admin_tg_ids: Vec<i64>,

    // Payment provider
    pub yookassa_shop_id: String,
    pub yookassa_secret_key: String,
    pub public_base_url: String,

    // Business defaults (overridable via app_settings)
    pub intro_price: i64,
    pub renewal_price: i64,
    pub grace_days: i64,
    pub pay_later_max_days: i64,
    pub mailings_enabled: bool,

    // Seed flow dates (UTC)
    pub free_flow_start: Date,
    pub free_flow_end: Date,
}

fn require(var: &'static str) -> Result<String, ConfigError> {
    std::env::var(var).map_err(|_| ConfigError::MissingVar(var))
}

fn optional(var: &'static str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn parse_i64(var: &'static str, raw: &str) -> Result<i64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidVar {
        var,
        reason: format!("expected an integer, got {raw:?}"),
    })
}

fn parse_id_list(var: &'static str, raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_i64(var, s))
        .collect()
}

fn parse_date(var: &'static str, raw: &str) -> Result<Date, ConfigError> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(raw.trim(), &format).map_err(|_| ConfigError::InvalidVar {
        var,
        reason: format!("expected YYYY-MM-DD, got {raw:?}"),
    })
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Fails fast on missing credentials or malformed values; business
    /// defaults fall back to the shipped values when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let admin_tg_ids = parse_id_list("ADMIN_TG_IDS", &optional("ADMIN_TG_IDS", ""))?;

        Ok(Self {
            database_url: require("DATABASE_URL")?,
            bind_address: optional("BIND_ADDRESS", "0.0.0.0:8080"),
            bot_token: require("BOT_TOKEN")?,
            primary_channel_id: parse_i64("PRIMARY_CHANNEL_ID", &require("PRIMARY_CHANNEL_ID")?)?,
            secondary_discussion_id: parse_i64(
                "SECONDARY_DISCUSSION_ID",
                &require("SECONDARY_DISCUSSION_ID")?,
            )?,
            admin_tg_ids,
            yookassa_shop_id: require("YOOKASSA_SHOP_ID")?,
            yookassa_secret_key: require("YOOKASSA_SECRET_KEY")?,
            public_base_url: optional("PUBLIC_BASE_URL", "https://flowclub.example"),
            intro_price: parse_i64("INTRO_PRICE", &optional("INTRO_PRICE", "2990"))?,
            renewal_price: parse_i64("RENEWAL_PRICE", &optional("RENEWAL_PRICE", "1990"))?,
            grace_days: parse_i64("GRACE_DAYS", &optional("GRACE_DAYS", "1"))?,
            pay_later_max_days: parse_i64(
                "PAY_LATER_MAX_DAYS",
                &optional("PAY_LATER_MAX_DAYS", "7"),
            )?,
            mailings_enabled: optional("MAILINGS_ENABLED", "true").to_lowercase() == "true",
            free_flow_start: parse_date(
                "FREE_FLOW_START",
                &optional("FREE_FLOW_START", "2026-03-02"),
            )?,
            free_flow_end: parse_date("FREE_FLOW_END", &optional("FREE_FLOW_END", "2026-03-29"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn parse_date_accepts_iso() {
        let date = parse_date("FREE_FLOW_START", "2026-03-02").unwrap();
        assert_eq!(date.to_string(), "2026-03-02");
    }

    #[test]
    fn parse_date_rejects_garbage() {
        assert!(parse_date("FREE_FLOW_START", "03/02/2026").is_err());
    }

    #[test]
    fn parse_id_list_splits_and_trims() {
        assert_eq!(
            parse_id_list("ADMIN_TG_IDS", "100, 200,300").unwrap(),
            vec![100, 200, 300]
        );
        assert_eq!(parse_id_list("ADMIN_TG_IDS", "").unwrap(), Vec::<i64>::new());
        assert!(parse_id_list("ADMIN_TG_IDS", "100,abc").is_err());
    }

    #[test]
    fn parse_i64_rejects_non_numeric() {
        assert!(parse_i64("INTRO_PRICE", "abc").is_err());
        assert_eq!(parse_i64("INTRO_PRICE", " 2990 ").unwrap(), 2990);
    }
}
