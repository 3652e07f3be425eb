//! Runtime-overridable business settings
//!
//! Each tunable falls back independently: an `app_settings` row wins when
//! present and parseable, otherwise the static default from deployment
//! configuration applies. Resolution never fails — defaults always exist.

use sqlx::PgConnection;

use flowclub_shared::Config;

use crate::error::ClubResult;

pub const KEY_INTRO_PRICE: &str = "intro_price";
pub const KEY_RENEWAL_PRICE: &str = "renewal_price";
pub const KEY_GRACE_DAYS: &str = "grace_days";
pub const KEY_PAY_LATER_MAX_DAYS: &str = "pay_later_max_days";
pub const KEY_MAILINGS_ENABLED: &str = "mailings_enabled_override";

/// Static defaults injected at construction; no process-wide singleton.
#[derive(Debug, Clone, Copy)]
pub struct SettingsDefaults {
    pub intro_price: i64,
    pub renewal_price: i64,
    pub grace_days: i64,
    pub pay_later_max_days: i64,
    pub mailings_enabled: bool,
}

impl From<&Config> for SettingsDefaults {
    fn from(config: &Config) -> Self {
        Self {
            intro_price: config.intro_price,
            renewal_price: config.renewal_price,
            grace_days: config.grace_days,
            pay_later_max_days: config.pay_later_max_days,
            mailings_enabled: config.mailings_enabled,
        }
    }
}

/// Fully resolved business parameters for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveSettings {
    pub intro_price: i64,
    pub renewal_price: i64,
    pub grace_days: i64,
    pub pay_later_max_days: i64,
}

/// Resolves effective settings from the override store plus static defaults
#[derive(Debug, Clone)]
pub struct SettingsResolver {
    defaults: SettingsDefaults,
}

impl SettingsResolver {
    pub fn new(defaults: SettingsDefaults) -> Self {
        Self { defaults }
    }

    async fn get_raw(&self, conn: &mut PgConnection, key: &str) -> ClubResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM app_settings WHERE key = $1")
                .bind(key)
                .fetch_optional(conn)
                .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn get_i64_or(
        &self,
        conn: &mut PgConnection,
        key: &str,
        default: i64,
    ) -> ClubResult<i64> {
        let raw = self.get_raw(conn, key).await?;
        Ok(raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default))
    }

    /// Resolve all pricing/grace parameters in one call
    pub async fn effective(&self, conn: &mut PgConnection) -> ClubResult<EffectiveSettings> {
        let d = self.defaults;
        Ok(EffectiveSettings {
            intro_price: self.get_i64_or(conn, KEY_INTRO_PRICE, d.intro_price).await?,
            renewal_price: self
                .get_i64_or(conn, KEY_RENEWAL_PRICE, d.renewal_price)
                .await?,
            grace_days: self.get_i64_or(conn, KEY_GRACE_DAYS, d.grace_days).await?,
            pay_later_max_days: self
                .get_i64_or(conn, KEY_PAY_LATER_MAX_DAYS, d.pay_later_max_days)
                .await?,
        })
    }

    /// Whether automatic mailings may be sent
    pub async fn mailings_enabled(&self, conn: &mut PgConnection) -> ClubResult<bool> {
        match self.get_raw(conn, KEY_MAILINGS_ENABLED).await? {
            Some(raw) => Ok(raw.to_lowercase() == "true"),
            None => Ok(self.defaults.mailings_enabled),
        }
    }

    /// Write an override. Validation ranges match the admin surface: prices
    /// in 0..=1_000_000, grace in 0..=30 days, pay-later in 0..=60 days.
    pub async fn set_override(
        &self,
        conn: &mut PgConnection,
        key: &str,
        value: i64,
    ) -> ClubResult<()> {
        let valid = match key {
            KEY_INTRO_PRICE | KEY_RENEWAL_PRICE => (0..=1_000_000).contains(&value),
            KEY_GRACE_DAYS => (0..=30).contains(&value),
            KEY_PAY_LATER_MAX_DAYS => (0..=60).contains(&value),
            _ => {
                return Err(crate::error::ClubError::Validation(format!(
                    "unknown setting key: {key}"
                )))
            }
        };
        if !valid {
            return Err(crate::error::ClubError::Validation(format!(
                "value {value} out of range for {key}"
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO app_settings (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value.to_string())
        .execute(conn)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> SettingsDefaults {
        SettingsDefaults {
            intro_price: 2990,
            renewal_price: 1990,
            grace_days: 1,
            pay_later_max_days: 7,
            mailings_enabled: true,
        }
    }

    #[test]
    fn defaults_from_config_fields_round_trip() {
        let d = defaults();
        assert_eq!(d.intro_price, 2990);
        assert_eq!(d.renewal_price, 1990);
        assert_eq!(d.grace_days, 1);
        assert_eq!(d.pay_later_max_days, 7);
    }
}
