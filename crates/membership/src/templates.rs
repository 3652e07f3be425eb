//! Message templates
//!
//! Templates live in the database so admins can edit them; compiled-in
//! defaults cover every key so a missing row never breaks a mailing.

use sqlx::PgConnection;

use crate::error::ClubResult;
use crate::types::MessageTemplate;

pub const DEFAULT_TEMPLATES: &[(&str, &str)] = &[
    (
        "mailing_active_7",
        "A new flow starts in a week. Renew now to keep your access.",
    ),
    (
        "mailing_active_3",
        "A new flow starts in three days. Renew now to keep your access.",
    ),
    (
        "mailing_former_7",
        "A new flow starts in a week. We would love to have you back.",
    ),
    (
        "mailing_former_3",
        "A new flow starts in three days. Join us for the next one.",
    ),
    (
        "free_end_minus_7",
        "Your free flow ends in a week. Upgrade to keep going.",
    ),
    (
        "free_end_minus_3",
        "Your free flow ends in three days. Upgrade to keep going.",
    ),
    (
        "paid_end_minus_3",
        "Your flow ends in three days. Renew to stay in the club.",
    ),
    (
        "paid_end_minus_1",
        "Your flow ends tomorrow. Renew today to keep your access.",
    ),
    (
        "payment_confirmed",
        "Payment confirmed. Use the buttons to send your join requests.",
    ),
];

pub fn default_text(key: &str) -> Option<&'static str> {
    DEFAULT_TEMPLATES
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, text)| *text)
}

pub async fn get_by_key(
    conn: &mut PgConnection,
    key: &str,
) -> ClubResult<Option<MessageTemplate>> {
    let template = sqlx::query_as("SELECT * FROM message_templates WHERE key = $1")
        .bind(key)
        .fetch_optional(conn)
        .await?;
    Ok(template)
}

/// Effective text: database row if present, compiled-in default otherwise,
/// empty string for unknown keys.
pub async fn get_text(conn: &mut PgConnection, key: &str) -> ClubResult<String> {
    if let Some(template) = get_by_key(conn, key).await? {
        return Ok(template.text);
    }
    Ok(default_text(key).unwrap_or_default().to_string())
}

pub async fn set_text(conn: &mut PgConnection, key: &str, text: &str) -> ClubResult<()> {
    sqlx::query(
        r#"
        INSERT INTO message_templates (key, text, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (key) DO UPDATE SET text = $2, updated_at = NOW()
        "#,
    )
    .bind(key)
    .bind(text)
    .execute(conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_auto_mailing_key_has_a_default() {
        for key in [
            "free_end_minus_7",
            "free_end_minus_3",
            "paid_end_minus_3",
            "paid_end_minus_1",
        ] {
            assert!(default_text(key).is_some(), "missing default for {key}");
        }
    }

    #[test]
    fn unknown_key_has_no_default() {
        assert!(default_text("nope").is_none());
    }
}
