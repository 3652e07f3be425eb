//! Pricing calculator
//!
//! A user inside their grace window pays the renewal price; everyone else
//! pays the intro price. The user's latest promo is applied on top.

use sqlx::PgConnection;
use time::OffsetDateTime;

use crate::error::ClubResult;
use crate::memberships::{self, is_within_grace};
use crate::promos;
use crate::settings::EffectiveSettings;
use crate::types::Membership;

/// Price classification before promo application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceClass {
    Intro,
    Renewal,
}

/// Classify the purchase: renewal iff an active membership exists and `at`
/// is within its grace window.
pub fn classify(
    active_membership: Option<&Membership>,
    at: OffsetDateTime,
    grace_days: i64,
) -> PriceClass {
    match active_membership {
        Some(membership) if is_within_grace(membership, at, grace_days) => PriceClass::Renewal,
        _ => PriceClass::Intro,
    }
}

pub fn base_price(class: PriceClass, settings: &EffectiveSettings) -> i64 {
    match class {
        PriceClass::Intro => settings.intro_price,
        PriceClass::Renewal => settings.renewal_price,
    }
}

/// The user's current price. May be zero (free via promo), never negative.
pub async fn quote(
    conn: &mut PgConnection,
    user_id: i64,
    at: OffsetDateTime,
    settings: &EffectiveSettings,
) -> ClubResult<i64> {
    let active = memberships::get_active(conn, user_id).await?;
    let class = classify(active.as_ref(), at, settings.grace_days);
    let base = base_price(class, settings);
    promos::apply_to_price(conn, user_id, base, at).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MembershipStatus;
    use time::macros::datetime;
    use time::Duration;

    fn settings() -> EffectiveSettings {
        EffectiveSettings {
            intro_price: 2990,
            renewal_price: 1990,
            grace_days: 1,
            pay_later_max_days: 7,
        }
    }

    fn membership(access_end: OffsetDateTime) -> Membership {
        Membership {
            id: 1,
            user_id: 10,
            flow_id: 20,
            status: MembershipStatus::Active,
            access_start_at: access_end - Duration::weeks(5),
            access_end_at: access_end,
            grace_end_at: access_end + Duration::days(1),
            pay_later_used_at: None,
            pay_later_deadline_at: None,
            last_payment_id: None,
            created_at: access_end - Duration::weeks(5),
            updated_at: access_end - Duration::weeks(5),
        }
    }

    #[test]
    fn no_membership_means_intro() {
        assert_eq!(classify(None, datetime!(2026-04-01 00:00 UTC), 1), PriceClass::Intro);
    }

    #[test]
    fn within_grace_is_renewal_outside_is_intro() {
        let m = membership(datetime!(2026-04-01 00:00 UTC));
        assert_eq!(
            classify(Some(&m), datetime!(2026-04-02 00:00 UTC), 1),
            PriceClass::Renewal
        );
        assert_eq!(
            classify(Some(&m), datetime!(2026-04-03 00:00 UTC), 1),
            PriceClass::Intro
        );
    }

    #[test]
    fn base_price_follows_classification() {
        let s = settings();
        assert_eq!(base_price(PriceClass::Intro, &s), 2990);
        assert_eq!(base_price(PriceClass::Renewal, &s), 1990);
    }
}
