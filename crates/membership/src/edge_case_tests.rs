// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Membership System
//!
//! Tests critical boundary conditions in:
//! - Grace period boundaries
//! - Pay-later deferral planning
//! - Pricing and promo interaction
//! - Sales window gating
//! - Early full payment resolution
//! - Mailing idempotency keys and pacing

#[cfg(test)]
mod fixtures {
    use time::{Duration, OffsetDateTime};

    use crate::settings::EffectiveSettings;
    use crate::types::{Flow, Membership, MembershipStatus};

    pub fn settings() -> EffectiveSettings {
        EffectiveSettings {
            intro_price: 2990,
            renewal_price: 1990,
            grace_days: 1,
            pay_later_max_days: 7,
        }
    }

    pub fn flow(id: i64, is_free: bool, start_at: OffsetDateTime, weeks: i64) -> Flow {
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

    pub fn membership(id: i64, user_id: i64, access_end_at: OffsetDateTime) -> Membership {
        Membership {
            id,
            user_id,
            flow_id: 1,
            status: MembershipStatus::Active,
            access_start_at: access_end_at - Duration::weeks(5),
            access_end_at,
            grace_end_at: access_end_at + Duration::days(1),
            pay_later_used_at: None,
            pay_later_deadline_at: None,
            last_payment_id: None,
            created_at: access_end_at - Duration::weeks(5),
            updated_at: access_end_at - Duration::weeks(5),
        }
    }
}

#[cfg(test)]
mod grace_boundary_tests {
    use super::fixtures::*;
    use crate::memberships::{compute_grace_end, is_within_grace};
    use time::macros::datetime;

    // A payment at the exact grace end still counts as a renewal.
    #[test]
    fn payment_at_exact_grace_end_is_a_renewal() {
        let m = membership(1, 10, datetime!(2026-04-01 00:00 UTC));
        assert!(is_within_grace(&m, datetime!(2026-04-02 00:00 UTC), 1));
    }

    // One second past grace end and the renewal price is gone.
    #[test]
    fn payment_one_second_after_grace_is_not_a_renewal() {
        let m = membership(1, 10, datetime!(2026-04-01 00:00 UTC));
        assert!(!is_within_grace(&m, datetime!(2026-04-02 00:00:01 UTC), 1));
    }

    // Grace softens the renewal price only. A member whose access window
    // has ended is expired on the next sweep even while grace is still
    // running.
    #[test]
    fn grace_does_not_defer_expiry() {
        let m = membership(1, 10, datetime!(2026-04-01 00:00 UTC));
        let mid_grace = datetime!(2026-04-01 12:00 UTC);
        assert!(crate::memberships::access_has_ended(&m, mid_grace));
        assert!(is_within_grace(&m, mid_grace, 1));
    }

    #[test]
    fn access_still_running_is_not_expired() {
        let m = membership(1, 10, datetime!(2026-04-01 00:00 UTC));
        let before = datetime!(2026-03-31 23:59 UTC);
        assert!(!crate::memberships::access_has_ended(&m, before));
    }

    // Zero grace days collapses the window to the access end instant.
    #[test]
    fn zero_grace_days_means_grace_equals_access_end() {
        let end = datetime!(2026-04-01 00:00 UTC);
        assert_eq!(compute_grace_end(end, 0), end);
        let m = membership(1, 10, end);
        assert!(is_within_grace(&m, end, 0));
        assert!(!is_within_grace(&m, datetime!(2026-04-01 00:00:01 UTC), 0));
    }
}

#[cfg(test)]
mod pay_later_tests {
    use super::fixtures::*;
    use crate::memberships::{plan_pay_later, PayLaterRefusal};
    use time::macros::datetime;

    // Requesting again after a granted deferral is refused, because the
    // extended access now covers the flow start.
    #[test]
    fn repeated_request_becomes_renewal_not_required() {
        let flow = flow(2, false, datetime!(2026-04-10 00:00 UTC), 5);
        let mut m = membership(1, 10, datetime!(2026-04-05 00:00 UTC));
        let now = datetime!(2026-04-04 00:00 UTC);

        let plan = plan_pay_later(Some(&m), Some(&flow), now, &settings()).unwrap();
        m.access_end_at = plan.access_end_at;
        m.grace_end_at = plan.grace_end_at;

        let second = plan_pay_later(Some(&m), Some(&flow), now, &settings());
        assert_eq!(second, Err(PayLaterRefusal::RenewalNotRequired));
    }

    // A request at the flow's exact start instant is too late.
    #[test]
    fn request_at_flow_start_instant_is_refused() {
        let flow = flow(2, false, datetime!(2026-04-10 00:00 UTC), 5);
        let m = membership(1, 10, datetime!(2026-04-05 00:00 UTC));
        let refusal = plan_pay_later(
            Some(&m),
            Some(&flow),
            datetime!(2026-04-10 00:00 UTC),
            &settings(),
        );
        assert_eq!(refusal, Err(PayLaterRefusal::FlowAlreadyStarted));
    }

    // Access ending exactly at the flow start needs no deferral.
    #[test]
    fn access_ending_exactly_at_start_needs_no_deferral() {
        let flow = flow(2, false, datetime!(2026-04-10 00:00 UTC), 5);
        let m = membership(1, 10, datetime!(2026-04-10 00:00 UTC));
        let refusal = plan_pay_later(
            Some(&m),
            Some(&flow),
            datetime!(2026-04-01 00:00 UTC),
            &settings(),
        );
        assert_eq!(refusal, Err(PayLaterRefusal::RenewalNotRequired));
    }
}

#[cfg(test)]
mod pricing_promo_tests {
    use super::fixtures::*;
    use crate::pricing::{base_price, classify, PriceClass};
    use crate::promos::discounted_price;
    use crate::types::PromoKind;
    use time::macros::datetime;

    // An expired member inside grace still pays the renewal price.
    #[test]
    fn grace_keeps_the_renewal_price() {
        let m = membership(1, 10, datetime!(2026-04-01 00:00 UTC));
        let class = classify(Some(&m), datetime!(2026-04-02 00:00 UTC), 1);
        assert_eq!(class, PriceClass::Renewal);
    }

    // Past grace the member falls back to the intro price.
    #[test]
    fn past_grace_costs_the_intro_price() {
        let m = membership(1, 10, datetime!(2026-04-01 00:00 UTC));
        let class = classify(Some(&m), datetime!(2026-04-05 00:00 UTC), 1);
        assert_eq!(class, PriceClass::Intro);
    }

    // A fixed discount larger than the price floors at zero, never
    // negative.
    #[test]
    fn oversized_fixed_discount_floors_at_zero() {
        assert_eq!(discounted_price(PromoKind::Fixed, 5000, 1990), 0);
    }

    // Promo discounts compose with the renewal price, not only intro.
    #[test]
    fn percent_promo_applies_to_renewal_price() {
        let s = settings();
        let base = base_price(PriceClass::Renewal, &s);
        assert_eq!(discounted_price(PromoKind::Percent, 50, base), 995);
    }

    // 100 percent promo yields a zero quote, which skips checkout.
    #[test]
    fn full_percent_promo_reaches_zero() {
        assert_eq!(discounted_price(PromoKind::Percent, 100, 2990), 0);
    }
}

#[cfg(test)]
mod sales_window_tests {
    use super::fixtures::*;
    use crate::flows::sales_window_for_start;
    use time::macros::datetime;
    use time::Duration;

    // The window is exactly one week on each side of the start.
    #[test]
    fn window_is_symmetric_around_start() {
        let start = datetime!(2026-04-10 00:00 UTC);
        let (open, close) = sales_window_for_start(start);
        assert_eq!(open, start - Duration::days(7));
        assert_eq!(close, start + Duration::days(7));
    }

    // Moving a flow's dates moves the window with it.
    #[test]
    fn window_follows_the_start_date() {
        let f = flow(1, false, datetime!(2026-04-10 00:00 UTC), 5);
        let moved = flow(1, false, datetime!(2026-04-17 00:00 UTC), 5);
        assert_eq!(
            moved.sales_open_at - f.sales_open_at,
            Duration::days(7)
        );
        assert_eq!(
            moved.sales_close_at - f.sales_close_at,
            Duration::days(7)
        );
    }
}

#[cfg(test)]
mod early_payment_tests {
    use super::fixtures::*;
    use crate::payments::{is_early_full_payment, pick_target_flow};
    use time::macros::datetime;

    // Intro price before the free flow starts makes an early purchase.
    #[test]
    fn intro_price_before_free_start_is_early() {
        let free = flow(1, true, datetime!(2026-03-02 00:00 UTC), 4);
        assert!(is_early_full_payment(
            2990,
            &settings(),
            Some(&free),
            datetime!(2026-02-25 00:00 UTC)
        ));
    }

    // The discounted intro amount no longer matches, so a promo purchase
    // is never treated as early even before the free flow starts.
    #[test]
    fn discounted_amount_is_not_early() {
        let free = flow(1, true, datetime!(2026-03-02 00:00 UTC), 4);
        assert!(!is_early_full_payment(
            1495,
            &settings(),
            Some(&free),
            datetime!(2026-02-25 00:00 UTC)
        ));
    }

    // A frozen flow id on the payment beats every runtime resolution.
    #[test]
    fn frozen_flow_id_wins_resolution() {
        assert_eq!(pick_target_flow(Some(9), Some(1), Some(2), Some(3)), Some(9));
    }

    // With nothing to resolve the payment must be parked, not guessed.
    #[test]
    fn empty_resolution_chain_yields_none() {
        assert_eq!(pick_target_flow(None, None, None, None), None);
    }
}

#[cfg(test)]
mod mailing_tests {
    use crate::access::testing::RecordingNotifier;
    use crate::mailings::{auto_key, end_offset_template, send_bulk};
    use time::macros::date;

    // Same template, flow and day always produce the same key, so a
    // restarted sweep cannot double-send.
    #[test]
    fn auto_key_collides_for_same_day_resend() {
        let a = auto_key("paid_end_minus_1", 5, date!(2026 - 05 - 01));
        let b = auto_key("paid_end_minus_1", 5, date!(2026 - 05 - 01));
        assert_eq!(a, b);
    }

    // Free-flow offsets never fire for paid flows and vice versa.
    #[test]
    fn offsets_do_not_cross_tiers() {
        assert_eq!(end_offset_template(false, 7), None);
        assert_eq!(end_offset_template(true, 1), None);
    }

    // Every recipient after a failure still gets the message.
    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_the_blast() {
        let notifier = RecordingNotifier::failing_for(&[1, 2]);
        let report = send_bulk(&notifier, &[1, 2, 3, 4, 5], "text").await;
        assert_eq!(report.attempted, 5);
        assert_eq!(report.failed, 2);
        assert_eq!(notifier.sent_to(), vec![3, 4, 5]);
    }

    // An empty recipient list is a clean no-op.
    #[tokio::test(start_paused = true)]
    async fn empty_recipient_list_sends_nothing() {
        let notifier = RecordingNotifier::default();
        let report = send_bulk(&notifier, &[], "text").await;
        assert_eq!(report.attempted, 0);
        assert!(notifier.sent_to().is_empty());
    }
}

#[cfg(test)]
mod best_effort_tests {
    use crate::access::BestEffort;

    #[test]
    fn ok_carries_its_value() {
        assert_eq!(BestEffort::Ok(7).ok(), Some(7));
        assert!(!BestEffort::Ok(7).is_failed());
    }

    #[test]
    fn failed_is_empty_and_flagged() {
        assert_eq!(BestEffort::<i64>::Failed.ok(), None);
        assert!(BestEffort::<i64>::Failed.is_failed());
    }
}
