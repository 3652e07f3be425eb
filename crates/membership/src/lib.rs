// Membership crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::too_many_arguments)] // Reconciliation entry points thread several seams
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! FlowClub Membership Module
//!
//! Core domain logic for a cohort-based paid community: flows, memberships,
//! payments, promos, and the mailings that glue the lifecycle together.
//!
//! ## Features
//!
//! - **Membership Lifecycle**: Grant, expire, extend, and defer with pay-later
//! - **Payment Reconciliation**: Idempotent confirmation from webhook or poll
//! - **Pricing**: Intro vs renewal price with a grace window and promo codes
//! - **Flows**: Cohort scheduling with a fixed sales window per flow
//! - **Mailings**: Keyed, rate-limited blasts tied to flow boundaries
//! - **Admin Actions**: A closed, fully audited set of operator mutations

pub mod access;
pub mod admin;
pub mod audit;
pub mod error;
pub mod flows;
pub mod invariants;
pub mod jobs;
pub mod mailings;
pub mod memberships;
pub mod payments;
pub mod pricing;
pub mod promos;
pub mod provider;
pub mod settings;
pub mod telegram;
pub mod templates;
pub mod types;
pub mod users;
pub mod yookassa;

#[cfg(test)]
mod edge_case_tests;

// Access seams
pub use access::{AccessGateway, AccessLinks, BestEffort, Notifier};

// Admin
pub use admin::{execute as execute_admin_action, ActionOutcome, AdminAction};

// Error
pub use error::{ClubError, ClubResult};

// Flows
pub use flows::{duration_weeks, sales_window_for_start};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Jobs
pub use jobs::SweepSummary;

// Mailings
pub use mailings::{Audience, SendReport};

// Memberships
pub use memberships::{EnrollRefusal, PayLaterPlan, PayLaterRefusal};

// Payments
pub use payments::{Checkout, ConfirmOutcome, ConfirmPlan};

// Pricing
pub use pricing::PriceClass;

// Provider
pub use provider::{CreatedPayment, PaymentProvider, ProviderPaymentStatus, ProviderRecord};

// Settings
pub use settings::{EffectiveSettings, SettingsDefaults, SettingsResolver};

// Telegram
pub use telegram::TelegramClient;

// Types
pub use types::{
    AuditEntry, Flow, Membership, MembershipStatus, MessageTemplate, Payment, PaymentStatus,
    PromoCode, PromoKind, User, UserPromo,
};

// YooKassa
pub use yookassa::YookassaAdapter;
