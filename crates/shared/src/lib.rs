// Shared crate clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Common types used across Postwise
//!
//! ID wrappers, plan tiers and their static limits, subscription status,
//! and the calendar-month key used by usage counters.

pub mod models;
pub mod month;
pub mod types;

pub use models::{
    AiSession, LedgerEntry, OverrideAuditEntry, PlanOverride, SessionState, Subscription, User,
    UsageCounter, Wallet,
};
pub use month::YearMonth;
pub use types::{
    CaseId, CreditReason, LedgerAction, Limit, PlanTier, SessionId, SubscriptionStatus, UserId,
    UserRole, UNLIMITED_SENTINEL,
};
