//! Effective plan model
//!
//! The output of plan resolution: which tier applies, where it came from,
//! and whether usage is currently allowed. Limits come from static tier
//! configuration, already normalized — the legacy numeric sentinel never
//! appears here.

use serde::Serialize;
use time::OffsetDateTime;

use postwise_shared::{Limit, PlanTier, SubscriptionStatus};

/// Which input won the precedence race
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanSource {
    Override,
    Billing,
    Free,
}

/// Static per-tier limits, normalized
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PlanLimits {
    /// Cases that may be created this calendar month
    pub cases: Limit,
    /// Messages allowed within one AI session
    pub messages: Limit,
}

/// The resolved entitlement for one user at one instant
#[derive(Debug, Clone, Serialize)]
pub struct EffectivePlan {
    pub tier: PlanTier,
    pub source: PlanSource,
    pub status: SubscriptionStatus,
    /// Plan is known but payment has lapsed: usage is refused until the
    /// billing provider reports recovery.
    pub access_blocked: bool,
    pub current_period_end: Option<OffsetDateTime>,
    /// True when resolution degraded to `free` because a store was
    /// unreachable.
    #[serde(skip_serializing)]
    pub degraded: bool,
}

impl EffectivePlan {
    pub fn limits(&self) -> PlanLimits {
        PlanLimits {
            cases: self.tier.monthly_case_limit(),
            messages: self.tier.session_message_limit(),
        }
    }

    /// Whether resource-consuming actions are allowed at all right now.
    pub fn usable(&self) -> bool {
        !self.access_blocked
    }

    /// The plan nobody pays for.
    pub fn free() -> Self {
        Self {
            tier: PlanTier::Free,
            source: PlanSource::Free,
            status: SubscriptionStatus::Inactive,
            access_blocked: false,
            current_period_end: None,
            degraded: false,
        }
    }

    /// Fail-open fallback when a backing store is unreachable: the most
    /// restrictive tier, never an elevated one.
    pub fn degraded_free() -> Self {
        Self {
            degraded: true,
            ..Self::free()
        }
    }
}
