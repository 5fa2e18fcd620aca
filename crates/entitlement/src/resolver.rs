//! Plan resolution
//!
//! Combines the override store, the billing mirror, and the free default
//! into one effective plan. The precedence decision itself is a pure
//! function over immutable inputs; the service wrapper only loads rows.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use postwise_shared::models::{PlanOverride, Subscription};
use postwise_shared::{PlanTier, SubscriptionStatus};

use crate::error::EntitlementResult;
use crate::plan::{EffectivePlan, PlanSource};

/// Resolves the effective plan for a user.
///
/// Precedence, strictly in order: active non-expired override, then an
/// entitling (or still-paid-up) subscription, then `free`.
#[derive(Clone)]
pub struct PlanResolver {
    pool: PgPool,
}

/// Pure precedence function. Both inputs are immutable snapshots; the
/// result depends only on them and `now`, so tests construct inputs
/// directly.
pub fn resolve_effective(
    override_row: Option<&PlanOverride>,
    subscription: Option<&Subscription>,
    now: OffsetDateTime,
) -> EffectivePlan {
    // 1. An effective override wins outright, regardless of billing state.
    if let Some(ov) = override_row {
        if ov.is_effective(now) {
            if let Ok(tier) = ov.plan_code.parse::<PlanTier>() {
                return EffectivePlan {
                    tier,
                    source: PlanSource::Override,
                    status: subscription
                        .map(|s| SubscriptionStatus::from_str_lossy(&s.status))
                        .unwrap_or_default(),
                    access_blocked: false,
                    current_period_end: subscription.and_then(|s| s.current_period_end),
                    degraded: false,
                };
            }
            tracing::warn!(
                user_id = %ov.user_id,
                plan_code = %ov.plan_code,
                "Ignoring override with unparseable plan code"
            );
        }
    }

    // 2. Billing-derived plan.
    if let Some(sub) = subscription {
        let status = SubscriptionStatus::from_str_lossy(&sub.status);
        let tier = sub.plan_key.parse::<PlanTier>().unwrap_or_default();
        let period_open = sub.current_period_end.map_or(false, |end| end > now);

        let billing_plan = |access_blocked: bool| EffectivePlan {
            tier,
            source: PlanSource::Billing,
            status,
            access_blocked,
            current_period_end: sub.current_period_end,
            degraded: false,
        };

        match status {
            SubscriptionStatus::Active | SubscriptionStatus::Trialing => {
                return billing_plan(false);
            }
            // Plan is known but unpaid: keep the tier, refuse usage.
            // A delinquent subscription with no recorded period end is
            // still reported (blocked) rather than dropped to free.
            SubscriptionStatus::PastDue | SubscriptionStatus::Unpaid => {
                if sub.current_period_end.is_none() || period_open {
                    return billing_plan(true);
                }
            }
            SubscriptionStatus::Canceled => {
                if period_open {
                    return billing_plan(false);
                }
            }
            SubscriptionStatus::Inactive => {}
        }
    }

    // 3. Nobody pays: free.
    EffectivePlan::free()
}

impl PlanResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve, surfacing store errors to the caller.
    pub async fn try_resolve(&self, user_id: Uuid) -> EntitlementResult<EffectivePlan> {
        let override_row: Option<PlanOverride> =
            sqlx::query_as("SELECT * FROM plan_overrides WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let subscription: Option<Subscription> =
            sqlx::query_as("SELECT * FROM subscriptions WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(resolve_effective(
            override_row.as_ref(),
            subscription.as_ref(),
            OffsetDateTime::now_utc(),
        ))
    }

    /// Resolve, degrading to the free plan if a store is unreachable.
    /// Never silently grants an elevated plan on error.
    pub async fn resolve(&self, user_id: Uuid) -> EffectivePlan {
        match self.try_resolve(user_id).await {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Plan resolution degraded to free (store unreachable)"
                );
                EffectivePlan::degraded_free()
            }
        }
    }
}
