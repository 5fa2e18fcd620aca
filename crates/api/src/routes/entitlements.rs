//! Entitlement read endpoint

use axum::{extract::State, Extension, Json};
use serde::Serialize;
use time::OffsetDateTime;

use postwise_entitlement::PlanSource;
use postwise_shared::{Limit, PlanTier, SubscriptionStatus, UserRole, YearMonth};

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// Normalized limits block; each value is an integer or "unlimited"
#[derive(Debug, Serialize)]
pub struct LimitsBlock {
    pub cases: Limit,
    pub credits: Limit,
    pub messages: Limit,
}

/// Current-month usage block
#[derive(Debug, Serialize)]
pub struct UsageBlock {
    pub cases_used: i32,
    pub credits_used: i32,
    pub messages_used: i64,
    pub ai_sessions_started: i32,
}

/// Response for `GET /api/entitlements`
#[derive(Debug, Serialize)]
pub struct EntitlementsResponse {
    pub role: UserRole,
    pub plan: PlanTier,
    pub plan_source: PlanSource,
    pub status: SubscriptionStatus,
    pub access_blocked: bool,
    pub current_period_end: Option<OffsetDateTime>,
    pub limits: LimitsBlock,
    pub usage: UsageBlock,
}

/// The resolved plan plus remaining-resource snapshot for the caller.
/// Served through the entitlement cache; a failed revalidation falls
/// back to the last known-good plan rather than blocking.
pub async fn get_entitlements(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<EntitlementsResponse>, ApiError> {
    let user_id = auth_user.user_id;
    let plan = state.engine.cached_plan(user_id).await;

    let ym = YearMonth::current();
    let counter = state.engine.counters.current(user_id, &ym).await?;
    let wallet = state.engine.ledger.wallet(user_id).await?;
    let messages_used = state
        .engine
        .sessions
        .month_message_count(user_id, &ym)
        .await?;

    let plan_limits = plan.limits();
    let credits = if plan.tier.bypasses_credits() {
        Limit::Unlimited
    } else {
        // Spendable balance doubles as the credit ceiling.
        Limit::Bounded(wallet.balance_credits.clamp(0, i64::from(u32::MAX)) as u32)
    };

    Ok(Json(EntitlementsResponse {
        role: auth_user.role,
        plan: plan.tier,
        plan_source: plan.source,
        status: plan.status,
        access_blocked: plan.access_blocked,
        current_period_end: plan.current_period_end,
        limits: LimitsBlock {
            cases: plan_limits.cases,
            credits,
            messages: plan_limits.messages,
        },
        usage: UsageBlock {
            cases_used: counter.cases_created,
            credits_used: counter.credits_spent,
            messages_used,
            ai_sessions_started: counter.ai_sessions_started,
        },
    }))
}
