//! Case-creation quota gate
//!
//! The document pipeline calls this before accepting an upload. The claim
//! is a single conditional increment, so a monthly quota of N admits
//! exactly N concurrent claims.

use axum::{extract::State, Extension, Json};
use serde::Serialize;

use postwise_entitlement::QuotaDecision;
use postwise_shared::Limit;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// Response for a successful case claim
#[derive(Debug, Serialize)]
pub struct ClaimCaseResponse {
    pub cases_used: i32,
    pub limit: Limit,
}

/// Read-only quota check: would a case creation be allowed right now?
pub async fn check_quota(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<QuotaDecision>, ApiError> {
    let decision = state
        .engine
        .counters
        .check_case_quota(auth_user.user_id)
        .await?;
    Ok(Json(decision))
}

/// Claim one case slot against the caller's monthly quota.
pub async fn claim_case(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<ClaimCaseResponse>, ApiError> {
    let cases_used = state.engine.counters.claim_case(auth_user.user_id).await?;
    let plan = state.engine.cached_plan(auth_user.user_id).await;

    Ok(Json(ClaimCaseResponse {
        cases_used,
        limit: plan.tier.monthly_case_limit(),
    }))
}
