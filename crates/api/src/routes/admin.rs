//! Admin endpoints: overrides, inspection, self-test

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use postwise_entitlement::{ApplyOverrideParams, ConsistencyReport, SelfTestSummary};
use postwise_shared::models::{OverrideAuditEntry, PlanOverride};
use postwise_shared::PlanTier;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// Request to apply a plan override
#[derive(Debug, Deserialize)]
pub struct ApplyOverrideRequest {
    pub user_id: Uuid,
    pub plan_code: String,
    /// Defaults to true; false pre-stages a disabled override
    pub is_active: Option<bool>,
    pub expires_at: Option<OffsetDateTime>,
    pub reason: String,
}

/// Override row as returned to admins
#[derive(Debug, Serialize)]
pub struct OverrideResponse {
    pub user_id: Uuid,
    pub plan_code: String,
    pub is_active: bool,
    pub expires_at: Option<OffsetDateTime>,
    pub reason: String,
    pub updated_at: OffsetDateTime,
}

impl From<PlanOverride> for OverrideResponse {
    fn from(row: PlanOverride) -> Self {
        Self {
            user_id: row.user_id,
            plan_code: row.plan_code,
            is_active: row.is_active,
            expires_at: row.expires_at,
            reason: row.reason,
            updated_at: row.updated_at,
        }
    }
}

/// Apply (or re-apply) a plan override for a user. Every call appends an
/// audit entry, including no-op re-applies.
pub async fn apply_override(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ApplyOverrideRequest>,
) -> Result<Json<OverrideResponse>, ApiError> {
    auth_user.require_admin()?;

    let plan_code: PlanTier = req
        .plan_code
        .parse()
        .map_err(|e: String| ApiError::Validation(e))?;

    let row = state
        .engine
        .overrides
        .apply(
            ApplyOverrideParams {
                target_user_id: req.user_id,
                plan_code,
                is_active: req.is_active.unwrap_or(true),
                expires_at: req.expires_at,
                reason: req.reason,
            },
            auth_user.user_id,
            auth_user.role,
        )
        .await?;

    state.engine.cache.invalidate(req.user_id).await;

    Ok(Json(row.into()))
}

/// Deactivate a user's override. The next resolution falls back to the
/// billing-derived or free plan immediately.
pub async fn remove_override(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<OverrideResponse>, ApiError> {
    auth_user.require_admin()?;

    let row = state
        .engine
        .overrides
        .remove(user_id, auth_user.user_id, auth_user.role, "override removed")
        .await?;

    state.engine.cache.invalidate(user_id).await;

    Ok(Json(row.into()))
}

/// Audit trail for a user's override history, newest first.
pub async fn override_audit(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<OverrideAuditEntry>>, ApiError> {
    auth_user.require_admin()?;
    let entries = state.engine.overrides.audit_trail(user_id, 100).await?;
    Ok(Json(entries))
}

/// Consistency report for the caller's own account.
pub async fn inspect_self(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<ConsistencyReport>, ApiError> {
    let report = state.engine.inspector.inspect(auth_user.user_id).await?;
    Ok(Json(report))
}

/// Consistency report for any account (admin only).
pub async fn inspect_target(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ConsistencyReport>, ApiError> {
    auth_user.resolve_target(Some(user_id))?;
    let report = state.engine.inspector.inspect(user_id).await?;
    Ok(Json(report))
}

/// Run the accounting self-test harness against synthetic users.
pub async fn run_selftest(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<SelfTestSummary>, ApiError> {
    auth_user.require_admin()?;
    let summary = state.engine.selftest.run_all().await;
    Ok(Json(summary))
}
