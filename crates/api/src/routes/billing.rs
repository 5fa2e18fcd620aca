//! Explicit billing sync endpoint

use axum::{extract::State, Extension, Json};
use serde::Serialize;
use time::OffsetDateTime;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// Response for an explicit sync
#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub plan_key: String,
    pub status: String,
    pub access_blocked: bool,
    pub current_period_end: Option<OffsetDateTime>,
}

/// Pull current subscription state from the billing provider and persist
/// the mirror. Provider failures surface as 503 here — an explicit sync
/// never silently downgrades persisted state.
pub async fn sync_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<SyncResponse>, ApiError> {
    let sync = state
        .engine
        .sync
        .as_ref()
        .ok_or_else(|| ApiError::UpstreamUnavailable("Billing sync not configured".to_string()))?;

    let subscription = sync.sync(auth_user.user_id).await?;

    // The mirror changed; the next entitlement read must see it.
    state.engine.cache.invalidate(auth_user.user_id).await;

    Ok(Json(SyncResponse {
        plan_key: subscription.plan_key,
        status: subscription.status,
        access_blocked: subscription.access_blocked,
        current_period_end: subscription.current_period_end,
    }))
}
