//! Credit application endpoint

use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use postwise_shared::CreditReason;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// Request to apply credits to a wallet
#[derive(Debug, Deserialize)]
pub struct ApplyCreditsRequest {
    pub amount: i64,
    /// purchase, admin_adjustment, promo, or refund
    pub reason: String,
    /// Defaults to the caller; a different target requires admin
    pub target_user_id: Option<Uuid>,
}

/// Response after applying credits
#[derive(Debug, Serialize)]
pub struct ApplyCreditsResponse {
    pub ledger_entry_id: Uuid,
    pub balance_credits: i64,
    pub lifetime_credits: i64,
}

/// Apply credits to a wallet. `admin_adjustment` and cross-user targets
/// are admin-only; every grant is one immutable ledger row.
pub async fn apply_credits(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ApplyCreditsRequest>,
) -> Result<Json<ApplyCreditsResponse>, ApiError> {
    let reason: CreditReason = req
        .reason
        .parse()
        .map_err(|e: String| ApiError::Validation(e))?;
    let target = req.target_user_id.unwrap_or(auth_user.user_id);

    let entry = state
        .engine
        .ledger
        .apply_credits(target, req.amount, reason, auth_user.user_id, auth_user.role)
        .await?;

    let wallet = state.engine.ledger.wallet(target).await?;

    Ok(Json(ApplyCreditsResponse {
        ledger_entry_id: entry.id,
        balance_credits: wallet.balance_credits,
        lifetime_credits: wallet.lifetime_credits,
    }))
}
