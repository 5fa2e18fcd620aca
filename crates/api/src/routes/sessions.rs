//! AI session endpoints

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use postwise_shared::models::{AiSession, SessionState};
use postwise_shared::Limit;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// Request to start a session for one case
#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub case_id: Uuid,
}

/// Session view returned by every session endpoint
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub case_id: Uuid,
    pub state: SessionState,
    pub message_count: i32,
    pub max_messages: Limit,
    pub expires_at: OffsetDateTime,
}

impl SessionResponse {
    fn from_session(session: AiSession) -> Self {
        let state = session.state(OffsetDateTime::now_utc());
        Self {
            session_id: session.id,
            case_id: session.case_id,
            state,
            message_count: session.message_count,
            max_messages: session.message_limit(),
            expires_at: session.expires_at,
        }
    }
}

/// Start a session: one credit, charged once, unless the plan bypasses
/// credits. A concurrent start for the same case loses with 409.
pub async fn start_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<StartSessionRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .engine
        .sessions
        .start(auth_user.user_id, req.case_id)
        .await?;
    Ok(Json(SessionResponse::from_session(session)))
}

/// Record one more message. Free: extension never touches the wallet.
pub async fn extend_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .engine
        .sessions
        .extend(session_id, auth_user.user_id)
        .await?;
    Ok(Json(SessionResponse::from_session(session)))
}

/// Explicitly end a session. Idempotent.
pub async fn close_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .engine
        .sessions
        .close(session_id, auth_user.user_id)
        .await?;
    Ok(Json(SessionResponse::from_session(session)))
}
