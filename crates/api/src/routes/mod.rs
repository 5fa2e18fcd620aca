//! Route wiring

pub mod admin;
pub mod billing;
pub mod cases;
pub mod credits;
pub mod entitlements;
pub mod sessions;

use axum::{
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::require_auth;
use crate::state::AppState;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    let authed = Router::new()
        .route("/api/entitlements", get(entitlements::get_entitlements))
        .route("/api/billing/sync", post(billing::sync_subscription))
        .route("/api/cases/quota", get(cases::check_quota))
        .route("/api/cases/claim", post(cases::claim_case))
        .route("/api/credits/apply", post(credits::apply_credits))
        .route("/api/ai/sessions", post(sessions::start_session))
        .route(
            "/api/ai/sessions/{session_id}/messages",
            post(sessions::extend_session),
        )
        .route(
            "/api/ai/sessions/{session_id}/close",
            post(sessions::close_session),
        )
        .route("/api/inspect", get(admin::inspect_self))
        .route("/api/admin/overrides", post(admin::apply_override))
        .route(
            "/api/admin/overrides/{user_id}",
            delete(admin::remove_override),
        )
        .route(
            "/api/admin/overrides/{user_id}/audit",
            get(admin::override_audit),
        )
        .route("/api/admin/inspect/{user_id}", get(admin::inspect_target))
        .route("/api/admin/selftest", post(admin::run_selftest))
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth));

    Router::new()
        .route("/health", get(health))
        .merge(authed)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Liveness probe
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
