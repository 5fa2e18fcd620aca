//! API error type and HTTP mapping
//!
//! Stable machine-readable codes in every error body; quota and credit
//! refusals additionally carry an `action` hint so the UI can show an
//! upgrade prompt instead of a generic failure.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use postwise_entitlement::EntitlementError;

/// Errors surfaced to API callers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Not authorized to perform this action")]
    Forbidden,

    #[error("Insufficient credits")]
    InsufficientCredits,

    #[error("An active AI session already exists for this case")]
    SessionAlreadyActive,

    #[error("Monthly quota exceeded")]
    QuotaExceeded,

    #[error("{0}")]
    Validation(String),

    #[error("Billing provider unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
            Self::SessionAlreadyActive => StatusCode::CONFLICT,
            Self::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::InsufficientCredits => "INSUFFICIENT_CREDITS",
            Self::SessionAlreadyActive => "SESSION_ALREADY_ACTIVE",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the UI should offer a plan upgrade for this failure.
    pub fn suggests_upgrade(&self) -> bool {
        matches!(self, Self::InsufficientCredits | Self::QuotaExceeded)
    }
}

impl From<EntitlementError> for ApiError {
    fn from(e: EntitlementError) -> Self {
        match e {
            EntitlementError::Forbidden => Self::Forbidden,
            EntitlementError::InsufficientCredits => Self::InsufficientCredits,
            EntitlementError::SessionAlreadyActive => Self::SessionAlreadyActive,
            EntitlementError::QuotaExceeded => Self::QuotaExceeded,
            EntitlementError::Validation(msg) => Self::Validation(msg),
            EntitlementError::UpstreamUnavailable(msg) => Self::UpstreamUnavailable(msg),
            EntitlementError::Database(msg) | EntitlementError::Internal(msg) => {
                Self::Internal(msg)
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal details go to the log, not the client.
        if let Self::Internal(detail) = &self {
            tracing::error!(error = %detail, "Internal server error");
        }

        let message = match &self {
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let mut body = json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        });
        if self.suggests_upgrade() {
            body["error"]["action"] = json!("upgrade_plan");
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::InsufficientCredits.status(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ApiError::SessionAlreadyActive.status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::QuotaExceeded.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::UpstreamUnavailable("down".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_engine_error_conversion_preserves_codes() {
        let api: ApiError = EntitlementError::InsufficientCredits.into();
        assert_eq!(api.code(), "INSUFFICIENT_CREDITS");

        let api: ApiError = EntitlementError::SessionAlreadyActive.into();
        assert_eq!(api.code(), "SESSION_ALREADY_ACTIVE");

        let api: ApiError = EntitlementError::Database("boom".into()).into();
        assert_eq!(api.code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_upgrade_prompt_only_for_quota_and_credits() {
        assert!(ApiError::InsufficientCredits.suggests_upgrade());
        assert!(ApiError::QuotaExceeded.suggests_upgrade());
        assert!(!ApiError::Forbidden.suggests_upgrade());
        assert!(!ApiError::UpstreamUnavailable("x".into()).suggests_upgrade());
    }
}
