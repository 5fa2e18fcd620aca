//! Entitlement error taxonomy
//!
//! Every failure surfaced by the engine carries a stable machine-readable
//! code; the API layer maps these onto HTTP statuses without inspecting
//! message text.

use thiserror::Error;

/// Errors produced by the entitlement engine
#[derive(Debug, Error)]
pub enum EntitlementError {
    /// Authenticated but not allowed: non-admin touching another user,
    /// or usage attempted while billing access is blocked.
    #[error("Not authorized to perform this action")]
    Forbidden,

    #[error("Insufficient credits")]
    InsufficientCredits,

    #[error("An active AI session already exists for this case")]
    SessionAlreadyActive,

    #[error("Monthly quota exceeded")]
    QuotaExceeded,

    #[error("Validation error: {0}")]
    Validation(String),

    /// Billing provider timeout or error during an explicit sync.
    /// Read-only entitlement checks never surface this; they degrade to
    /// the free plan instead.
    #[error("Billing provider unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EntitlementError {
    /// Stable error code for API responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Forbidden => "FORBIDDEN",
            Self::InsufficientCredits => "INSUFFICIENT_CREDITS",
            Self::SessionAlreadyActive => "SESSION_ALREADY_ACTIVE",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            Self::Database(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller can fix this by upgrading or paying.
    pub fn suggests_upgrade(&self) -> bool {
        matches!(self, Self::InsufficientCredits | Self::QuotaExceeded)
    }
}

impl From<sqlx::Error> for EntitlementError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<stripe::StripeError> for EntitlementError {
    fn from(e: stripe::StripeError) -> Self {
        Self::UpstreamUnavailable(e.to_string())
    }
}

pub type EntitlementResult<T> = Result<T, EntitlementError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_codes() {
        assert_eq!(EntitlementError::Forbidden.code(), "FORBIDDEN");
        assert_eq!(
            EntitlementError::InsufficientCredits.code(),
            "INSUFFICIENT_CREDITS"
        );
        assert_eq!(
            EntitlementError::SessionAlreadyActive.code(),
            "SESSION_ALREADY_ACTIVE"
        );
        assert_eq!(EntitlementError::QuotaExceeded.code(), "QUOTA_EXCEEDED");
        assert_eq!(
            EntitlementError::Validation("x".into()).code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            EntitlementError::UpstreamUnavailable("t".into()).code(),
            "UPSTREAM_UNAVAILABLE"
        );
        assert_eq!(
            EntitlementError::Database("d".into()).code(),
            "INTERNAL_ERROR"
        );
    }

    #[test]
    fn test_upgrade_prompt_errors() {
        assert!(EntitlementError::InsufficientCredits.suggests_upgrade());
        assert!(EntitlementError::QuotaExceeded.suggests_upgrade());
        assert!(!EntitlementError::Forbidden.suggests_upgrade());
        assert!(!EntitlementError::Validation("v".into()).suggests_upgrade());
    }
}
