//! Authentication middleware for Axum

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use postwise_shared::UserRole;

use super::jwt::JwtManager;
use crate::error::ApiError;

/// Authenticated caller, attached as a request extension
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: UserRole,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    /// Gate for admin-only operations.
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }

    /// Resolve an optional target: admins may act on anyone, everyone
    /// else only on themselves.
    pub fn resolve_target(&self, target: Option<Uuid>) -> Result<Uuid, ApiError> {
        match target {
            None => Ok(self.user_id),
            Some(t) if t == self.user_id => Ok(self.user_id),
            Some(t) => {
                self.require_admin()?;
                Ok(t)
            }
        }
    }
}

/// State needed for authentication
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
    pub pool: PgPool,
}

/// Extract bearer token from the Authorization header
fn extract_bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(String::from)
}

/// Middleware that requires authentication
///
/// Verifies the bearer token, loads the caller's role from the users
/// table (the admin predicate is ours, never the token's), and attaches
/// an [`AuthUser`] extension.
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer_token(&request) else {
        return unauthorized("Missing bearer token");
    };

    let Some(claims) = auth_state.jwt_manager.verify(&token) else {
        return unauthorized("Invalid or expired token");
    };

    let Some(user_id) = claims.user_id() else {
        return unauthorized("Token subject is not a user id");
    };

    // Role lookup by stable identifier; unknown users are plain users.
    let role = match sqlx::query_as::<_, (String,)>("SELECT role FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&auth_state.pool)
        .await
    {
        Ok(row) => row
            .map(|(r,)| UserRole::from_str_lossy(&r))
            .unwrap_or_default(),
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Role lookup failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": { "code": "INTERNAL_ERROR", "message": "Internal server error" }
                })),
            )
                .into_response();
        }
    };

    request.extensions_mut().insert(AuthUser {
        user_id,
        email: claims.email,
        role,
    });

    next.run(request).await
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": { "code": "UNAUTHORIZED", "message": message }
        })),
    )
        .into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn auth_user(role: UserRole) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            email: None,
            role,
        }
    }

    #[test]
    fn test_require_admin() {
        assert!(auth_user(UserRole::Admin).require_admin().is_ok());
        assert!(matches!(
            auth_user(UserRole::User).require_admin(),
            Err(ApiError::Forbidden)
        ));
    }

    #[test]
    fn test_resolve_target_self_allowed() {
        let user = auth_user(UserRole::User);
        assert_eq!(user.resolve_target(None).unwrap(), user.user_id);
        assert_eq!(
            user.resolve_target(Some(user.user_id)).unwrap(),
            user.user_id
        );
    }

    #[test]
    fn test_resolve_target_other_requires_admin() {
        let user = auth_user(UserRole::User);
        let other = Uuid::new_v4();
        assert!(matches!(
            user.resolve_target(Some(other)),
            Err(ApiError::Forbidden)
        ));

        let admin = auth_user(UserRole::Admin);
        assert_eq!(admin.resolve_target(Some(other)).unwrap(), other);
    }
}
