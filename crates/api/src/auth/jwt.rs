//! Bearer-token verification
//!
//! Tokens are issued by the external identity provider and verified
//! locally against a shared HS256 secret. Verification yields a stable
//! user id and email; roles live in our own users table, never in the
//! token.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

/// Claims we read from identity-provider tokens
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    /// Stable user identifier
    pub sub: String,
    pub email: Option<String>,
    /// Expiry (unix seconds), enforced by the decoder
    #[allow(dead_code)]
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }
}

/// Verifies bearer tokens against the identity provider's secret
#[derive(Clone)]
pub struct JwtManager {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        // Identity providers vary in the audiences they stamp; we key
        // trust on the shared secret alone.
        validation.validate_aud = false;
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify a token and return its claims, or None for anything
    /// malformed, forged, or expired.
    pub fn verify(&self, token: &str) -> Option<Claims> {
        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!(error = %e, "Token verification failed");
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;
    use time::OffsetDateTime;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        email: Option<String>,
        exp: i64,
    }

    fn token(secret: &str, sub: &str, exp_offset_secs: i64) -> String {
        let claims = TestClaims {
            sub: sub.to_string(),
            email: Some("user@example.com".to_string()),
            exp: OffsetDateTime::now_utc().unix_timestamp() + exp_offset_secs,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_verifies() {
        let manager = JwtManager::new("test-secret");
        let user_id = Uuid::new_v4();
        let claims = manager
            .verify(&token("test-secret", &user_id.to_string(), 3600))
            .unwrap();
        assert_eq!(claims.user_id(), Some(user_id));
        assert_eq!(claims.email.as_deref(), Some("user@example.com"));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let manager = JwtManager::new("test-secret");
        let t = token("other-secret", &Uuid::new_v4().to_string(), 3600);
        assert!(manager.verify(&t).is_none());
    }

    #[test]
    fn test_expired_token_rejected() {
        let manager = JwtManager::new("test-secret");
        let t = token("test-secret", &Uuid::new_v4().to_string(), -3600);
        assert!(manager.verify(&t).is_none());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let manager = JwtManager::new("test-secret");
        assert!(manager.verify("not-a-jwt").is_none());
    }

    #[test]
    fn test_non_uuid_subject_yields_no_user_id() {
        let manager = JwtManager::new("test-secret");
        let claims = manager.verify(&token("test-secret", "service-account", 3600));
        assert!(claims.unwrap().user_id().is_none());
    }
}
