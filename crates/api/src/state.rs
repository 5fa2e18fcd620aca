//! Application state

use sqlx::PgPool;
use std::sync::Arc;

use postwise_entitlement::EntitlementEngine;

use crate::auth::{AuthState, JwtManager};
use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub jwt_manager: JwtManager,
    pub engine: Arc<EntitlementEngine>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret);
        let engine = Arc::new(EntitlementEngine::from_env(pool.clone()));

        Self {
            pool,
            config,
            jwt_manager,
            engine,
        }
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt_manager.clone(),
            pool: self.pool.clone(),
        }
    }
}
