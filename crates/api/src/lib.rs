// API crate clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Postwise API
//!
//! HTTP surface of the entitlement engine: entitlement reads, admin
//! overrides, credit application, AI session lifecycle, consistency
//! inspection, and the self-test endpoint.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::ApiError;
pub use state::AppState;
