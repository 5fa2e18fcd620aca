// Entitlement crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Postwise Entitlement Engine
//!
//! Decides, for any user at any instant, which subscription plan applies
//! and how much of each metered resource remains, while keeping an
//! auditable trail of every credit movement.
//!
//! ## Features
//!
//! - **Plan Resolution**: override > billing > free, as a pure precedence
//!   function over immutable inputs
//! - **Overrides**: admin-assigned plans with an append-only audit trail
//! - **Billing Sync**: mirrors Stripe subscription state with bounded
//!   timeouts; unmapped prices fall back to the cheapest paid tier
//! - **Credit Ledger**: append-only signed deltas, wallet mutated in the
//!   same transaction
//! - **Usage Counters**: per-month atomic increments, implicit rollover
//! - **AI Sessions**: one credit per start, free extension, uniqueness
//!   enforced by a partial index
//! - **Inspection & Self-Test**: read-only reconciliation and a runnable
//!   property harness

pub mod cache;
pub mod client;
pub mod error;
pub mod inspector;
pub mod ledger;
pub mod overrides;
pub mod plan;
pub mod resolver;
pub mod selftest;
pub mod sessions;
pub mod sync;
pub mod usage;

#[cfg(test)]
mod edge_case_tests;

// Cache
pub use cache::EntitlementCache;

// Client
pub use client::{StripeClient, StripeConfig};

// Error
pub use error::{EntitlementError, EntitlementResult};

// Inspector
pub use inspector::{ConsistencyInspector, ConsistencyReport, WalletVerdict};

// Ledger
pub use ledger::CreditLedger;

// Overrides
pub use overrides::{ApplyOverrideParams, OverrideStore};

// Plan
pub use plan::{EffectivePlan, PlanLimits, PlanSource};

// Resolver
pub use resolver::{resolve_effective, PlanResolver};

// Self-test
pub use selftest::{SelfTestHarness, SelfTestResult, SelfTestSummary};

// Sessions
pub use sessions::AiSessionManager;

// Sync
pub use sync::{select_subscription, BillingSyncAdapter, ProviderSubscription};

// Usage
pub use usage::{QuotaDecision, UsageCounterStore};

use sqlx::PgPool;

/// Main engine handle that combines all entitlement functionality
pub struct EntitlementEngine {
    pub resolver: PlanResolver,
    pub overrides: OverrideStore,
    /// Billing sync (only available when Stripe is configured)
    pub sync: Option<BillingSyncAdapter>,
    pub ledger: CreditLedger,
    pub counters: UsageCounterStore,
    pub sessions: AiSessionManager,
    pub inspector: ConsistencyInspector,
    pub selftest: SelfTestHarness,
    pub cache: EntitlementCache,
}

impl EntitlementEngine {
    /// Create an engine from environment variables. Stripe being
    /// unconfigured disables sync but nothing else.
    pub fn from_env(pool: PgPool) -> Self {
        let sync = match StripeClient::from_env() {
            Ok(stripe) => {
                tracing::info!("Stripe billing sync enabled");
                Some(BillingSyncAdapter::new(stripe, pool.clone()))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Stripe not configured, billing sync disabled");
                None
            }
        };
        Self::build(pool, sync)
    }

    /// Create an engine with an explicit Stripe config.
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        let stripe = StripeClient::new(config);
        let sync = Some(BillingSyncAdapter::new(stripe, pool.clone()));
        Self::build(pool, sync)
    }

    fn build(pool: PgPool, sync: Option<BillingSyncAdapter>) -> Self {
        Self {
            resolver: PlanResolver::new(pool.clone()),
            overrides: OverrideStore::new(pool.clone()),
            sync,
            ledger: CreditLedger::new(pool.clone()),
            counters: UsageCounterStore::new(pool.clone()),
            sessions: AiSessionManager::new(pool.clone()),
            inspector: ConsistencyInspector::new(pool.clone()),
            selftest: SelfTestHarness::new(pool),
            cache: EntitlementCache::new(),
        }
    }

    /// Resolve a plan through the cache, falling back to a direct
    /// resolve on miss and to the last known-good entry on store errors.
    pub async fn cached_plan(&self, user_id: uuid::Uuid) -> EffectivePlan {
        let resolver = self.resolver.clone();
        match self
            .cache
            .get_or_refresh(user_id, || async move { resolver.try_resolve(user_id).await })
            .await
        {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Cached plan resolution degraded to free"
                );
                EffectivePlan::degraded_free()
            }
        }
    }
}
