//! Per-instance entitlement cache
//!
//! Resolved plans are cached with a short freshness window. A stale entry
//! is revalidated rather than trusted indefinitely; a revalidation that
//! itself fails serves the last known-good value instead of blocking the
//! caller. The entry count is bounded so a flood of unique user ids
//! cannot exhaust memory.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::EntitlementResult;
use crate::plan::EffectivePlan;

/// Freshness window after which a cached plan must be revalidated
const ENTITLEMENT_CACHE_TTL: Duration = Duration::from_secs(600);

/// Maximum cache entries; oldest entries are evicted beyond this
const MAX_CACHE_ENTRIES: usize = 10_000;

#[derive(Clone)]
struct CachedPlan {
    plan: EffectivePlan,
    cached_at: Instant,
}

/// Thread-safe cache of resolved entitlements
#[derive(Clone)]
pub struct EntitlementCache {
    inner: Arc<RwLock<HashMap<Uuid, CachedPlan>>>,
    ttl: Duration,
}

impl Default for EntitlementCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EntitlementCache {
    pub fn new() -> Self {
        Self::with_ttl(ENTITLEMENT_CACHE_TTL)
    }

    /// Cache with an explicit freshness window (tests use zero to make
    /// every entry immediately stale).
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Fresh cached plan, if present and inside the freshness window.
    pub async fn get_fresh(&self, user_id: Uuid) -> Option<EffectivePlan> {
        let map = self.inner.read().await;
        map.get(&user_id)
            .filter(|c| c.cached_at.elapsed() < self.ttl)
            .map(|c| c.plan.clone())
    }

    /// Resolve through the cache: fresh hit, else revalidate via `fetch`,
    /// falling back to the last known-good entry if revalidation fails.
    pub async fn get_or_refresh<F, Fut>(
        &self,
        user_id: Uuid,
        fetch: F,
    ) -> EntitlementResult<EffectivePlan>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EntitlementResult<EffectivePlan>>,
    {
        if let Some(plan) = self.get_fresh(user_id).await {
            return Ok(plan);
        }

        match fetch().await {
            Ok(plan) => {
                self.insert(user_id, plan.clone()).await;
                Ok(plan)
            }
            Err(e) => {
                // Stale beats blocked: serve the last known-good value.
                let stale = {
                    let map = self.inner.read().await;
                    map.get(&user_id).map(|c| c.plan.clone())
                };
                match stale {
                    Some(plan) => {
                        tracing::warn!(
                            user_id = %user_id,
                            error = %e,
                            "Entitlement revalidation failed, serving stale cached plan"
                        );
                        Ok(plan)
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Drop a user's entry, forcing the next lookup to resolve.
    /// Called after override changes and billing syncs.
    pub async fn invalidate(&self, user_id: Uuid) {
        self.inner.write().await.remove(&user_id);
    }

    async fn insert(&self, user_id: Uuid, plan: EffectivePlan) {
        let mut map = self.inner.write().await;
        if map.len() >= MAX_CACHE_ENTRIES && !map.contains_key(&user_id) {
            // Evict the oldest entry to stay bounded.
            if let Some(oldest) = map
                .iter()
                .min_by_key(|(_, c)| c.cached_at)
                .map(|(id, _)| *id)
            {
                map.remove(&oldest);
            }
        }
        map.insert(
            user_id,
            CachedPlan {
                plan,
                cached_at: Instant::now(),
            },
        );
    }
}
