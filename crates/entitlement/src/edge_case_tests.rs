// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Entitlement Engine
//!
//! Tests critical boundary conditions in:
//! - Plan resolution precedence (ENT-P01 to ENT-P10)
//! - Entitlement cache freshness and fallback (ENT-C01 to ENT-C06)

#[cfg(test)]
mod resolution_tests {
    use crate::plan::PlanSource;
    use crate::resolver::resolve_effective;
    use postwise_shared::models::{PlanOverride, Subscription};
    use postwise_shared::PlanTier;
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    fn override_row(plan: &str, is_active: bool, expires_in: Option<Duration>) -> PlanOverride {
        let now = OffsetDateTime::now_utc();
        PlanOverride {
            user_id: Uuid::new_v4(),
            plan_code: plan.to_string(),
            is_active,
            expires_at: expires_in.map(|d| now + d),
            reason: "test".to_string(),
            created_by: Uuid::new_v4(),
            updated_at: now,
        }
    }

    fn subscription(plan: &str, status: &str, period_ends_in: Option<Duration>) -> Subscription {
        let now = OffsetDateTime::now_utc();
        Subscription {
            user_id: Uuid::new_v4(),
            plan_key: plan.to_string(),
            status: status.to_string(),
            current_period_end: period_ends_in.map(|d| now + d),
            stripe_customer_id: Some("cus_test".to_string()),
            stripe_subscription_id: Some("sub_test".to_string()),
            access_blocked: false,
            updated_at: now,
        }
    }

    // =========================================================================
    // ENT-P01: No inputs at all - resolves to free
    // =========================================================================
    #[test]
    fn test_no_inputs_resolves_free() {
        let plan = resolve_effective(None, None, OffsetDateTime::now_utc());
        assert_eq!(plan.tier, PlanTier::Free);
        assert_eq!(plan.source, PlanSource::Free);
        assert!(!plan.access_blocked);
    }

    // =========================================================================
    // ENT-P02: Active override beats past_due billing
    // =========================================================================
    #[test]
    fn test_override_beats_delinquent_billing() {
        let ov = override_row("plus", true, None);
        let sub = subscription("standard", "past_due", Some(Duration::days(10)));
        let plan = resolve_effective(Some(&ov), Some(&sub), OffsetDateTime::now_utc());
        assert_eq!(plan.tier, PlanTier::Plus);
        assert_eq!(plan.source, PlanSource::Override);
        assert!(!plan.access_blocked, "override grants access outright");
    }

    // =========================================================================
    // ENT-P03: Override beats canceled billing
    // =========================================================================
    #[test]
    fn test_override_beats_canceled_billing() {
        let ov = override_row("unlimited", true, None);
        let sub = subscription("plus", "canceled", Some(-Duration::days(10)));
        let plan = resolve_effective(Some(&ov), Some(&sub), OffsetDateTime::now_utc());
        assert_eq!(plan.tier, PlanTier::Unlimited);
        assert_eq!(plan.source, PlanSource::Override);
    }

    // =========================================================================
    // ENT-P04: Expired override falls through to billing
    // =========================================================================
    #[test]
    fn test_expired_override_falls_through() {
        let ov = override_row("unlimited", true, Some(-Duration::hours(1)));
        let sub = subscription("standard", "active", Some(Duration::days(10)));
        let plan = resolve_effective(Some(&ov), Some(&sub), OffsetDateTime::now_utc());
        assert_eq!(plan.tier, PlanTier::Standard);
        assert_eq!(plan.source, PlanSource::Billing);
    }

    // =========================================================================
    // ENT-P05: Deactivated override falls through immediately
    // =========================================================================
    #[test]
    fn test_removed_override_no_residual_access() {
        let ov = override_row("unlimited", false, None);
        let plan = resolve_effective(Some(&ov), None, OffsetDateTime::now_utc());
        assert_eq!(plan.tier, PlanTier::Free);
        assert_eq!(plan.source, PlanSource::Free);
    }

    // =========================================================================
    // ENT-P06: Unparseable override plan code is ignored, not elevated
    // =========================================================================
    #[test]
    fn test_garbage_override_plan_ignored() {
        let ov = override_row("enterprise-legacy", true, None);
        let sub = subscription("standard", "active", Some(Duration::days(10)));
        let plan = resolve_effective(Some(&ov), Some(&sub), OffsetDateTime::now_utc());
        assert_eq!(plan.tier, PlanTier::Standard);
        assert_eq!(plan.source, PlanSource::Billing);
    }

    // =========================================================================
    // ENT-P07: past_due keeps the plan but blocks access
    // =========================================================================
    #[test]
    fn test_past_due_known_plan_blocked_usage() {
        let sub = subscription("plus", "past_due", Some(Duration::days(3)));
        let plan = resolve_effective(None, Some(&sub), OffsetDateTime::now_utc());
        assert_eq!(plan.tier, PlanTier::Plus, "plan identity is retained");
        assert!(plan.access_blocked, "usage is refused until payment recovers");
        assert!(!plan.usable());
    }

    // =========================================================================
    // ENT-P08: past_due with elapsed period falls to free
    // =========================================================================
    #[test]
    fn test_past_due_elapsed_period_free() {
        let sub = subscription("plus", "past_due", Some(-Duration::days(3)));
        let plan = resolve_effective(None, Some(&sub), OffsetDateTime::now_utc());
        assert_eq!(plan.tier, PlanTier::Free);
        assert_eq!(plan.source, PlanSource::Free);
    }

    // =========================================================================
    // ENT-P09: canceled with open paid period still entitles
    // =========================================================================
    #[test]
    fn test_canceled_with_open_period_entitles() {
        let now = OffsetDateTime::now_utc();
        let open = subscription("standard", "canceled", Some(Duration::days(5)));
        let plan = resolve_effective(None, Some(&open), now);
        assert_eq!(plan.tier, PlanTier::Standard);
        assert!(!plan.access_blocked);

        let elapsed = subscription("standard", "canceled", Some(-Duration::days(5)));
        let plan = resolve_effective(None, Some(&elapsed), now);
        assert_eq!(plan.tier, PlanTier::Free);
    }

    // =========================================================================
    // ENT-P10: unknown mirrored plan key degrades to free, never errors
    // =========================================================================
    #[test]
    fn test_unknown_plan_key_degrades() {
        let sub = subscription("team", "active", Some(Duration::days(5)));
        let plan = resolve_effective(None, Some(&sub), OffsetDateTime::now_utc());
        assert_eq!(plan.tier, PlanTier::Free);
        assert_eq!(plan.source, PlanSource::Billing);
    }
}

#[cfg(test)]
mod cache_tests {
    use crate::cache::EntitlementCache;
    use crate::error::EntitlementError;
    use crate::plan::EffectivePlan;
    use postwise_shared::PlanTier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn plus_plan() -> EffectivePlan {
        EffectivePlan {
            tier: PlanTier::Plus,
            ..EffectivePlan::free()
        }
    }

    // =========================================================================
    // ENT-C01: Fresh entry is served without refetching
    // =========================================================================
    #[tokio::test]
    async fn test_fresh_hit_skips_fetch() {
        let cache = EntitlementCache::new();
        let user = Uuid::new_v4();

        let plan = cache
            .get_or_refresh(user, || async { Ok(plus_plan()) })
            .await
            .unwrap();
        assert_eq!(plan.tier, PlanTier::Plus);

        // Second lookup must not call fetch at all.
        let plan = cache
            .get_or_refresh(user, || async {
                panic!("fetch called despite fresh cache entry")
            })
            .await
            .unwrap();
        assert_eq!(plan.tier, PlanTier::Plus);
    }

    // =========================================================================
    // ENT-C02: Stale entry is revalidated, not trusted
    // =========================================================================
    #[tokio::test]
    async fn test_stale_entry_revalidates() {
        // Zero TTL: every entry is stale the moment it lands.
        let cache = EntitlementCache::with_ttl(Duration::ZERO);
        let user = Uuid::new_v4();
        cache
            .get_or_refresh(user, || async { Ok(plus_plan()) })
            .await
            .unwrap();

        let plan = cache
            .get_or_refresh(user, || async { Ok(EffectivePlan::free()) })
            .await
            .unwrap();
        assert_eq!(plan.tier, PlanTier::Free, "stale value must be replaced");
    }

    // =========================================================================
    // ENT-C03: Failed revalidation serves the last known-good value
    // =========================================================================
    #[tokio::test]
    async fn test_failed_revalidation_serves_stale() {
        let cache = EntitlementCache::with_ttl(Duration::ZERO);
        let user = Uuid::new_v4();
        cache
            .get_or_refresh(user, || async { Ok(plus_plan()) })
            .await
            .unwrap();

        let plan = cache
            .get_or_refresh(user, || async {
                Err(EntitlementError::Database("connection refused".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(plan.tier, PlanTier::Plus, "stale beats blocked");
    }

    // =========================================================================
    // ENT-C04: No cached value plus a failed fetch surfaces the error
    // =========================================================================
    #[tokio::test]
    async fn test_cold_miss_with_failure_errors() {
        let cache = EntitlementCache::new();
        let result = cache
            .get_or_refresh(Uuid::new_v4(), || async {
                Err(EntitlementError::Database("connection refused".to_string()))
            })
            .await;
        assert!(result.is_err());
    }

    // =========================================================================
    // ENT-C05: Invalidation forces the next lookup through fetch
    // =========================================================================
    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let cache = EntitlementCache::new();
        let user = Uuid::new_v4();
        let fetches = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let fetches = Arc::clone(&fetches);
            cache
                .get_or_refresh(user, || async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(plus_plan())
                })
                .await
                .unwrap();
            cache.invalidate(user).await;
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    // =========================================================================
    // ENT-C06: Concurrent lookups all resolve without corruption
    // =========================================================================
    #[tokio::test]
    async fn test_concurrent_lookups_consistent() {
        let cache = EntitlementCache::new();
        let user = Uuid::new_v4();
        let barrier = Arc::new(tokio::sync::Barrier::new(8));

        let mut handles = vec![];
        for _ in 0..8 {
            let cache = cache.clone();
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                cache
                    .get_or_refresh(user, || async { Ok(plus_plan()) })
                    .await
            }));
        }

        for handle in handles {
            let plan = handle.await.unwrap().unwrap();
            assert_eq!(plan.tier, PlanTier::Plus);
        }
        assert!(cache.get_fresh(user).await.is_some());
    }
}
