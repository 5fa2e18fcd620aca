//! Runnable self-test harness
//!
//! Exercises the engine's accounting properties against synthetic users
//! (fresh UUIDs that exist only for the duration of the run) and reports
//! pass/fail per property. Synthetic rows are deleted afterward. Intended
//! for the admin endpoint and the cron sweep, not for request paths.
//!
//! ## Design Principles
//!
//! 1. **Executable**: each property runs real engine operations
//! 2. **Explanatory**: failures carry enough context to debug
//! 3. **Self-cleaning**: synthetic rows never outlive the run

use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use postwise_shared::{CreditReason, PlanTier, UserRole, YearMonth};

use crate::error::{EntitlementError, EntitlementResult};
use crate::inspector::ConsistencyInspector;
use crate::ledger::CreditLedger;
use crate::overrides::{ApplyOverrideParams, OverrideStore};
use crate::plan::PlanSource;
use crate::resolver::PlanResolver;
use crate::sessions::AiSessionManager;
use crate::usage::UsageCounterStore;

/// Result of one property check
#[derive(Debug, Clone, Serialize)]
pub struct SelfTestResult {
    pub name: String,
    pub passed: bool,
    pub detail: Option<String>,
}

/// Summary of a full self-test run
#[derive(Debug, Clone, Serialize)]
pub struct SelfTestSummary {
    pub ran_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub healthy: bool,
    pub results: Vec<SelfTestResult>,
}

/// Exercises accounting invariants against synthetic users
#[derive(Clone)]
pub struct SelfTestHarness {
    pool: PgPool,
    ledger: CreditLedger,
    resolver: PlanResolver,
    overrides: OverrideStore,
    counters: UsageCounterStore,
    sessions: AiSessionManager,
    inspector: ConsistencyInspector,
}

impl SelfTestHarness {
    pub fn new(pool: PgPool) -> Self {
        Self {
            ledger: CreditLedger::new(pool.clone()),
            resolver: PlanResolver::new(pool.clone()),
            overrides: OverrideStore::new(pool.clone()),
            counters: UsageCounterStore::new(pool.clone()),
            sessions: AiSessionManager::new(pool.clone()),
            inspector: ConsistencyInspector::new(pool.clone()),
            pool,
        }
    }

    /// Run every property check and return the summary.
    pub async fn run_all(&self) -> SelfTestSummary {
        let ran_at = OffsetDateTime::now_utc();
        let mut results = Vec::new();

        for name in Self::available_checks() {
            let outcome = self.run_check(name).await;
            results.push(SelfTestResult {
                name: name.to_string(),
                passed: outcome.is_ok(),
                detail: outcome.err(),
            });
        }

        let checks_run = results.len();
        let checks_passed = results.iter().filter(|r| r.passed).count();
        let summary = SelfTestSummary {
            ran_at,
            checks_run,
            checks_passed,
            checks_failed: checks_run - checks_passed,
            healthy: checks_passed == checks_run,
            results,
        };

        if summary.healthy {
            tracing::info!(checks = checks_run, "Self-test passed");
        } else {
            for r in summary.results.iter().filter(|r| !r.passed) {
                tracing::error!(
                    check = %r.name,
                    detail = r.detail.as_deref().unwrap_or("(none)"),
                    "Self-test check failed"
                );
            }
        }

        summary
    }

    /// Run a single property check by name.
    pub async fn run_check(&self, name: &str) -> Result<(), String> {
        let user_id = Uuid::new_v4();
        let outcome = match name {
            "wallet_matches_ledger" => self.check_wallet_matches_ledger(user_id).await,
            "credit_apply_is_additive" => self.check_credit_apply_is_additive(user_id).await,
            "spend_counter_matches_ledger" => {
                self.check_spend_counter_matches_ledger(user_id).await
            }
            "concurrent_session_single_winner" => {
                self.check_concurrent_session_single_winner(user_id).await
            }
            "extend_never_charges" => self.check_extend_never_charges(user_id).await,
            "override_precedence_and_removal" => {
                self.check_override_precedence_and_removal(user_id).await
            }
            "month_rollover_resets_quota" => self.check_month_rollover_resets_quota(user_id).await,
            "unlimited_start_charges_nothing" => {
                self.check_unlimited_start_charges_nothing(user_id).await
            }
            "legacy_account_not_flagged" => self.check_legacy_account_not_flagged(user_id).await,
            _ => Err(format!("Unknown check: {}", name)),
        };

        // Synthetic rows must not outlive the run, pass or fail.
        if let Err(e) = self.cleanup(user_id).await {
            tracing::warn!(user_id = %user_id, error = %e, "Self-test cleanup failed");
        }
        outcome
    }

    /// Names of all property checks.
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "wallet_matches_ledger",
            "credit_apply_is_additive",
            "spend_counter_matches_ledger",
            "concurrent_session_single_winner",
            "extend_never_charges",
            "override_precedence_and_removal",
            "month_rollover_resets_quota",
            "unlimited_start_charges_nothing",
            "legacy_account_not_flagged",
        ]
    }

    /// Property: wallet balance equals the ledger running sum after any
    /// sequence of operations.
    async fn check_wallet_matches_ledger(&self, user_id: Uuid) -> Result<(), String> {
        let admin = Uuid::new_v4();
        self.ledger
            .apply_credits(user_id, 5, CreditReason::AdminAdjustment, admin, UserRole::Admin)
            .await
            .map_err(|e| format!("apply_credits: {}", e))?;
        self.ledger
            .spend(user_id, 2, None, serde_json::json!({"probe": true}))
            .await
            .map_err(|e| format!("spend: {}", e))?;

        let wallet = self
            .ledger
            .wallet(user_id)
            .await
            .map_err(|e| e.to_string())?;
        let (sum, count) = self
            .ledger
            .totals(user_id)
            .await
            .map_err(|e| e.to_string())?;

        if count != 2 || sum != Some(wallet.balance_credits) || wallet.balance_credits != 3 {
            return Err(format!(
                "balance {} vs ledger sum {:?} over {} rows",
                wallet.balance_credits, sum, count
            ));
        }
        Ok(())
    }

    /// Property: two credit grants of 5 leave exactly +10 and two rows.
    async fn check_credit_apply_is_additive(&self, user_id: Uuid) -> Result<(), String> {
        let admin = Uuid::new_v4();
        for _ in 0..2 {
            self.ledger
                .apply_credits(user_id, 5, CreditReason::AdminAdjustment, admin, UserRole::Admin)
                .await
                .map_err(|e| format!("apply_credits: {}", e))?;
        }
        let wallet = self
            .ledger
            .wallet(user_id)
            .await
            .map_err(|e| e.to_string())?;
        let (_, count) = self
            .ledger
            .totals(user_id)
            .await
            .map_err(|e| e.to_string())?;
        if wallet.balance_credits != 10 || count != 2 {
            return Err(format!(
                "expected balance 10 over 2 rows, got {} over {}",
                wallet.balance_credits, count
            ));
        }
        Ok(())
    }

    /// Property: the monthly spent counter equals the month's negative
    /// ledger deltas.
    async fn check_spend_counter_matches_ledger(&self, user_id: Uuid) -> Result<(), String> {
        let admin = Uuid::new_v4();
        self.ledger
            .apply_credits(user_id, 8, CreditReason::Promo, admin, UserRole::Admin)
            .await
            .map_err(|e| format!("apply_credits: {}", e))?;
        self.ledger
            .spend(user_id, 3, None, serde_json::json!({}))
            .await
            .map_err(|e| format!("spend: {}", e))?;
        self.ledger
            .spend(user_id, 1, None, serde_json::json!({}))
            .await
            .map_err(|e| format!("spend: {}", e))?;

        let report = self
            .inspector
            .inspect(user_id)
            .await
            .map_err(|e| e.to_string())?;
        if report.mismatch_spent {
            return Err(format!(
                "counter {} disagrees with ledger {}",
                report.month_spend_counter, report.month_spend_ledger
            ));
        }
        if report.month_spend_ledger != 4 {
            return Err(format!(
                "expected month spend 4, got {}",
                report.month_spend_ledger
            ));
        }
        Ok(())
    }

    /// Property: N concurrent starts for the same (user, case) yield
    /// exactly one ACTIVE session and N−1 `SESSION_ALREADY_ACTIVE`.
    async fn check_concurrent_session_single_winner(&self, user_id: Uuid) -> Result<(), String> {
        const STARTERS: usize = 4;

        let admin = Uuid::new_v4();
        self.ledger
            .apply_credits(user_id, 10, CreditReason::Promo, admin, UserRole::Admin)
            .await
            .map_err(|e| format!("apply_credits: {}", e))?;

        let case_id = Uuid::new_v4();
        let barrier = Arc::new(tokio::sync::Barrier::new(STARTERS));
        let mut handles = Vec::new();
        for _ in 0..STARTERS {
            let sessions = self.sessions.clone();
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                sessions.start(user_id, case_id).await
            }));
        }

        let mut won = 0usize;
        let mut rejected = 0usize;
        for handle in handles {
            match handle.await {
                Ok(Ok(_)) => won += 1,
                Ok(Err(EntitlementError::SessionAlreadyActive)) => rejected += 1,
                Ok(Err(e)) => return Err(format!("unexpected start error: {}", e)),
                Err(e) => return Err(format!("task join error: {}", e)),
            }
        }

        if won != 1 || rejected != STARTERS - 1 {
            return Err(format!(
                "expected 1 winner / {} rejections, got {} / {}",
                STARTERS - 1,
                won,
                rejected
            ));
        }

        // Exactly one credit charged across all racers.
        let wallet = self
            .ledger
            .wallet(user_id)
            .await
            .map_err(|e| e.to_string())?;
        if wallet.balance_credits != 9 {
            return Err(format!(
                "expected balance 9 after one charge, got {}",
                wallet.balance_credits
            ));
        }
        Ok(())
    }

    /// Property: extending a session never changes the wallet balance.
    async fn check_extend_never_charges(&self, user_id: Uuid) -> Result<(), String> {
        let admin = Uuid::new_v4();
        self.ledger
            .apply_credits(user_id, 3, CreditReason::Purchase, admin, UserRole::Admin)
            .await
            .map_err(|e| format!("apply_credits: {}", e))?;

        let session = self
            .sessions
            .start(user_id, Uuid::new_v4())
            .await
            .map_err(|e| format!("start: {}", e))?;
        let before = self
            .ledger
            .wallet(user_id)
            .await
            .map_err(|e| e.to_string())?
            .balance_credits;

        for _ in 0..2 {
            self.sessions
                .extend(session.id, user_id)
                .await
                .map_err(|e| format!("extend: {}", e))?;
        }

        let after = self
            .ledger
            .wallet(user_id)
            .await
            .map_err(|e| e.to_string())?
            .balance_credits;
        if before != after {
            return Err(format!("balance moved {} -> {} across extends", before, after));
        }
        Ok(())
    }

    /// Property: an active override beats any billing state, and removing
    /// it falls straight back to the billing-derived plan.
    async fn check_override_precedence_and_removal(&self, user_id: Uuid) -> Result<(), String> {
        let admin = Uuid::new_v4();

        // Delinquent paid subscription with an open period.
        sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, plan_key, status, current_period_end, access_blocked)
            VALUES ($1, 'standard', 'past_due', NOW() + INTERVAL '10 days', TRUE)
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.to_string())?;

        self.overrides
            .apply(
                ApplyOverrideParams {
                    target_user_id: user_id,
                    plan_code: PlanTier::Plus,
                    is_active: true,
                    expires_at: None,
                    reason: "self-test".to_string(),
                },
                admin,
                UserRole::Admin,
            )
            .await
            .map_err(|e| format!("apply override: {}", e))?;

        let plan = self.resolver.resolve(user_id).await;
        if plan.tier != PlanTier::Plus || plan.source != PlanSource::Override || plan.access_blocked
        {
            return Err(format!(
                "override did not win: tier {:?} source {:?} blocked {}",
                plan.tier, plan.source, plan.access_blocked
            ));
        }

        self.overrides
            .remove(user_id, admin, UserRole::Admin, "self-test")
            .await
            .map_err(|e| format!("remove override: {}", e))?;

        let plan = self.resolver.resolve(user_id).await;
        if plan.source != PlanSource::Billing
            || plan.tier != PlanTier::Standard
            || !plan.access_blocked
        {
            return Err(format!(
                "removal did not fall back to billing: tier {:?} source {:?} blocked {}",
                plan.tier, plan.source, plan.access_blocked
            ));
        }
        Ok(())
    }

    /// Property: a free user exhausts the monthly case quota, and a new
    /// month key starts from zero.
    async fn check_month_rollover_resets_quota(&self, user_id: Uuid) -> Result<(), String> {
        // Fresh synthetic user resolves to free (limit 1).
        self.counters
            .claim_case(user_id)
            .await
            .map_err(|e| format!("first claim: {}", e))?;

        match self.counters.claim_case(user_id).await {
            Err(EntitlementError::QuotaExceeded) => {}
            Ok(n) => return Err(format!("second claim unexpectedly allowed (count {})", n)),
            Err(e) => return Err(format!("second claim wrong error: {}", e)),
        }

        // Rollover: the next month's key has no row, so the quota reads 0.
        let next = YearMonth::current().next();
        let counter = self
            .counters
            .current(user_id, &next)
            .await
            .map_err(|e| e.to_string())?;
        if counter.cases_created != 0 {
            return Err(format!(
                "next month's counter should be 0, got {}",
                counter.cases_created
            ));
        }
        Ok(())
    }

    /// Property: unlimited plans start sessions with a zero balance and
    /// never write a SPEND row.
    async fn check_unlimited_start_charges_nothing(&self, user_id: Uuid) -> Result<(), String> {
        let admin = Uuid::new_v4();
        self.overrides
            .apply(
                ApplyOverrideParams {
                    target_user_id: user_id,
                    plan_code: PlanTier::Unlimited,
                    is_active: true,
                    expires_at: None,
                    reason: "self-test".to_string(),
                },
                admin,
                UserRole::Admin,
            )
            .await
            .map_err(|e| format!("apply override: {}", e))?;

        self.sessions
            .start(user_id, Uuid::new_v4())
            .await
            .map_err(|e| format!("start: {}", e))?;

        let (sum, count) = self
            .ledger
            .totals(user_id)
            .await
            .map_err(|e| e.to_string())?;
        let wallet = self
            .ledger
            .wallet(user_id)
            .await
            .map_err(|e| e.to_string())?;
        if count != 0 || sum.is_some() || wallet.balance_credits != 0 {
            return Err(format!(
                "unlimited start left traces: {} rows, sum {:?}, balance {}",
                count, sum, wallet.balance_credits
            ));
        }
        Ok(())
    }

    /// Property: a pre-ledger balance is reported as legacy, not as a
    /// wallet mismatch.
    async fn check_legacy_account_not_flagged(&self, user_id: Uuid) -> Result<(), String> {
        // A wallet row with no ledger history, as migrated accounts have.
        sqlx::query(
            "INSERT INTO wallets (user_id, balance_credits, lifetime_credits) VALUES ($1, 50, 50)",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.to_string())?;

        let report = self
            .inspector
            .inspect(user_id)
            .await
            .map_err(|e| e.to_string())?;
        if !report.legacy_data {
            return Err("legacy account not flagged as legacy_data".to_string());
        }
        if !matches!(
            report.wallet_vs_ledger,
            crate::inspector::WalletVerdict::Consistent
        ) {
            return Err(format!(
                "legacy account falsely flagged: {:?}",
                report.wallet_vs_ledger
            ));
        }
        Ok(())
    }

    /// Delete every synthetic row belonging to a self-test user.
    async fn cleanup(&self, user_id: Uuid) -> EntitlementResult<()> {
        for table in [
            "ai_sessions",
            "credit_ledger",
            "wallets",
            "usage_counters",
            "subscriptions",
            "plan_overrides",
        ] {
            sqlx::query(&format!("DELETE FROM {} WHERE user_id = $1", table))
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        }
        sqlx::query("DELETE FROM plan_override_audit WHERE target_user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
