//! Per-month usage counters
//!
//! Counters are keyed `(user_id, ym)` and created lazily on first use;
//! month rollover is a new key, never a reset job. Every increment is a
//! single upsert statement — read-and-increment is never two round trips,
//! so two concurrent requests cannot both observe a stale value and both
//! succeed where only one should.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use postwise_shared::models::UsageCounter;
use postwise_shared::{Limit, YearMonth};

use crate::error::{EntitlementError, EntitlementResult};
use crate::plan::EffectivePlan;
use crate::resolver::PlanResolver;

/// Outcome of a read-only quota check
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub used: i32,
    pub limit: Limit,
}

/// Atomic per-month usage counters plus the case-quota gate
#[derive(Clone)]
pub struct UsageCounterStore {
    pool: PgPool,
    resolver: PlanResolver,
}

impl UsageCounterStore {
    pub fn new(pool: PgPool) -> Self {
        let resolver = PlanResolver::new(pool.clone());
        Self { pool, resolver }
    }

    /// Current counters for a month, all-zero when no row exists yet.
    pub async fn current(&self, user_id: Uuid, ym: &YearMonth) -> EntitlementResult<UsageCounter> {
        let row: Option<UsageCounter> =
            sqlx::query_as("SELECT * FROM usage_counters WHERE user_id = $1 AND ym = $2")
                .bind(user_id)
                .bind(ym.key())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.unwrap_or_else(|| UsageCounter::empty(user_id, ym.key())))
    }

    /// Read-only quota check: resolves the plan and compares this month's
    /// `cases_created` against the plan limit. Unlimited plans always
    /// allow regardless of the counter value.
    pub async fn check_case_quota(&self, user_id: Uuid) -> EntitlementResult<QuotaDecision> {
        let plan = self.resolver.resolve(user_id).await;
        if !plan.usable() {
            return Err(EntitlementError::Forbidden);
        }
        let used = self
            .current(user_id, &YearMonth::current())
            .await?
            .cases_created;
        let limit = plan.tier.monthly_case_limit();
        Ok(QuotaDecision {
            allowed: limit.allows(used.max(0) as u32),
            used,
            limit,
        })
    }

    /// Claim one case slot: a single conditional-increment statement, so
    /// a quota of N admits exactly N concurrent claims. Returns the new
    /// count, or `QuotaExceeded`.
    pub async fn claim_case(&self, user_id: Uuid) -> EntitlementResult<i32> {
        let plan = self.resolver.resolve(user_id).await;
        if !plan.usable() {
            return Err(EntitlementError::Forbidden);
        }
        let ym = YearMonth::current();
        match plan.tier.monthly_case_limit() {
            Limit::Unlimited => self.increment_cases_created(user_id, &ym).await,
            Limit::Bounded(0) => Err(EntitlementError::QuotaExceeded),
            Limit::Bounded(max) => {
                let row: Option<(i32,)> = sqlx::query_as(
                    r#"
                    INSERT INTO usage_counters (user_id, ym, cases_created)
                    VALUES ($1, $2, 1)
                    ON CONFLICT (user_id, ym) DO UPDATE SET
                        cases_created = usage_counters.cases_created + 1,
                        updated_at = NOW()
                    WHERE usage_counters.cases_created < $3
                    RETURNING cases_created
                    "#,
                )
                .bind(user_id)
                .bind(ym.key())
                .bind(max as i32)
                .fetch_optional(&self.pool)
                .await?;
                row.map(|(count,)| count)
                    .ok_or(EntitlementError::QuotaExceeded)
            }
        }
    }

    /// Unconditional case-counter increment (unlimited plans).
    pub async fn increment_cases_created(
        &self,
        user_id: Uuid,
        ym: &YearMonth,
    ) -> EntitlementResult<i32> {
        let (count,): (i32,) = sqlx::query_as(
            r#"
            INSERT INTO usage_counters (user_id, ym, cases_created)
            VALUES ($1, $2, 1)
            ON CONFLICT (user_id, ym) DO UPDATE SET
                cases_created = usage_counters.cases_created + 1,
                updated_at = NOW()
            RETURNING cases_created
            "#,
        )
        .bind(user_id)
        .bind(ym.key())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Plan snapshot used by callers that already need the counters.
    pub async fn plan(&self, user_id: Uuid) -> EffectivePlan {
        self.resolver.resolve(user_id).await
    }
}

/// Increment `ai_sessions_started` inside an open transaction.
pub(crate) async fn increment_ai_sessions_started_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    ym: &YearMonth,
) -> EntitlementResult<i32> {
    let (count,): (i32,) = sqlx::query_as(
        r#"
        INSERT INTO usage_counters (user_id, ym, ai_sessions_started)
        VALUES ($1, $2, 1)
        ON CONFLICT (user_id, ym) DO UPDATE SET
            ai_sessions_started = usage_counters.ai_sessions_started + 1,
            updated_at = NOW()
        RETURNING ai_sessions_started
        "#,
    )
    .bind(user_id)
    .bind(ym.key())
    .fetch_one(&mut **tx)
    .await?;
    Ok(count)
}

/// Increment `credits_spent` inside an open transaction, in lockstep with
/// the SPEND ledger row that justifies it.
pub(crate) async fn increment_credits_spent_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    ym: &YearMonth,
    amount: i64,
) -> EntitlementResult<i32> {
    let (count,): (i32,) = sqlx::query_as(
        r#"
        INSERT INTO usage_counters (user_id, ym, credits_spent)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, ym) DO UPDATE SET
            credits_spent = usage_counters.credits_spent + $3,
            updated_at = NOW()
        RETURNING credits_spent
        "#,
    )
    .bind(user_id)
    .bind(ym.key())
    .bind(amount as i32)
    .fetch_one(&mut **tx)
    .await?;
    Ok(count)
}
