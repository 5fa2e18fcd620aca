//! Consistency inspection
//!
//! Read-only, bounded-cost reconciliation for one user: recomputes what
//! the counters and wallet *should* say from the ledger and reports
//! disagreements. Never writes. A verdict it cannot actually verify is
//! reported as unknown, never guessed.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use postwise_shared::{PlanTier, YearMonth};

use crate::error::EntitlementResult;
use crate::ledger::CreditLedger;
use crate::resolver::PlanResolver;
use crate::usage::UsageCounterStore;

/// Outcome of comparing the wallet balance against the all-time ledger sum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum WalletVerdict {
    /// Sum computed and equal to the balance (legacy accounts land here:
    /// they are exempt until their first ledger write).
    Consistent,
    /// Sum computed and it disagrees with the balance.
    Mismatch { expected: i64, actual: i64 },
    /// The aggregate could not be computed; no claim is made.
    Unknown,
}

/// Per-user reconciliation report
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub user_id: Uuid,
    pub ym: String,
    pub plan: PlanTier,
    pub checked_at: OffsetDateTime,

    pub wallet_balance: i64,
    pub lifetime_credits: i64,
    pub ledger_entries: i64,

    /// Month spend recomputed from negative ledger deltas in the month's
    /// date range.
    pub month_spend_ledger: i64,
    /// Month spend as the counter recorded it.
    pub month_spend_counter: i64,

    /// Counter disagrees with the ledger (non-unlimited plans only).
    pub mismatch_spent: bool,
    /// Positive balance with zero ledger rows: a pre-ledger account.
    pub legacy_data: bool,
    pub wallet_vs_ledger: WalletVerdict,
}

/// Read-only reconciliation over ledger, wallet, and counters
#[derive(Clone)]
pub struct ConsistencyInspector {
    resolver: PlanResolver,
    ledger: CreditLedger,
    counters: UsageCounterStore,
}

impl ConsistencyInspector {
    pub fn new(pool: PgPool) -> Self {
        Self {
            resolver: PlanResolver::new(pool.clone()),
            ledger: CreditLedger::new(pool.clone()),
            counters: UsageCounterStore::new(pool),
        }
    }

    /// Build the report for one user and the current month.
    pub async fn inspect(&self, user_id: Uuid) -> EntitlementResult<ConsistencyReport> {
        let ym = YearMonth::current();
        let plan = self.resolver.resolve(user_id).await;
        let wallet = self.ledger.wallet(user_id).await?;
        let counter = self.counters.current(user_id, &ym).await?;
        let month_spend_ledger = self.ledger.month_spend(user_id, &ym).await?;

        // The all-time sum is a separate aggregate; if it fails we say so
        // instead of inventing a verdict.
        let (ledger_entries, wallet_vs_ledger) = match self.ledger.totals(user_id).await {
            Ok((sum, count)) => {
                let verdict = if count == 0 {
                    // No ledger rows: nothing to reconcile against.
                    // Legacy balances are exempt until their first write.
                    WalletVerdict::Consistent
                } else {
                    let expected = sum.unwrap_or(0);
                    if expected == wallet.balance_credits {
                        WalletVerdict::Consistent
                    } else {
                        WalletVerdict::Mismatch {
                            expected,
                            actual: wallet.balance_credits,
                        }
                    }
                };
                (count, verdict)
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Ledger aggregate unavailable; wallet verdict unknown"
                );
                (-1, WalletVerdict::Unknown)
            }
        };

        let legacy_data = ledger_entries == 0 && wallet.balance_credits > 0;

        // Unlimited plans never spend credits, so their counters carry no
        // reconciliation meaning.
        let mismatch_spent = plan.tier != PlanTier::Unlimited
            && month_spend_ledger != i64::from(counter.credits_spent);

        if mismatch_spent {
            tracing::warn!(
                user_id = %user_id,
                ledger = month_spend_ledger,
                counter = counter.credits_spent,
                "Monthly spend counter disagrees with ledger"
            );
        }

        Ok(ConsistencyReport {
            user_id,
            ym: ym.key(),
            plan: plan.tier,
            checked_at: OffsetDateTime::now_utc(),
            wallet_balance: wallet.balance_credits,
            lifetime_credits: wallet.lifetime_credits,
            ledger_entries,
            month_spend_ledger,
            month_spend_counter: i64::from(counter.credits_spent),
            mismatch_spent,
            legacy_data,
            wallet_vs_ledger,
        })
    }

    /// Whether any flag in the report needs attention.
    pub fn is_clean(report: &ConsistencyReport) -> bool {
        !report.mismatch_spent
            && matches!(report.wallet_vs_ledger, WalletVerdict::Consistent)
    }
}
