//! Credit ledger and wallet aggregate
//!
//! The ledger is the source of truth: an append-only log of signed credit
//! deltas. The wallet is a cached running sum, mutated only in the same
//! transaction as its ledger row — a ledger row without a wallet mutation
//! (or the reverse) cannot be committed. The one tolerated asymmetry is
//! the pre-ledger "legacy" account: positive balance, zero ledger rows,
//! exempt from the equality invariant until its first ledger write.
//!
//! Spends are race-safe because the balance check lives inside the UPDATE
//! itself (`balance + delta >= 0` as a row predicate), not in an
//! application-level read that a concurrent request could invalidate.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use postwise_shared::models::{LedgerEntry, Wallet};
use postwise_shared::{CreditReason, LedgerAction, UserRole, YearMonth};

use crate::error::{EntitlementError, EntitlementResult};
use crate::usage;

/// Append-only credit accounting for one wallet per user
#[derive(Clone)]
pub struct CreditLedger {
    pool: PgPool,
}

impl CreditLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Write one immutable ledger row and apply its delta to the wallet,
    /// atomically. Negative deltas that would drive the balance below
    /// zero fail with `InsufficientCredits` and leave no trace.
    pub async fn append(
        &self,
        user_id: Uuid,
        action: LedgerAction,
        delta: i64,
        case_id: Option<Uuid>,
        meta: serde_json::Value,
    ) -> EntitlementResult<LedgerEntry> {
        let mut tx = self.pool.begin().await?;
        let entry = Self::append_in_tx(&mut tx, user_id, action, delta, case_id, meta).await?;
        tx.commit().await?;
        Ok(entry)
    }

    /// Transaction-composable core of [`append`], for callers that couple
    /// the ledger write with further mutations (session start, counter
    /// increments).
    pub async fn append_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        action: LedgerAction,
        delta: i64,
        case_id: Option<Uuid>,
        meta: serde_json::Value,
    ) -> EntitlementResult<LedgerEntry> {
        match action {
            LedgerAction::Refill if delta <= 0 => {
                return Err(EntitlementError::Validation(
                    "REFILL delta must be positive".to_string(),
                ));
            }
            LedgerAction::Spend if delta >= 0 => {
                return Err(EntitlementError::Validation(
                    "SPEND delta must be negative".to_string(),
                ));
            }
            LedgerAction::Adjustment if delta == 0 => {
                return Err(EntitlementError::Validation(
                    "ADJUSTMENT delta must be nonzero".to_string(),
                ));
            }
            _ => {}
        }

        // Wallet first: the balance guard decides whether the ledger row
        // may exist at all.
        if delta >= 0 {
            sqlx::query(
                r#"
                INSERT INTO wallets (user_id, balance_credits, lifetime_credits, updated_at)
                VALUES ($1, $2, $2, NOW())
                ON CONFLICT (user_id) DO UPDATE SET
                    balance_credits = wallets.balance_credits + $2,
                    lifetime_credits = wallets.lifetime_credits + $2,
                    updated_at = NOW()
                "#,
            )
            .bind(user_id)
            .bind(delta)
            .execute(&mut **tx)
            .await?;
        } else {
            let updated = sqlx::query(
                r#"
                UPDATE wallets
                SET balance_credits = balance_credits + $2, updated_at = NOW()
                WHERE user_id = $1 AND balance_credits + $2 >= 0
                "#,
            )
            .bind(user_id)
            .bind(delta)
            .execute(&mut **tx)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(EntitlementError::InsufficientCredits);
            }
        }

        let entry: LedgerEntry = sqlx::query_as(
            r#"
            INSERT INTO credit_ledger (user_id, action_type, delta, case_id, meta)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(action.as_str())
        .bind(delta)
        .bind(case_id)
        .bind(meta)
        .fetch_one(&mut **tx)
        .await?;

        Ok(entry)
    }

    /// Grant credits to a wallet.
    ///
    /// `admin_adjustment`, and any target other than the actor, require
    /// the admin role. Admin adjustments are recorded as ADJUSTMENT rows;
    /// purchases, promos, and refunds as REFILL.
    pub async fn apply_credits(
        &self,
        target_user_id: Uuid,
        amount: i64,
        reason: CreditReason,
        actor_id: Uuid,
        actor_role: UserRole,
    ) -> EntitlementResult<LedgerEntry> {
        if amount <= 0 {
            return Err(EntitlementError::Validation(
                "Credit amount must be positive".to_string(),
            ));
        }
        if (reason.requires_admin() || target_user_id != actor_id) && !actor_role.is_admin() {
            return Err(EntitlementError::Forbidden);
        }

        let action = match reason {
            CreditReason::AdminAdjustment => LedgerAction::Adjustment,
            _ => LedgerAction::Refill,
        };
        let meta = serde_json::json!({
            "reason": reason.as_str(),
            "actor_user_id": actor_id,
        });

        let entry = self
            .append(target_user_id, action, amount, None, meta)
            .await?;

        tracing::info!(
            target_user_id = %target_user_id,
            actor_id = %actor_id,
            amount = amount,
            reason = %reason,
            "Credits applied"
        );

        Ok(entry)
    }

    /// Spend credits against a case, keeping the monthly spent counter in
    /// lockstep within the same transaction.
    pub async fn spend(
        &self,
        user_id: Uuid,
        amount: i64,
        case_id: Option<Uuid>,
        meta: serde_json::Value,
    ) -> EntitlementResult<LedgerEntry> {
        if amount <= 0 {
            return Err(EntitlementError::Validation(
                "Spend amount must be positive".to_string(),
            ));
        }

        let ym = YearMonth::current();
        let mut tx = self.pool.begin().await?;
        let entry =
            Self::append_in_tx(&mut tx, user_id, LedgerAction::Spend, -amount, case_id, meta)
                .await?;
        usage::increment_credits_spent_in_tx(&mut tx, user_id, &ym, amount).await?;
        tx.commit().await?;
        Ok(entry)
    }

    /// Current wallet, zero-balance default when no row exists yet.
    pub async fn wallet(&self, user_id: Uuid) -> EntitlementResult<Wallet> {
        let row: Option<Wallet> = sqlx::query_as("SELECT * FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.unwrap_or_else(|| Wallet::empty(user_id)))
    }

    /// Ledger entries for a user, oldest first (the audit ordering).
    pub async fn entries(&self, user_id: Uuid, limit: i64) -> EntitlementResult<Vec<LedgerEntry>> {
        let rows = sqlx::query_as(
            r#"
            SELECT * FROM credit_ledger
            WHERE user_id = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Credits spent within one calendar month, recomputed from negative
    /// deltas in the month's date range — never from metadata tags.
    pub async fn month_spend(&self, user_id: Uuid, ym: &YearMonth) -> EntitlementResult<i64> {
        let (spend,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(-delta), 0)
            FROM credit_ledger
            WHERE user_id = $1 AND delta < 0 AND created_at >= $2 AND created_at < $3
            "#,
        )
        .bind(user_id)
        .bind(ym.start())
        .bind(ym.end_exclusive())
        .fetch_one(&self.pool)
        .await?;
        Ok(spend)
    }

    /// All-time ledger sum and row count for one user, via a bounded SQL
    /// aggregate. `(None, 0)` means the user has no ledger rows.
    pub async fn totals(&self, user_id: Uuid) -> EntitlementResult<(Option<i64>, i64)> {
        let (sum, count): (Option<i64>, i64) = sqlx::query_as(
            "SELECT SUM(delta), COUNT(*) FROM credit_ledger WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((sum, count))
    }
}
