//! Administrator plan overrides
//!
//! One override row per user, upserted on `user_id`; an append-only audit
//! table records every admin action, including re-applies that change
//! nothing. Override rows are never deleted — removal is `is_active =
//! false` — so the audit trail and the authoritative row can never
//! disagree about existence.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use postwise_shared::models::{OverrideAuditEntry, PlanOverride};
use postwise_shared::{PlanTier, UserRole};

use crate::error::{EntitlementError, EntitlementResult};

/// Parameters for applying an override
#[derive(Debug, Clone)]
pub struct ApplyOverrideParams {
    pub target_user_id: Uuid,
    pub plan_code: PlanTier,
    pub is_active: bool,
    pub expires_at: Option<OffsetDateTime>,
    pub reason: String,
}

/// Store for admin-assigned plan overrides
#[derive(Clone)]
pub struct OverrideStore {
    pool: PgPool,
}

impl OverrideStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert the override row for a user and append one audit entry.
    ///
    /// Requires the actor to hold the admin role. Re-applying an identical
    /// state still audits — the trail reflects every admin action, not
    /// only net changes — but cannot duplicate the row (unique on
    /// user_id). Concurrent writers resolve last-writer-wins on the row;
    /// each writer's audit entry survives.
    pub async fn apply(
        &self,
        params: ApplyOverrideParams,
        actor_id: Uuid,
        actor_role: UserRole,
    ) -> EntitlementResult<PlanOverride> {
        if !actor_role.is_admin() {
            return Err(EntitlementError::Forbidden);
        }
        if params.reason.trim().is_empty() {
            return Err(EntitlementError::Validation(
                "Override reason must not be empty".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        // Lock the current row so the audit pre-state matches what this
        // writer actually replaced.
        let old: Option<PlanOverride> =
            sqlx::query_as("SELECT * FROM plan_overrides WHERE user_id = $1 FOR UPDATE")
                .bind(params.target_user_id)
                .fetch_optional(&mut *tx)
                .await?;

        let row: PlanOverride = sqlx::query_as(
            r#"
            INSERT INTO plan_overrides (user_id, plan_code, is_active, expires_at, reason, created_by, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                plan_code = EXCLUDED.plan_code,
                is_active = EXCLUDED.is_active,
                expires_at = EXCLUDED.expires_at,
                reason = EXCLUDED.reason,
                created_by = EXCLUDED.created_by,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(params.target_user_id)
        .bind(params.plan_code.as_str())
        .bind(params.is_active)
        .bind(params.expires_at)
        .bind(&params.reason)
        .bind(actor_id)
        .fetch_one(&mut *tx)
        .await?;

        self.append_audit(&mut tx, old.as_ref(), &row, actor_id, &params.reason)
            .await?;

        tx.commit().await?;

        tracing::info!(
            target_user_id = %params.target_user_id,
            actor_id = %actor_id,
            plan_code = %params.plan_code,
            is_active = params.is_active,
            "Plan override applied"
        );

        Ok(row)
    }

    /// Deactivate a user's override and append an audit entry.
    /// The row stays in place so history remains reconstructible.
    pub async fn remove(
        &self,
        target_user_id: Uuid,
        actor_id: Uuid,
        actor_role: UserRole,
        reason: &str,
    ) -> EntitlementResult<PlanOverride> {
        if !actor_role.is_admin() {
            return Err(EntitlementError::Forbidden);
        }

        let mut tx = self.pool.begin().await?;

        let old: Option<PlanOverride> =
            sqlx::query_as("SELECT * FROM plan_overrides WHERE user_id = $1 FOR UPDATE")
                .bind(target_user_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(old) = old else {
            return Err(EntitlementError::Validation(
                "User has no plan override".to_string(),
            ));
        };

        let row: PlanOverride = sqlx::query_as(
            r#"
            UPDATE plan_overrides
            SET is_active = FALSE, updated_at = NOW()
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(target_user_id)
        .fetch_one(&mut *tx)
        .await?;

        self.append_audit(&mut tx, Some(&old), &row, actor_id, reason)
            .await?;

        tx.commit().await?;

        tracing::info!(
            target_user_id = %target_user_id,
            actor_id = %actor_id,
            "Plan override removed"
        );

        Ok(row)
    }

    /// Current override row, if any (active or not).
    pub async fn get(&self, user_id: Uuid) -> EntitlementResult<Option<PlanOverride>> {
        let row = sqlx::query_as("SELECT * FROM plan_overrides WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Audit trail for a user, newest first.
    pub async fn audit_trail(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> EntitlementResult<Vec<OverrideAuditEntry>> {
        let rows = sqlx::query_as(
            r#"
            SELECT * FROM plan_override_audit
            WHERE target_user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn append_audit(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        old: Option<&PlanOverride>,
        new: &PlanOverride,
        actor_id: Uuid,
        reason: &str,
    ) -> EntitlementResult<()> {
        sqlx::query(
            r#"
            INSERT INTO plan_override_audit
                (target_user_id, actor_user_id, old_plan, new_plan, old_is_active, new_is_active, reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(new.user_id)
        .bind(actor_id)
        .bind(old.map(|o| o.plan_code.clone()))
        .bind(&new.plan_code)
        .bind(old.map(|o| o.is_active))
        .bind(new.is_active)
        .bind(reason)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
