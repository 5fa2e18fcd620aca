//! AI chat session lifecycle
//!
//! NONE → ACTIVE → EXPIRED (message cap or 2-hour wall clock) / CLOSED
//! (explicit end). Starting a session costs exactly one credit — charged
//! once, in the same transaction that creates the row — and extending is
//! free. Unlimited plans still create sessions for message bookkeeping
//! but bypass the charge entirely.
//!
//! At-most-one active session per (user, case) is enforced by a partial
//! unique index, not an application-level check: of N concurrent starts,
//! exactly one insert wins and the rest surface `SessionAlreadyActive`.

use sqlx::PgPool;
use uuid::Uuid;

use postwise_shared::models::{AiSession, SessionState};
use postwise_shared::{LedgerAction, YearMonth};

use crate::error::{EntitlementError, EntitlementResult};
use crate::ledger::CreditLedger;
use crate::resolver::PlanResolver;
use crate::usage;

/// Name of the partial unique index guarding active sessions;
/// a violation of it is the concurrency signal for "already active".
const ACTIVE_SESSION_INDEX: &str = "idx_ai_sessions_one_active";

/// Manages bounded AI chat sessions
#[derive(Clone)]
pub struct AiSessionManager {
    pool: PgPool,
    resolver: PlanResolver,
}

impl AiSessionManager {
    pub fn new(pool: PgPool) -> Self {
        let resolver = PlanResolver::new(pool.clone());
        Self { pool, resolver }
    }

    /// Start a session for a case, charging one credit (unless the plan
    /// bypasses credits). Session row, SPEND ledger entry, wallet delta,
    /// and counter increments commit together or not at all.
    pub async fn start(&self, user_id: Uuid, case_id: Uuid) -> EntitlementResult<AiSession> {
        let plan = self.resolver.resolve(user_id).await;
        if !plan.usable() {
            return Err(EntitlementError::Forbidden);
        }

        let max_messages: Option<i32> = plan
            .tier
            .session_message_limit()
            .bound()
            .map(|n| n as i32);
        let ym = YearMonth::current();

        let mut tx = self.pool.begin().await?;

        // Expiry is lazy: a session past its cap or deadline may still
        // hold the active slot. Release it before inserting.
        sqlx::query(
            r#"
            UPDATE ai_sessions
            SET is_active = FALSE
            WHERE user_id = $1 AND case_id = $2 AND is_active
              AND (expires_at <= NOW()
                   OR (max_messages IS NOT NULL AND message_count >= max_messages))
            "#,
        )
        .bind(user_id)
        .bind(case_id)
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query_as::<_, AiSession>(
            r#"
            INSERT INTO ai_sessions (user_id, case_id, ym, message_count, max_messages, expires_at)
            VALUES ($1, $2, $3, 1, $4, NOW() + INTERVAL '2 hours')
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(case_id)
        .bind(ym.key())
        .bind(max_messages)
        .fetch_one(&mut *tx)
        .await;

        let session = match inserted {
            Ok(session) => session,
            Err(sqlx::Error::Database(db)) if db.constraint() == Some(ACTIVE_SESSION_INDEX) => {
                return Err(EntitlementError::SessionAlreadyActive);
            }
            Err(e) => return Err(e.into()),
        };

        if !plan.tier.bypasses_credits() {
            let meta = serde_json::json!({ "session_id": session.id });
            CreditLedger::append_in_tx(
                &mut tx,
                user_id,
                LedgerAction::Spend,
                -1,
                Some(case_id),
                meta,
            )
            .await?;
            usage::increment_credits_spent_in_tx(&mut tx, user_id, &ym, 1).await?;
        }
        usage::increment_ai_sessions_started_in_tx(&mut tx, user_id, &ym).await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            case_id = %case_id,
            session_id = %session.id,
            charged = !plan.tier.bypasses_credits(),
            "AI session started"
        );

        Ok(session)
    }

    /// Record one more message in an active session. Free: never touches
    /// the ledger or wallet. The guard conditions live in the UPDATE
    /// predicate, so a session at its cap or past its deadline cannot be
    /// extended by a racing request.
    pub async fn extend(&self, session_id: Uuid, user_id: Uuid) -> EntitlementResult<AiSession> {
        let updated = sqlx::query_as::<_, AiSession>(
            r#"
            UPDATE ai_sessions
            SET message_count = message_count + 1, last_message_at = NOW()
            WHERE id = $1 AND user_id = $2 AND is_active
              AND expires_at > NOW()
              AND (max_messages IS NULL OR message_count < max_messages)
            RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(session) = updated {
            return Ok(session);
        }

        // Classify the refusal.
        let existing: Option<AiSession> =
            sqlx::query_as("SELECT * FROM ai_sessions WHERE id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(existing) = existing else {
            return Err(EntitlementError::Validation("Unknown session".to_string()));
        };
        if existing.user_id != user_id {
            return Err(EntitlementError::Forbidden);
        }

        match existing.state(time::OffsetDateTime::now_utc()) {
            SessionState::Closed => Err(EntitlementError::Validation(
                "Session is closed; start a new session".to_string(),
            )),
            SessionState::Expired => {
                // Lazily settle the terminal state.
                sqlx::query("UPDATE ai_sessions SET is_active = FALSE WHERE id = $1 AND is_active")
                    .bind(session_id)
                    .execute(&self.pool)
                    .await?;
                if !existing.message_limit().allows(existing.message_count as u32) {
                    Err(EntitlementError::QuotaExceeded)
                } else {
                    Err(EntitlementError::Validation(
                        "Session has expired; start a new session".to_string(),
                    ))
                }
            }
            // The guarded UPDATE should have taken it; treat as a lost
            // race with a concurrent terminal transition.
            SessionState::Active => Err(EntitlementError::Validation(
                "Session is no longer extendable".to_string(),
            )),
        }
    }

    /// Explicitly end a session. Idempotent: closing a closed session
    /// returns it unchanged.
    pub async fn close(&self, session_id: Uuid, user_id: Uuid) -> EntitlementResult<AiSession> {
        let existing: Option<AiSession> =
            sqlx::query_as("SELECT * FROM ai_sessions WHERE id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(existing) = existing else {
            return Err(EntitlementError::Validation("Unknown session".to_string()));
        };
        if existing.user_id != user_id {
            return Err(EntitlementError::Forbidden);
        }
        if !existing.is_active {
            return Ok(existing);
        }

        let session: AiSession = sqlx::query_as(
            "UPDATE ai_sessions SET is_active = FALSE WHERE id = $1 RETURNING *",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(session)
    }

    /// Messages sent across all of a user's sessions in one month.
    pub async fn month_message_count(
        &self,
        user_id: Uuid,
        ym: &YearMonth,
    ) -> EntitlementResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(message_count), 0) FROM ai_sessions WHERE user_id = $1 AND ym = $2",
        )
        .bind(user_id)
        .bind(ym.key())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
