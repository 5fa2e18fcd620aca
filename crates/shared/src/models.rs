//! Database models shared between the engine, the API, and the worker

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::types::Limit;

/// User row, as provisioned by the identity layer.
///
/// `plan_key`/`subscription_status` are denormalized copies maintained by
/// the billing sync adapter for legacy readers; the resolver never trusts
/// them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub plan_key: String,
    pub subscription_status: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Administrator-assigned plan override. At most one row per user;
/// removal flips `is_active`, the row itself is never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlanOverride {
    pub user_id: Uuid,
    pub plan_code: String,
    pub is_active: bool,
    pub expires_at: Option<OffsetDateTime>,
    pub reason: String,
    pub created_by: Uuid,
    pub updated_at: OffsetDateTime,
}

impl PlanOverride {
    /// Whether this override currently grants its plan.
    pub fn is_effective(&self, now: OffsetDateTime) -> bool {
        self.is_active && self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// Append-only audit record of one admin override mutation
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OverrideAuditEntry {
    pub id: Uuid,
    pub target_user_id: Uuid,
    pub actor_user_id: Uuid,
    pub old_plan: Option<String>,
    pub new_plan: String,
    pub old_is_active: Option<bool>,
    pub new_is_active: bool,
    pub reason: String,
    pub created_at: OffsetDateTime,
}

/// Local mirror of billing-provider subscription state.
/// Owned exclusively by the sync adapter.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub user_id: Uuid,
    pub plan_key: String,
    pub status: String,
    pub current_period_end: Option<OffsetDateTime>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub access_blocked: bool,
    pub updated_at: OffsetDateTime,
}

/// One immutable credit movement
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub action_type: String,
    pub delta: i64,
    pub case_id: Option<Uuid>,
    pub meta: serde_json::Value,
    pub created_at: OffsetDateTime,
}

/// Cached credit balance, mutated only alongside a ledger write
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub user_id: Uuid,
    pub balance_credits: i64,
    pub lifetime_credits: i64,
    pub updated_at: OffsetDateTime,
}

impl Wallet {
    /// Zero-balance wallet for users with no row yet.
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            balance_credits: 0,
            lifetime_credits: 0,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }
}

/// Per-user, per-calendar-month usage counters
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageCounter {
    pub user_id: Uuid,
    pub ym: String,
    pub cases_created: i32,
    pub credits_spent: i32,
    pub ai_sessions_started: i32,
    pub updated_at: OffsetDateTime,
}

impl UsageCounter {
    /// All-zero counter for months with no row yet.
    pub fn empty(user_id: Uuid, ym: String) -> Self {
        Self {
            user_id,
            ym,
            cases_created: 0,
            credits_spent: 0,
            ai_sessions_started: 0,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        }
    }
}

/// Lifecycle state of an AI chat session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Expired,
    Closed,
}

/// A bounded AI chat session tied to one case
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AiSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub case_id: Uuid,
    pub ym: String,
    pub started_at: OffsetDateTime,
    pub last_message_at: OffsetDateTime,
    pub message_count: i32,
    pub max_messages: Option<i32>,
    pub expires_at: OffsetDateTime,
    pub is_active: bool,
}

impl AiSession {
    /// Message ceiling, normalized (NULL and legacy sentinel values both
    /// mean unbounded).
    pub fn message_limit(&self) -> Limit {
        match self.max_messages {
            None => Limit::Unlimited,
            Some(raw) => Limit::from_raw(i64::from(raw)),
        }
    }

    /// Where this session sits in NONE → ACTIVE → EXPIRED/CLOSED.
    /// Expiry is evaluated lazily from the row, not stored.
    pub fn state(&self, now: OffsetDateTime) -> SessionState {
        if !self.is_active {
            return SessionState::Closed;
        }
        if now >= self.expires_at || !self.message_limit().allows(self.message_count as u32) {
            return SessionState::Expired;
        }
        SessionState::Active
    }

    /// Whether one more message fits within cap and wall clock.
    pub fn can_extend(&self, now: OffsetDateTime) -> bool {
        self.state(now) == SessionState::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn session(message_count: i32, max_messages: Option<i32>, is_active: bool) -> AiSession {
        let now = OffsetDateTime::now_utc();
        AiSession {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            case_id: Uuid::new_v4(),
            ym: "2026-08".to_string(),
            started_at: now,
            last_message_at: now,
            message_count,
            max_messages,
            expires_at: now + Duration::hours(2),
            is_active,
        }
    }

    #[test]
    fn test_session_active_within_bounds() {
        let s = session(1, Some(20), true);
        let now = OffsetDateTime::now_utc();
        assert_eq!(s.state(now), SessionState::Active);
        assert!(s.can_extend(now));
    }

    #[test]
    fn test_session_expires_at_message_cap() {
        let s = session(20, Some(20), true);
        let now = OffsetDateTime::now_utc();
        assert_eq!(s.state(now), SessionState::Expired);
        assert!(!s.can_extend(now));
    }

    #[test]
    fn test_session_expires_at_deadline() {
        let mut s = session(1, Some(20), true);
        s.expires_at = OffsetDateTime::now_utc() - Duration::minutes(1);
        assert_eq!(s.state(OffsetDateTime::now_utc()), SessionState::Expired);
    }

    #[test]
    fn test_session_closed_is_terminal() {
        let s = session(1, Some(20), false);
        assert_eq!(s.state(OffsetDateTime::now_utc()), SessionState::Closed);
    }

    #[test]
    fn test_session_null_cap_is_unlimited() {
        let s = session(5_000, None, true);
        assert_eq!(s.message_limit(), Limit::Unlimited);
        assert_eq!(s.state(OffsetDateTime::now_utc()), SessionState::Active);
    }

    #[test]
    fn test_session_sentinel_cap_is_unlimited() {
        // Legacy rows carry 999999 instead of NULL; both normalize the same.
        let s = session(5_000, Some(999_999), true);
        assert_eq!(s.message_limit(), Limit::Unlimited);
    }

    #[test]
    fn test_override_effectiveness() {
        let now = OffsetDateTime::now_utc();
        let mut o = PlanOverride {
            user_id: Uuid::new_v4(),
            plan_code: "plus".to_string(),
            is_active: true,
            expires_at: None,
            reason: "support escalation".to_string(),
            created_by: Uuid::new_v4(),
            updated_at: now,
        };
        assert!(o.is_effective(now));

        o.expires_at = Some(now - Duration::hours(1));
        assert!(!o.is_effective(now));

        o.expires_at = Some(now + Duration::hours(1));
        assert!(o.is_effective(now));

        o.is_active = false;
        assert!(!o.is_effective(now));
    }
}
