//! Common types used across Postwise

use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// User ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Case ID wrapper (a case is one uploaded letter plus its replies)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(pub Uuid);

impl CaseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CaseId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for CaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// AI session ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Limits
// =============================================================================

/// Legacy numeric stand-in for "no limit" found in persisted records.
/// Normalized to [`Limit::Unlimited`] on every read; callers must never
/// compare against this value directly.
pub const UNLIMITED_SENTINEL: i64 = 999_999;

/// A resource limit: either a concrete monthly ceiling or unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Bounded(u32),
    Unlimited,
}

impl Limit {
    /// Normalize a raw persisted value. The legacy sentinel and anything
    /// at or above it collapse to `Unlimited`; negatives clamp to zero.
    pub fn from_raw(raw: i64) -> Self {
        if raw >= UNLIMITED_SENTINEL {
            Limit::Unlimited
        } else if raw <= 0 {
            Limit::Bounded(0)
        } else {
            Limit::Bounded(raw as u32)
        }
    }

    /// Whether `used` consumed units still leave room under this limit.
    pub fn allows(&self, used: u32) -> bool {
        match self {
            Limit::Unlimited => true,
            Limit::Bounded(max) => used < *max,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Limit::Unlimited)
    }

    /// Concrete ceiling, if bounded.
    pub fn bound(&self) -> Option<u32> {
        match self {
            Limit::Bounded(max) => Some(*max),
            Limit::Unlimited => None,
        }
    }
}

// Wire format: an integer, or the string "unlimited". The sentinel never
// leaves the process.
impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Limit::Bounded(max) => serializer.serialize_u32(*max),
            Limit::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

impl std::fmt::Display for Limit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Limit::Bounded(max) => write!(f, "{}", max),
            Limit::Unlimited => write!(f, "unlimited"),
        }
    }
}

// =============================================================================
// Plan tiers
// =============================================================================

/// Subscription plan tier.
///
/// Limits are static configuration, not derived from billing data:
/// Free (1 case) → Standard (5 cases) → Plus (15 cases) → Unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Standard,
    Plus,
    Unlimited,
}

impl Default for PlanTier {
    fn default() -> Self {
        Self::Free
    }
}

impl PlanTier {
    /// Cases that may be created per calendar month.
    pub fn monthly_case_limit(&self) -> Limit {
        match self {
            Self::Free => Limit::Bounded(1),
            Self::Standard => Limit::Bounded(5),
            Self::Plus => Limit::Bounded(15),
            Self::Unlimited => Limit::Unlimited,
        }
    }

    /// Messages allowed within one AI chat session.
    pub fn session_message_limit(&self) -> Limit {
        match self {
            Self::Free => Limit::Bounded(20),
            Self::Standard => Limit::Bounded(50),
            Self::Plus => Limit::Bounded(100),
            Self::Unlimited => Limit::Unlimited,
        }
    }

    /// Whether uploads are processed ahead of the free queue.
    pub fn priority_processing(&self) -> bool {
        matches!(self, Self::Plus | Self::Unlimited)
    }

    /// Whether reply drafts offer alternative tones.
    pub fn tone_variants(&self) -> bool {
        !matches!(self, Self::Free)
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, Self::Free)
    }

    /// Whether this plan bypasses credit charges entirely.
    pub fn bypasses_credits(&self) -> bool {
        matches!(self, Self::Unlimited)
    }

    /// Fallback tier for price identifiers missing from the static map.
    /// Mapping gaps must never silently grant free or unlimited access.
    pub fn cheapest_paid() -> Self {
        Self::Standard
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Standard => "standard",
            Self::Plus => "plus",
            Self::Unlimited => "unlimited",
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "standard" => Ok(Self::Standard),
            "plus" => Ok(Self::Plus),
            "unlimited" => Ok(Self::Unlimited),
            _ => Err(format!("Invalid plan tier: {}", s)),
        }
    }
}

// =============================================================================
// Subscription status
// =============================================================================

/// Billing-provider subscription status, as mirrored locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Inactive,
}

impl Default for SubscriptionStatus {
    fn default() -> Self {
        Self::Inactive
    }
}

impl SubscriptionStatus {
    /// Statuses that grant the plan outright.
    pub fn is_entitling(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }

    /// Statuses where we know the plan but payment has lapsed, so usage
    /// is refused until payment recovers.
    pub fn is_delinquent(&self) -> bool {
        matches!(self, Self::PastDue | Self::Unpaid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Unpaid => "unpaid",
            Self::Inactive => "inactive",
        }
    }

    /// Parse a status from string, mapping unknown values to Inactive
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            "canceled" => Self::Canceled,
            "unpaid" => Self::Unpaid,
            _ => Self::Inactive,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// User roles
// =============================================================================

/// Platform role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl Default for UserRole {
    fn default() -> Self {
        Self::User
    }
}

impl UserRole {
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }

    /// Parse a role from string (case insensitive), defaulting to User
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "admin" => Self::Admin,
            _ => Self::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Ledger vocabulary
// =============================================================================

/// Action type of a credit ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum LedgerAction {
    Refill,
    Spend,
    Adjustment,
}

impl LedgerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refill => "REFILL",
            Self::Spend => "SPEND",
            Self::Adjustment => "ADJUSTMENT",
        }
    }
}

impl std::fmt::Display for LedgerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why credits were applied to a wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditReason {
    Purchase,
    AdminAdjustment,
    Promo,
    Refund,
}

impl CreditReason {
    /// Whether this reason may only be used by administrators.
    pub fn requires_admin(&self) -> bool {
        matches!(self, Self::AdminAdjustment)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::AdminAdjustment => "admin_adjustment",
            Self::Promo => "promo",
            Self::Refund => "refund",
        }
    }
}

impl std::str::FromStr for CreditReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "purchase" => Ok(Self::Purchase),
            "admin_adjustment" => Ok(Self::AdminAdjustment),
            "promo" => Ok(Self::Promo),
            "refund" => Ok(Self::Refund),
            _ => Err(format!("Invalid credit reason: {}", s)),
        }
    }
}

impl std::fmt::Display for CreditReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    // =========================================================================
    // Limit Tests
    // =========================================================================

    #[test]
    fn test_limit_from_raw_normalizes_sentinel() {
        assert_eq!(Limit::from_raw(999_999), Limit::Unlimited);
        assert_eq!(Limit::from_raw(1_500_000), Limit::Unlimited);
        assert_eq!(Limit::from_raw(5), Limit::Bounded(5));
        assert_eq!(Limit::from_raw(0), Limit::Bounded(0));
        assert_eq!(Limit::from_raw(-3), Limit::Bounded(0));
    }

    #[test]
    fn test_limit_allows() {
        assert!(Limit::Bounded(1).allows(0));
        assert!(!Limit::Bounded(1).allows(1));
        assert!(!Limit::Bounded(0).allows(0));
        assert!(Limit::Unlimited.allows(u32::MAX));
    }

    #[test]
    fn test_limit_serializes_as_number_or_string() {
        assert_eq!(serde_json::to_value(Limit::Bounded(5)).unwrap(), 5);
        assert_eq!(
            serde_json::to_value(Limit::Unlimited).unwrap(),
            "unlimited"
        );
    }

    // =========================================================================
    // PlanTier Tests
    // =========================================================================

    #[test]
    fn test_plan_tier_default() {
        assert_eq!(PlanTier::default(), PlanTier::Free);
    }

    #[test]
    fn test_plan_tier_case_limits() {
        assert_eq!(PlanTier::Free.monthly_case_limit(), Limit::Bounded(1));
        assert_eq!(PlanTier::Standard.monthly_case_limit(), Limit::Bounded(5));
        assert_eq!(PlanTier::Plus.monthly_case_limit(), Limit::Bounded(15));
        assert_eq!(PlanTier::Unlimited.monthly_case_limit(), Limit::Unlimited);
    }

    #[test]
    fn test_plan_tier_message_limits() {
        assert_eq!(PlanTier::Free.session_message_limit(), Limit::Bounded(20));
        assert_eq!(
            PlanTier::Standard.session_message_limit(),
            Limit::Bounded(50)
        );
        assert_eq!(PlanTier::Plus.session_message_limit(), Limit::Bounded(100));
        assert_eq!(
            PlanTier::Unlimited.session_message_limit(),
            Limit::Unlimited
        );
    }

    #[test]
    fn test_plan_tier_features() {
        assert!(!PlanTier::Free.priority_processing());
        assert!(!PlanTier::Standard.priority_processing());
        assert!(PlanTier::Plus.priority_processing());
        assert!(PlanTier::Unlimited.priority_processing());

        assert!(!PlanTier::Free.tone_variants());
        assert!(PlanTier::Standard.tone_variants());
    }

    #[test]
    fn test_plan_tier_credit_bypass() {
        assert!(!PlanTier::Free.bypasses_credits());
        assert!(!PlanTier::Plus.bypasses_credits());
        assert!(PlanTier::Unlimited.bypasses_credits());
    }

    #[test]
    fn test_plan_tier_cheapest_paid() {
        let tier = PlanTier::cheapest_paid();
        assert!(tier.is_paid());
        assert_eq!(tier, PlanTier::Standard);
    }

    #[test]
    fn test_plan_tier_display_and_parse() {
        assert_eq!(format!("{}", PlanTier::Standard), "standard");
        assert_eq!("PLUS".parse::<PlanTier>().unwrap(), PlanTier::Plus);
        assert_eq!(
            "unlimited".parse::<PlanTier>().unwrap(),
            PlanTier::Unlimited
        );
        assert!("enterprise".parse::<PlanTier>().is_err());
    }

    // =========================================================================
    // SubscriptionStatus Tests
    // =========================================================================

    #[test]
    fn test_subscription_status_classes() {
        assert!(SubscriptionStatus::Active.is_entitling());
        assert!(SubscriptionStatus::Trialing.is_entitling());
        assert!(!SubscriptionStatus::PastDue.is_entitling());

        assert!(SubscriptionStatus::PastDue.is_delinquent());
        assert!(SubscriptionStatus::Unpaid.is_delinquent());
        assert!(!SubscriptionStatus::Canceled.is_delinquent());
        assert!(!SubscriptionStatus::Active.is_delinquent());
    }

    #[test]
    fn test_subscription_status_from_str_lossy() {
        assert_eq!(
            SubscriptionStatus::from_str_lossy("past_due"),
            SubscriptionStatus::PastDue
        );
        assert_eq!(
            SubscriptionStatus::from_str_lossy("incomplete_expired"),
            SubscriptionStatus::Inactive
        );
    }

    // =========================================================================
    // CreditReason Tests
    // =========================================================================

    #[test]
    fn test_credit_reason_admin_gate() {
        assert!(CreditReason::AdminAdjustment.requires_admin());
        assert!(!CreditReason::Purchase.requires_admin());
        assert!(!CreditReason::Promo.requires_admin());
        assert!(!CreditReason::Refund.requires_admin());
    }

    #[test]
    fn test_credit_reason_parse() {
        assert_eq!(
            CreditReason::from_str("admin_adjustment").unwrap(),
            CreditReason::AdminAdjustment
        );
        assert!(CreditReason::from_str("chargeback").is_err());
    }

    // =========================================================================
    // UserRole Tests
    // =========================================================================

    #[test]
    fn test_user_role_admin_predicate() {
        assert!(UserRole::Admin.is_admin());
        assert!(!UserRole::User.is_admin());
        assert_eq!(UserRole::from_str_lossy("ADMIN"), UserRole::Admin);
        assert_eq!(UserRole::from_str_lossy("unknown"), UserRole::User);
    }
}
