//! Stripe client wrapper and static price → plan mapping

use postwise_shared::PlanTier;

use crate::error::{EntitlementError, EntitlementResult};

/// Stripe configuration, loaded from environment
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub standard_price_id: String,
    pub standard_annual_price_id: String,
    pub plus_price_id: String,
    pub plus_annual_price_id: String,
    pub unlimited_price_id: String,
    pub unlimited_annual_price_id: String,
}

impl StripeConfig {
    pub fn from_env() -> EntitlementResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY").map_err(|_| {
            EntitlementError::Internal("STRIPE_SECRET_KEY not configured".to_string())
        })?;

        let var = |name: &str| std::env::var(name).unwrap_or_default();

        Ok(Self {
            secret_key,
            standard_price_id: var("STRIPE_PRICE_STANDARD"),
            standard_annual_price_id: var("STRIPE_PRICE_STANDARD_ANNUAL"),
            plus_price_id: var("STRIPE_PRICE_PLUS"),
            plus_annual_price_id: var("STRIPE_PRICE_PLUS_ANNUAL"),
            unlimited_price_id: var("STRIPE_PRICE_UNLIMITED"),
            unlimited_annual_price_id: var("STRIPE_PRICE_UNLIMITED_ANNUAL"),
        })
    }

    /// Map a Stripe price identifier to an internal plan tier.
    /// Returns None for unmapped prices; the sync adapter decides the
    /// fallback so a configuration gap cannot grant free access.
    pub fn tier_for_price_id(&self, price_id: &str) -> Option<PlanTier> {
        if price_id.is_empty() {
            return None;
        }
        if price_id == self.standard_price_id || price_id == self.standard_annual_price_id {
            Some(PlanTier::Standard)
        } else if price_id == self.plus_price_id || price_id == self.plus_annual_price_id {
            Some(PlanTier::Plus)
        } else if price_id == self.unlimited_price_id || price_id == self.unlimited_annual_price_id
        {
            Some(PlanTier::Unlimited)
        } else {
            None
        }
    }
}

/// Shared Stripe client
#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(config.secret_key.clone());
        Self { client, config }
    }

    pub fn from_env() -> EntitlementResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.client
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test_x".to_string(),
            standard_price_id: "price_standard_m".to_string(),
            standard_annual_price_id: "price_standard_y".to_string(),
            plus_price_id: "price_plus_m".to_string(),
            plus_annual_price_id: "price_plus_y".to_string(),
            unlimited_price_id: "price_unlimited_m".to_string(),
            unlimited_annual_price_id: "price_unlimited_y".to_string(),
        }
    }

    #[test]
    fn test_price_mapping() {
        let cfg = config();
        assert_eq!(
            cfg.tier_for_price_id("price_standard_m"),
            Some(PlanTier::Standard)
        );
        assert_eq!(cfg.tier_for_price_id("price_plus_y"), Some(PlanTier::Plus));
        assert_eq!(
            cfg.tier_for_price_id("price_unlimited_m"),
            Some(PlanTier::Unlimited)
        );
        assert_eq!(cfg.tier_for_price_id("price_retired_tier"), None);
    }

    #[test]
    fn test_empty_price_never_matches() {
        // Unconfigured env vars are empty strings; an empty incoming price
        // id must not match them.
        let mut cfg = config();
        cfg.plus_annual_price_id = String::new();
        assert_eq!(cfg.tier_for_price_id(""), None);
    }
}
