//! Billing provider sync
//!
//! Pulls a user's subscription state from Stripe and mirrors it locally.
//! The mirror (and the denormalized plan columns on `users`) are owned
//! exclusively by this adapter. Provider calls run under a bounded timeout
//! with limited retry; a failed explicit sync surfaces
//! `UpstreamUnavailable` and leaves persisted state untouched, so a
//! transient outage can never erase a paying user's plan.

use std::future::Future;
use std::time::Duration;

use sqlx::PgPool;
use stripe::{
    Customer, ListCustomers, ListSubscriptions, Subscription as StripeSubscription,
    SubscriptionStatus as StripeSubStatus, SubscriptionStatusFilter,
};
use time::OffsetDateTime;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use uuid::Uuid;

use postwise_shared::models::Subscription;
use postwise_shared::{PlanTier, SubscriptionStatus};

use crate::client::StripeClient;
use crate::error::{EntitlementError, EntitlementResult};

/// Upper bound on any single provider round trip, retries included.
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(15);

/// A provider subscription reduced to what selection needs.
/// Pure input for [`select_subscription`].
#[derive(Debug, Clone)]
pub struct ProviderSubscription {
    pub subscription_id: String,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<OffsetDateTime>,
    pub price_id: Option<String>,
}

/// Pick the subscription that should drive entitlements.
///
/// Preference order: entitling (active/trialing), then delinquent
/// (past_due/unpaid), then canceled with an unexpired paid period, then
/// none.
pub fn select_subscription<'a>(
    subs: &'a [ProviderSubscription],
    now: OffsetDateTime,
) -> Option<&'a ProviderSubscription> {
    if let Some(sub) = subs.iter().find(|s| s.status.is_entitling()) {
        return Some(sub);
    }
    if let Some(sub) = subs.iter().find(|s| s.status.is_delinquent()) {
        return Some(sub);
    }
    subs.iter().find(|s| {
        s.status == SubscriptionStatus::Canceled
            && s.current_period_end.map_or(false, |end| end > now)
    })
}

fn map_stripe_status(status: StripeSubStatus) -> SubscriptionStatus {
    match status {
        StripeSubStatus::Active => SubscriptionStatus::Active,
        StripeSubStatus::Trialing => SubscriptionStatus::Trialing,
        StripeSubStatus::PastDue => SubscriptionStatus::PastDue,
        StripeSubStatus::Unpaid => SubscriptionStatus::Unpaid,
        StripeSubStatus::Canceled => SubscriptionStatus::Canceled,
        StripeSubStatus::Incomplete
        | StripeSubStatus::IncompleteExpired
        | StripeSubStatus::Paused => SubscriptionStatus::Inactive,
    }
}

fn to_view(sub: &StripeSubscription) -> ProviderSubscription {
    ProviderSubscription {
        subscription_id: sub.id.to_string(),
        status: map_stripe_status(sub.status),
        current_period_end: OffsetDateTime::from_unix_timestamp(sub.current_period_end).ok(),
        price_id: sub
            .items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|p| p.id.to_string()),
    }
}

/// Mirrors billing provider state into the local `subscriptions` table
#[derive(Clone)]
pub struct BillingSyncAdapter {
    stripe: StripeClient,
    pool: PgPool,
}

impl BillingSyncAdapter {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Pull current subscription state for one user and persist the mirror.
    pub async fn sync(&self, user_id: Uuid) -> EntitlementResult<Subscription> {
        let email: Option<(String,)> = sqlx::query_as("SELECT email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some((email,)) = email else {
            return Err(EntitlementError::Validation(format!(
                "Unknown user: {}",
                user_id
            )));
        };

        let Some(customer_id) = self.find_customer_id(user_id, &email).await? else {
            // No billing customer at all: mirror the absence.
            return self.persist(user_id, None, None).await;
        };

        let stripe = self.stripe.clone();
        let cid = customer_id.clone();
        let subs = call_provider("list subscriptions", move || {
            let stripe = stripe.clone();
            let cid = cid.clone();
            async move {
                let customer = cid
                    .parse::<stripe::CustomerId>()
                    .map_err(|e| EntitlementError::Internal(format!("Invalid customer ID: {}", e)))?;
                let params = ListSubscriptions {
                    customer: Some(customer),
                    status: Some(SubscriptionStatusFilter::All),
                    ..Default::default()
                };
                StripeSubscription::list(stripe.inner(), &params)
                    .await
                    .map_err(EntitlementError::from)
            }
        })
        .await?;

        let views: Vec<ProviderSubscription> = subs.data.iter().map(to_view).collect();
        let selected = select_subscription(&views, OffsetDateTime::now_utc()).cloned();

        self.persist(user_id, Some(customer_id), selected).await
    }

    /// Stored customer id, or discovery by account email (then persisted
    /// with the mirror row).
    async fn find_customer_id(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> EntitlementResult<Option<String>> {
        let stored: Option<(Option<String>,)> =
            sqlx::query_as("SELECT stripe_customer_id FROM subscriptions WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        if let Some((Some(customer_id),)) = stored {
            return Ok(Some(customer_id));
        }

        let stripe = self.stripe.clone();
        let lookup_email = email.to_string();
        let customers = call_provider("customer lookup", move || {
            let stripe = stripe.clone();
            let email = lookup_email.clone();
            async move {
                let params = ListCustomers {
                    email: Some(&email),
                    ..Default::default()
                };
                Customer::list(stripe.inner(), &params)
                    .await
                    .map_err(EntitlementError::from)
            }
        })
        .await?;

        let found = customers.data.first().map(|c| c.id.to_string());
        if let Some(customer_id) = &found {
            tracing::info!(
                user_id = %user_id,
                customer_id = %customer_id,
                "Discovered Stripe customer by email"
            );
        }
        Ok(found)
    }

    /// Persist the mirror row and the denormalized plan/status pair for
    /// backward-compatible consumers.
    async fn persist(
        &self,
        user_id: Uuid,
        customer_id: Option<String>,
        selected: Option<ProviderSubscription>,
    ) -> EntitlementResult<Subscription> {
        let (tier, status, period_end, subscription_id) = match &selected {
            Some(sub) => {
                (
                    self.tier_for(user_id, sub),
                    sub.status,
                    sub.current_period_end,
                    Some(sub.subscription_id.clone()),
                )
            }
            None => (PlanTier::Free, SubscriptionStatus::Inactive, None, None),
        };

        // "I know what you bought, but you haven't paid": keep the plan,
        // refuse usage.
        let access_blocked = status.is_delinquent();

        let mut tx = self.pool.begin().await?;

        let row: Subscription = sqlx::query_as(
            r#"
            INSERT INTO subscriptions
                (user_id, plan_key, status, current_period_end, stripe_customer_id, stripe_subscription_id, access_blocked, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                plan_key = EXCLUDED.plan_key,
                status = EXCLUDED.status,
                current_period_end = EXCLUDED.current_period_end,
                stripe_customer_id = COALESCE(EXCLUDED.stripe_customer_id, subscriptions.stripe_customer_id),
                stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                access_blocked = EXCLUDED.access_blocked,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(tier.as_str())
        .bind(status.as_str())
        .bind(period_end)
        .bind(&customer_id)
        .bind(&subscription_id)
        .bind(access_blocked)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE users SET plan_key = $1, subscription_status = $2, updated_at = NOW() WHERE id = $3",
        )
        .bind(tier.as_str())
        .bind(status.as_str())
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            plan_key = %tier,
            status = %status,
            access_blocked = access_blocked,
            "Subscription mirror updated"
        );

        Ok(row)
    }

    /// Price → tier via the static map; unmapped prices fall back to the
    /// cheapest paid tier rather than failing, so a mapping gap never
    /// silently grants free access.
    fn tier_for(&self, user_id: Uuid, sub: &ProviderSubscription) -> PlanTier {
        match sub
            .price_id
            .as_deref()
            .and_then(|p| self.stripe.config().tier_for_price_id(p))
        {
            Some(tier) => tier,
            None => {
                tracing::warn!(
                    user_id = %user_id,
                    price_id = sub.price_id.as_deref().unwrap_or("(none)"),
                    "Unmapped Stripe price id, falling back to cheapest paid tier"
                );
                PlanTier::cheapest_paid()
            }
        }
    }
}

/// Run one provider operation under the shared timeout with bounded
/// exponential backoff.
async fn call_provider<T, F, Fut>(op: &str, action: F) -> EntitlementResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EntitlementResult<T>>,
{
    let strategy = ExponentialBackoff::from_millis(250).map(jitter).take(2);
    match tokio::time::timeout(PROVIDER_TIMEOUT, Retry::spawn(strategy, action)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::warn!(op = op, error = %e, "Billing provider call failed");
            Err(EntitlementError::UpstreamUnavailable(format!(
                "{}: {}",
                op, e
            )))
        }
        Err(_) => {
            tracing::warn!(op = op, "Billing provider call timed out");
            Err(EntitlementError::UpstreamUnavailable(format!(
                "{}: timed out after {:?}",
                op, PROVIDER_TIMEOUT
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration as TimeDuration;

    fn sub(
        status: SubscriptionStatus,
        period_end: Option<OffsetDateTime>,
    ) -> ProviderSubscription {
        ProviderSubscription {
            subscription_id: format!("sub_{}", status),
            status,
            current_period_end: period_end,
            price_id: Some("price_standard_m".to_string()),
        }
    }

    #[test]
    fn test_selects_entitling_first() {
        let now = OffsetDateTime::now_utc();
        let future = Some(now + TimeDuration::days(10));
        let subs = vec![
            sub(SubscriptionStatus::Canceled, future),
            sub(SubscriptionStatus::PastDue, future),
            sub(SubscriptionStatus::Active, future),
        ];
        let selected = select_subscription(&subs, now).unwrap();
        assert_eq!(selected.status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_selects_delinquent_over_canceled() {
        let now = OffsetDateTime::now_utc();
        let future = Some(now + TimeDuration::days(10));
        let subs = vec![
            sub(SubscriptionStatus::Canceled, future),
            sub(SubscriptionStatus::Unpaid, future),
        ];
        let selected = select_subscription(&subs, now).unwrap();
        assert_eq!(selected.status, SubscriptionStatus::Unpaid);
    }

    #[test]
    fn test_canceled_only_counts_with_open_period() {
        let now = OffsetDateTime::now_utc();
        let expired = vec![sub(
            SubscriptionStatus::Canceled,
            Some(now - TimeDuration::days(1)),
        )];
        assert!(select_subscription(&expired, now).is_none());

        let open = vec![sub(
            SubscriptionStatus::Canceled,
            Some(now + TimeDuration::days(1)),
        )];
        assert!(select_subscription(&open, now).is_some());
    }

    #[test]
    fn test_inactive_statuses_never_selected() {
        let now = OffsetDateTime::now_utc();
        let subs = vec![sub(SubscriptionStatus::Inactive, None)];
        assert!(select_subscription(&subs, now).is_none());
    }

    #[test]
    fn test_stripe_status_mapping() {
        assert_eq!(
            map_stripe_status(StripeSubStatus::Active),
            SubscriptionStatus::Active
        );
        assert_eq!(
            map_stripe_status(StripeSubStatus::PastDue),
            SubscriptionStatus::PastDue
        );
        assert_eq!(
            map_stripe_status(StripeSubStatus::IncompleteExpired),
            SubscriptionStatus::Inactive
        );
        assert_eq!(
            map_stripe_status(StripeSubStatus::Paused),
            SubscriptionStatus::Inactive
        );
    }
}
