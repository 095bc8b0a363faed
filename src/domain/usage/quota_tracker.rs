//! Quota tracker operations.
//!
//! Check-and-increment is the authorizing step for quota-gated actions:
//! the limit check and the increment happen in the caller's unit of
//! work, so concurrent consumers racing on the same counter serialize
//! and the limit is never exceeded.

use crate::domain::foundation::{LedgerError, Timestamp};
use crate::domain::subscription::{BillingPeriod, Quota, Subscription};
use crate::domain::usage::UsagePeriodCounter;
use crate::ports::UnitOfWork;

/// Outcome of a quota check.
///
/// On denial the counter is untouched and `used` reports the current
/// value for a user-facing message; on success `used` reports the
/// post-increment value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub used: u64,
    pub limit: Quota,
}

/// Returns the billing period containing the given instant.
///
/// Month-based: the 1st through the last calendar day of the month, not
/// a rolling 30-day window. Read and write paths both derive the period
/// here, which pins the reset cadence.
pub fn current_period(now: Timestamp) -> BillingPeriod {
    BillingPeriod::month_containing(now)
}

/// Checks a named counter against the tier limit and increments on
/// success.
///
/// An unlimited tier limit always allows, and the counter still
/// increments for audit. The counter row is created lazily on first use
/// within a period, carrying cumulative values forward from the latest
/// prior period.
///
/// # Errors
///
/// - `UnknownCounter` if the tier does not declare `counter`
pub async fn check_and_increment(
    uow: &mut dyn UnitOfWork,
    subscription: &Subscription,
    counter: &str,
    delta: u64,
    now: Timestamp,
) -> Result<QuotaCheck, LedgerError> {
    let limit = subscription
        .entitlements
        .counter_limit(counter)
        .ok_or_else(|| LedgerError::UnknownCounter(counter.to_string()))?;

    let period = current_period(now);
    let mut row = match uow.usage_counter(&subscription.id, &period).await? {
        Some(row) => row,
        None => open_period(uow, subscription, period, now).await?,
    };

    let used = row.value(limit.kind, counter);
    if !limit.quota.allows(used, delta) {
        return Ok(QuotaCheck {
            allowed: false,
            used,
            limit: limit.quota,
        });
    }

    row.add(limit.kind, counter, delta);
    uow.put_usage_counter(row).await?;

    Ok(QuotaCheck {
        allowed: true,
        used: used + delta,
        limit: limit.quota,
    })
}

/// Opens the counter for a new billing period on renewal.
///
/// Resettable counters start at zero; cumulative counters carry forward
/// unchanged. If the period's counter already exists (created lazily by
/// consumption earlier in the month) its resettable values are zeroed.
/// Re-delivery of the same renewal event is guarded by event admission
/// at the reconciler layer, not here.
pub async fn renew(
    uow: &mut dyn UnitOfWork,
    subscription: &Subscription,
    new_period: BillingPeriod,
    now: Timestamp,
) -> Result<UsagePeriodCounter, LedgerError> {
    let counter = match uow.usage_counter(&subscription.id, &new_period).await? {
        Some(mut existing) => {
            existing.reset_resettable();
            existing
        }
        None => open_period(uow, subscription, new_period, now).await?,
    };

    uow.put_usage_counter(counter.clone()).await?;
    Ok(counter)
}

async fn open_period(
    uow: &mut dyn UnitOfWork,
    subscription: &Subscription,
    period: BillingPeriod,
    now: Timestamp,
) -> Result<UsagePeriodCounter, LedgerError> {
    Ok(match uow.latest_usage_counter(&subscription.id).await? {
        Some(prior) => prior.opening_next(period, now),
        None => UsagePeriodCounter::open(
            subscription.account_id.clone(),
            subscription.id.clone(),
            period,
            now,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryLedgerStore;
    use crate::domain::foundation::{AccountId, PlanId, Quality, SubscriptionId};
    use crate::domain::subscription::{
        counters, CounterKind, PlanEntitlements, SubscriptionStatus,
    };
    use crate::ports::LedgerStore;
    use chrono::{TimeZone, Utc};

    fn ts(y: i32, m: u32, d: u32) -> Timestamp {
        Timestamp::from_datetime(Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap())
    }

    fn subscription(exports: Quota, at: Timestamp) -> Subscription {
        Subscription::activate(
            SubscriptionId::new("sub_1").unwrap(),
            AccountId::new("user-1").unwrap(),
            PlanId::new("plan_starter").unwrap(),
            PlanEntitlements {
                schema_version: 1,
                exports_per_month: exports,
                max_duration_seconds: 60,
                quality: Quality::Q1080p,
                storage_gb: Quota::Limited(5),
                features: vec![],
                watermark_free: true,
            },
            SubscriptionStatus::Active,
            at,
        )
    }

    async fn increment_n(
        store: &InMemoryLedgerStore,
        sub: &Subscription,
        n: u64,
        now: Timestamp,
    ) -> QuotaCheck {
        let mut uow = store.begin().await.unwrap();
        let mut last = None;
        for _ in 0..n {
            last = Some(
                check_and_increment(uow.as_mut(), sub, counters::EXPORTS, 1, now)
                    .await
                    .unwrap(),
            );
        }
        uow.commit().await.unwrap();
        last.unwrap()
    }

    #[tokio::test]
    async fn increments_under_the_limit_are_allowed() {
        let store = InMemoryLedgerStore::new();
        let now = ts(2026, 8, 10);
        let sub = subscription(Quota::Limited(10), now);

        let check = increment_n(&store, &sub, 3, now).await;

        assert!(check.allowed);
        assert_eq!(check.used, 3);
        assert_eq!(check.limit, Quota::Limited(10));
    }

    #[tokio::test]
    async fn increment_at_the_limit_is_denied_and_counter_untouched() {
        let store = InMemoryLedgerStore::new();
        let now = ts(2026, 8, 10);
        let sub = subscription(Quota::Limited(10), now);
        increment_n(&store, &sub, 10, now).await;

        let mut uow = store.begin().await.unwrap();
        let check = check_and_increment(uow.as_mut(), &sub, counters::EXPORTS, 1, now)
            .await
            .unwrap();
        drop(uow);

        assert!(!check.allowed);
        assert_eq!(check.used, 10);
        assert_eq!(check.limit, Quota::Limited(10));

        let row = store
            .usage_counter(&sub.id, &current_period(now))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.value(CounterKind::Resettable, counters::EXPORTS), 10);
    }

    #[tokio::test]
    async fn unlimited_tier_always_allows_and_still_counts() {
        let store = InMemoryLedgerStore::new();
        let now = ts(2026, 8, 10);
        let sub = subscription(Quota::Unlimited, now);

        let check = increment_n(&store, &sub, 75, now).await;

        assert!(check.allowed);
        assert_eq!(check.used, 75);
        assert!(check.limit.is_unlimited());
    }

    #[tokio::test]
    async fn undeclared_counter_is_an_error() {
        let store = InMemoryLedgerStore::new();
        let now = ts(2026, 8, 10);
        let sub = subscription(Quota::Limited(10), now);

        let mut uow = store.begin().await.unwrap();
        let err = check_and_increment(uow.as_mut(), &sub, "api_calls", 1, now)
            .await
            .unwrap_err();

        assert_eq!(err, LedgerError::UnknownCounter("api_calls".to_string()));
    }

    #[tokio::test]
    async fn renew_opens_next_period_zeroed_and_carries_cumulative() {
        let store = InMemoryLedgerStore::new();
        let august = ts(2026, 8, 10);
        let sub = subscription(Quota::Limited(10), august);

        let mut uow = store.begin().await.unwrap();
        check_and_increment(uow.as_mut(), &sub, counters::EXPORTS, 4, august)
            .await
            .unwrap();
        check_and_increment(uow.as_mut(), &sub, counters::STORAGE_GB, 3, august)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let september = current_period(august).next();
        let mut uow = store.begin().await.unwrap();
        let next = renew(uow.as_mut(), &sub, september, ts(2026, 9, 1)).await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(next.value(CounterKind::Resettable, counters::EXPORTS), 0);
        assert_eq!(next.value(CounterKind::Cumulative, counters::STORAGE_GB), 3);
    }

    #[tokio::test]
    async fn renew_resets_a_period_counter_created_by_early_consumption() {
        let store = InMemoryLedgerStore::new();
        let now = ts(2026, 9, 2);
        let sub = subscription(Quota::Limited(10), now);
        increment_n(&store, &sub, 2, now).await;

        let mut uow = store.begin().await.unwrap();
        let renewed = renew(uow.as_mut(), &sub, current_period(now), now).await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(renewed.value(CounterKind::Resettable, counters::EXPORTS), 0);
    }

    #[tokio::test]
    async fn lazy_creation_in_a_new_month_carries_cumulative_forward() {
        let store = InMemoryLedgerStore::new();
        let august = ts(2026, 8, 10);
        let sub = subscription(Quota::Limited(10), august);

        let mut uow = store.begin().await.unwrap();
        check_and_increment(uow.as_mut(), &sub, counters::STORAGE_GB, 4, august)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        // No renewal event arrived; consumption in September creates the
        // new period's row lazily.
        let september = ts(2026, 9, 5);
        let mut uow = store.begin().await.unwrap();
        let check = check_and_increment(uow.as_mut(), &sub, counters::EXPORTS, 1, september)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert!(check.allowed);
        assert_eq!(check.used, 1);

        let row = store
            .usage_counter(&sub.id, &current_period(september))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.value(CounterKind::Cumulative, counters::STORAGE_GB), 4);
    }
}
