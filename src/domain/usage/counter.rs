//! Usage counters for one (subscription, billing period) pair.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::foundation::{AccountId, SubscriptionId, Timestamp};
use crate::domain::subscription::{BillingPeriod, CounterKind};

/// Usage accumulated within one billing period.
///
/// Counters live in two families that are never conflated: resettable
/// counters are zeroed when a renewal opens the next period, cumulative
/// counters are carried forward unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsagePeriodCounter {
    /// Owning account.
    pub account_id: AccountId,

    /// Subscription the limits come from.
    pub subscription_id: SubscriptionId,

    /// The billing period this counter covers.
    pub period: BillingPeriod,

    /// Counters zeroed on renewal (e.g. exports).
    resettable: BTreeMap<String, u64>,

    /// Counters carried across renewals (e.g. storage used).
    cumulative: BTreeMap<String, u64>,

    /// When the counter row was created.
    pub created_at: Timestamp,
}

impl UsagePeriodCounter {
    /// Opens a zeroed counter for a period.
    ///
    /// Used on first-ever use of a subscription, when there is no prior
    /// period to carry cumulative values from.
    pub fn open(
        account_id: AccountId,
        subscription_id: SubscriptionId,
        period: BillingPeriod,
        now: Timestamp,
    ) -> Self {
        Self {
            account_id,
            subscription_id,
            period,
            resettable: BTreeMap::new(),
            cumulative: BTreeMap::new(),
            created_at: now,
        }
    }

    /// Opens the counter for a following period.
    ///
    /// Resettable values start at zero; cumulative values are carried
    /// forward unchanged.
    pub fn opening_next(&self, period: BillingPeriod, now: Timestamp) -> Self {
        Self {
            account_id: self.account_id.clone(),
            subscription_id: self.subscription_id.clone(),
            period,
            resettable: BTreeMap::new(),
            cumulative: self.cumulative.clone(),
            created_at: now,
        }
    }

    /// Rebuilds a counter from stored parts.
    pub fn from_parts(
        account_id: AccountId,
        subscription_id: SubscriptionId,
        period: BillingPeriod,
        resettable: BTreeMap<String, u64>,
        cumulative: BTreeMap<String, u64>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            account_id,
            subscription_id,
            period,
            resettable,
            cumulative,
            created_at,
        }
    }

    /// Current value of a named counter; absent counters read as zero.
    pub fn value(&self, kind: CounterKind, name: &str) -> u64 {
        let map = match kind {
            CounterKind::Resettable => &self.resettable,
            CounterKind::Cumulative => &self.cumulative,
        };
        map.get(name).copied().unwrap_or(0)
    }

    /// Adds to a named counter.
    pub fn add(&mut self, kind: CounterKind, name: &str, delta: u64) {
        let map = match kind {
            CounterKind::Resettable => &mut self.resettable,
            CounterKind::Cumulative => &mut self.cumulative,
        };
        *map.entry(name.to_string()).or_insert(0) += delta;
    }

    /// Zeroes every resettable counter. Cumulative counters are untouched.
    pub fn reset_resettable(&mut self) {
        self.resettable.clear();
    }

    /// Read access to the resettable family, for persistence.
    pub fn resettable(&self) -> &BTreeMap<String, u64> {
        &self.resettable
    }

    /// Read access to the cumulative family, for persistence.
    pub fn cumulative(&self) -> &BTreeMap<String, u64> {
        &self.cumulative
    }
}
