//! Subscription aggregate entity.
//!
//! At most one live subscription exists per account; activation
//! supersedes any previous one rather than mutating it. Period bounds
//! only ever advance.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{AccountId, PlanId, SubscriptionId, Timestamp, ValidationError};
use crate::domain::subscription::{BillingPeriod, PlanEntitlements, SubscriptionStatus};

/// A subscription binding an account to a plan's entitlement set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Provider-assigned subscription identifier.
    pub id: SubscriptionId,

    /// Owning account.
    pub account_id: AccountId,

    /// Plan the entitlements were taken from.
    pub plan_id: PlanId,

    /// Lifecycle status.
    pub status: SubscriptionStatus,

    /// Structured limits granted by the plan.
    pub entitlements: PlanEntitlements,

    /// First instant of the current billing period (inclusive).
    pub period_start: Timestamp,

    /// First instant of the next billing period (exclusive).
    pub period_end: Timestamp,

    /// When this subscription row was created.
    pub created_at: Timestamp,

    /// When this subscription row was last modified.
    pub updated_at: Timestamp,
}

impl Subscription {
    /// Creates a subscription anchored to the activation instant.
    ///
    /// The billing period is the calendar month containing `now`.
    pub fn activate(
        id: SubscriptionId,
        account_id: AccountId,
        plan_id: PlanId,
        entitlements: PlanEntitlements,
        status: SubscriptionStatus,
        now: Timestamp,
    ) -> Self {
        let period = BillingPeriod::month_containing(now);
        Self {
            id,
            account_id,
            plan_id,
            status,
            entitlements,
            period_start: period.start(),
            period_end: period.end(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The billing period this subscription currently tracks.
    pub fn current_period(&self) -> BillingPeriod {
        BillingPeriod::from_bounds(self.period_start, self.period_end)
    }

    /// Returns true if this subscription currently backs entitlements.
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// Advances the subscription into a new billing period.
    ///
    /// Recovers a past-due subscription to active. Period bounds must
    /// advance monotonically; a renewal into an earlier period is
    /// rejected.
    pub fn renew(&mut self, new_period: BillingPeriod, now: Timestamp) -> Result<(), ValidationError> {
        if new_period.start().is_before(&self.period_start) {
            return Err(ValidationError::invalid_value(
                "period",
                "renewal period precedes the current period",
            ));
        }
        self.status = self.status.transition_to(SubscriptionStatus::Active)?;
        self.period_start = new_period.start();
        self.period_end = new_period.end();
        self.updated_at = now;
        Ok(())
    }

    /// Swaps the plan and entitlement set in place.
    ///
    /// The current period and its counters are left untouched; the new
    /// limits apply to usage already accumulated this period.
    pub fn change_plan(&mut self, plan_id: PlanId, entitlements: PlanEntitlements, now: Timestamp) {
        self.plan_id = plan_id;
        self.entitlements = entitlements;
        self.updated_at = now;
    }

    /// Marks a failed renewal payment. Idempotent.
    pub fn mark_past_due(&mut self, now: Timestamp) -> Result<(), ValidationError> {
        if self.status == SubscriptionStatus::PastDue {
            return Ok(());
        }
        self.status = self.status.transition_to(SubscriptionStatus::PastDue)?;
        self.updated_at = now;
        Ok(())
    }

    /// Cancels the subscription. Idempotent.
    pub fn cancel(&mut self, now: Timestamp) -> Result<(), ValidationError> {
        if self.status == SubscriptionStatus::Cancelled {
            return Ok(());
        }
        self.status = self.status.transition_to(SubscriptionStatus::Cancelled)?;
        self.updated_at = now;
        Ok(())
    }
}
