//! EntitlementResolver - the synchronous decision point.
//!
//! Resolution order is a fixed global policy: a one-off unlock covering
//! the specific resource wins, then the live subscription's quota, then
//! credit-based metering. Unlocks and quotas both represent
//! already-paid-for capacity and are preferred over consuming metered
//! credits.
//!
//! `authorize` is a pure decision and mutates nothing. The consuming
//! operations (`debit`, `check_and_increment`) re-check inside their
//! own unit of work, so they are the authoritative step; an advisory
//! authorize result can be stale by the time consumption runs.

use std::sync::Arc;

use crate::domain::entitlement::{ActionRequest, Decision, ResourceGrant};
use crate::domain::foundation::{AccountId, LedgerError, SubscriptionId, Timestamp, VideoId};
use crate::domain::ledger::cost;
use crate::domain::subscription::{counters, CounterKind, Quota, Subscription};
use crate::domain::usage::quota_tracker;
use crate::ports::LedgerStore;

/// How an action will be paid for, given the account's current state.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Route {
    /// A one-off unlock covers the resource; nothing to charge.
    Unlocked { resource_id: VideoId },

    /// Gated by the live subscription's named counter.
    Quota {
        subscription_id: SubscriptionId,
        counter: &'static str,
        quota: Quota,
        kind: CounterKind,
    },

    /// Credit-metered at the given cost.
    Credits { cost: u64 },

    /// Refused outright by the plan's caps.
    Refused { reason: String },
}

/// Decides how an action is paid for.
///
/// Pure function over pre-read state, shared by the advisory authorize
/// path and the transactional consumption path.
pub(crate) fn route(
    action: &ActionRequest,
    grant: Option<&ResourceGrant>,
    subscription: Option<&Subscription>,
) -> Route {
    if let (Some(resource), Some(grant)) = (action.resource(), grant) {
        if grant.covers(resource) {
            return Route::Unlocked {
                resource_id: resource.clone(),
            };
        }
    }

    let live = subscription.filter(|s| s.is_live());

    match action {
        ActionRequest::ExportVideo {
            quality,
            duration_seconds,
            ..
        } => match live {
            Some(sub) => {
                let plan = &sub.entitlements;
                if *duration_seconds > plan.max_duration_seconds {
                    return Route::Refused {
                        reason: format!(
                            "Clip length {}s exceeds the plan limit of {}s",
                            duration_seconds, plan.max_duration_seconds
                        ),
                    };
                }
                if *quality > plan.quality {
                    return Route::Refused {
                        reason: format!(
                            "{} exports exceed the plan's maximum quality of {}",
                            quality, plan.quality
                        ),
                    };
                }
                Route::Quota {
                    subscription_id: sub.id.clone(),
                    counter: counters::EXPORTS,
                    quota: plan.exports_per_month,
                    kind: CounterKind::Resettable,
                }
            }
            None => Route::Credits {
                cost: cost::export_cost(*quality),
            },
        },
        ActionRequest::GenerateVideo(params) => Route::Credits {
            cost: cost::generation_cost(params),
        },
    }
}

/// Combines balance, quota state, and unlocks into an allow/deny
/// decision with a human-readable reason on denial.
pub struct EntitlementResolver {
    store: Arc<dyn LedgerStore>,
}

impl EntitlementResolver {
    /// Creates a resolver over the given store.
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Decides whether the account may perform the action right now.
    ///
    /// # Errors
    ///
    /// - `UnknownAccount` if the account does not exist
    pub async fn authorize(
        &self,
        account_id: &AccountId,
        action: &ActionRequest,
        now: Timestamp,
    ) -> Result<Decision, LedgerError> {
        let account = self
            .store
            .load_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::UnknownAccount(account_id.to_string()))?;

        let grant = match action.resource() {
            Some(resource) => self.store.grant_for_resource(resource).await?,
            None => None,
        };
        let subscription = self.store.current_subscription(account_id).await?;

        let decision = match route(action, grant.as_ref(), subscription.as_ref()) {
            Route::Unlocked { .. } => Decision::allow(),
            Route::Refused { reason } => Decision::deny(reason),
            Route::Quota {
                subscription_id,
                counter,
                quota,
                kind,
            } => {
                let used = self
                    .store
                    .usage_counter(&subscription_id, &quota_tracker::current_period(now))
                    .await?
                    .map(|row| row.value(kind, counter))
                    .unwrap_or(0);
                if quota.allows(used, 1) {
                    Decision::allow()
                } else {
                    Decision::deny(format!(
                        "Monthly export limit reached ({}/{})",
                        used, quota
                    ))
                }
            }
            Route::Credits { cost } => {
                if account.balance >= cost {
                    Decision::allow_with_cost(cost)
                } else {
                    Decision::deny(format!(
                        "Insufficient credits: need {}, have {}",
                        cost, account.balance
                    ))
                }
            }
        };

        Ok(decision)
    }
}
