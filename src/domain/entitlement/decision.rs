//! Authorization decisions and consumption outcomes.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::VideoId;
use crate::domain::ledger::LedgerTransaction;
use crate::domain::usage::QuotaCheck;

/// Result of an authorization check.
///
/// Purely advisory: authorizing mutates nothing. Denials always carry a
/// human-readable reason; allowed credit-metered actions carry the cost
/// the consumption step will debit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<u64>,
}

impl Decision {
    /// Allows with no credit cost (unlock or quota covered).
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            cost: None,
        }
    }

    /// Allows a credit-metered action at the given cost.
    pub fn allow_with_cost(cost: u64) -> Self {
        Self {
            allowed: true,
            reason: None,
            cost: Some(cost),
        }
    }

    /// Denies with a user-facing reason.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            cost: None,
        }
    }
}

/// The durable economic effect recorded for an allowed action.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumptionOutcome {
    /// Credits were debited; the appended ledger entry.
    Debited(LedgerTransaction),

    /// A quota counter was checked and, when allowed, incremented.
    Counted(QuotaCheck),

    /// A one-off unlock covers the resource; nothing was charged.
    CoveredByUnlock { resource_id: VideoId },
}

impl ConsumptionOutcome {
    /// Returns true if the action may proceed.
    pub fn permitted(&self) -> bool {
        match self {
            ConsumptionOutcome::Debited(_) => true,
            ConsumptionOutcome::Counted(check) => check.allowed,
            ConsumptionOutcome::CoveredByUnlock { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::Quota;

    #[test]
    fn allow_carries_no_reason() {
        let d = Decision::allow();
        assert!(d.allowed);
        assert!(d.reason.is_none());
        assert!(d.cost.is_none());
    }

    #[test]
    fn allow_with_cost_carries_the_cost() {
        let d = Decision::allow_with_cost(30);
        assert!(d.allowed);
        assert_eq!(d.cost, Some(30));
    }

    #[test]
    fn deny_always_carries_a_reason() {
        let d = Decision::deny("Monthly export limit reached (10/10)");
        assert!(!d.allowed);
        assert_eq!(d.reason.as_deref(), Some("Monthly export limit reached (10/10)"));
    }

    #[test]
    fn denied_quota_outcome_is_not_permitted() {
        let outcome = ConsumptionOutcome::Counted(QuotaCheck {
            allowed: false,
            used: 10,
            limit: Quota::Limited(10),
        });
        assert!(!outcome.permitted());
    }

    #[test]
    fn unlock_outcome_is_permitted() {
        let outcome = ConsumptionOutcome::CoveredByUnlock {
            resource_id: VideoId::new("vid_9").unwrap(),
        };
        assert!(outcome.permitted());
    }
}
