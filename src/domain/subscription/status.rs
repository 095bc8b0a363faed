//! Subscription status state machine.
//!
//! A cancelled subscription is never resurrected: resubscribing creates
//! a new subscription row that supersedes the old one.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::ValidationError;

/// Lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Inside the plan's trial window; full access.
    Trialing,

    /// Paid and current.
    Active,

    /// A renewal payment failed; access continues during provider retry.
    PastDue,

    /// Cancelled or superseded by a newer subscription.
    Cancelled,
}

impl SubscriptionStatus {
    /// Returns true if this subscription currently backs entitlements.
    ///
    /// PastDue retains access as a grace period while the provider
    /// retries the payment.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Trialing
                | SubscriptionStatus::Active
                | SubscriptionStatus::PastDue
        )
    }

    /// Returns true if transition from self to target is valid.
    pub fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, target),
            // From TRIALING
            (Trialing, Active)
                | (Trialing, Cancelled)
            // From ACTIVE
                | (Active, Active) // Renewal
                | (Active, PastDue)
                | (Active, Cancelled)
            // From PAST_DUE
                | (PastDue, Active)
                | (PastDue, Cancelled)
        )
    }

    /// Returns all valid target states from the current state.
    pub fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            Trialing => vec![Active, Cancelled],
            Active => vec![Active, PastDue, Cancelled],
            PastDue => vec![Active, Cancelled],
            Cancelled => vec![],
        }
    }

    /// Performs a transition with validation.
    pub fn transition_to(&self, target: Self) -> Result<Self, ValidationError> {
        if self.can_transition_to(&target) {
            Ok(target)
        } else {
            Err(ValidationError::invalid_value(
                "status",
                format!("cannot transition from {:?} to {:?}", self, target),
            ))
        }
    }

    /// Returns the storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    /// Parses a storage or provider status string.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "cancelled" | "canceled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(ValidationError::invalid_value(
                "status",
                format!("unknown subscription status '{}'", other),
            )),
        }
    }
}
