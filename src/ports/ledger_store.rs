//! LedgerStore port - The transactional boundary of the ledger core.
//!
//! All mutation passes through a [`UnitOfWork`]: a multi-step
//! read-modify-write sequence that commits atomically or not at all.
//! Concurrent units of work touching the same account serialize such
//! that the final state is equivalent to some sequential ordering of
//! them; unrelated accounts never block each other.
//!
//! ## Exactly-once admission
//!
//! [`UnitOfWork::admit_event`] implements the event deduplicator: an
//! event identifier is accepted exactly once across all time, backed by
//! a uniqueness constraint in durable storage rather than an in-memory
//! set, because the process may restart and provider retries can arrive
//! hours apart. Admission and the event's economic effect are staged in
//! the same unit of work, so they commit together or not at all.
//!
//! ## Conflict handling
//!
//! A commit that loses a serialization race fails with
//! `LedgerError::StorageConflict`. Callers re-issue the whole unit of
//! work (every mutating operation is check-then-act, so a retry is
//! safe) up to [`MAX_COMMIT_ATTEMPTS`] times before surfacing the error.

use async_trait::async_trait;

use crate::domain::foundation::{
    AccountId, LedgerError, PaymentEventId, SubscriptionId, Timestamp, VideoId,
};
use crate::domain::entitlement::ResourceGrant;
use crate::domain::ledger::{Account, LedgerTransaction};
use crate::domain::subscription::{BillingPeriod, Subscription};
use crate::domain::usage::UsagePeriodCounter;

/// Upper bound on re-issuing a unit of work after a serialization
/// conflict, before `StorageConflict` surfaces to the caller.
pub const MAX_COMMIT_ATTEMPTS: u32 = 16;

/// Result of admitting an external payment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First admission of this identifier; effects may be applied.
    Accepted,
    /// The identifier was already processed; apply nothing.
    Duplicate,
}

/// Record of an admitted external payment event.
///
/// Identifiers are retained indefinitely: the event space is
/// provider-bounded and small relative to storage cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedEvent {
    /// Provider-assigned event identifier (globally unique).
    pub event_id: PaymentEventId,
    /// Provider event type string.
    pub event_type: String,
    /// Short summary of the applied effect.
    pub outcome: String,
    /// When the event was admitted.
    pub processed_at: Timestamp,
}

impl ProcessedEvent {
    /// Creates a processed-event record.
    pub fn new(
        event_id: PaymentEventId,
        event_type: impl Into<String>,
        outcome: impl Into<String>,
        processed_at: Timestamp,
    ) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            outcome: outcome.into(),
            processed_at,
        }
    }
}

/// A single atomic transaction against the ledger store.
///
/// Reads observe committed state plus this unit's own staged writes.
/// Dropping a unit of work without committing discards all staged
/// writes. Mutations become visible to other readers only on commit.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Loads an account for update.
    async fn account(&mut self, id: &AccountId) -> Result<Option<Account>, LedgerError>;

    /// Stages an account insert or update.
    async fn put_account(&mut self, account: Account) -> Result<(), LedgerError>;

    /// Stages an append to the immutable transaction ledger.
    async fn append_transaction(
        &mut self,
        transaction: LedgerTransaction,
    ) -> Result<(), LedgerError>;

    /// Claims a payment event identifier for exactly-once processing.
    ///
    /// Re-admitting an identifier already claimed by this same unit of
    /// work returns `Accepted` (the claim is idempotent within one
    /// transaction); an identifier committed by any earlier transaction
    /// returns `Duplicate`.
    async fn admit_event(
        &mut self,
        event_id: &PaymentEventId,
        now: Timestamp,
    ) -> Result<Admission, LedgerError>;

    /// Stages the descriptive record for an admitted event.
    async fn record_event(&mut self, record: ProcessedEvent) -> Result<(), LedgerError>;

    /// Loads a subscription by provider identifier.
    async fn subscription(
        &mut self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, LedgerError>;

    /// Loads the account's live subscription, if any.
    async fn current_subscription(
        &mut self,
        account_id: &AccountId,
    ) -> Result<Option<Subscription>, LedgerError>;

    /// Stages a subscription insert or update.
    ///
    /// Storage enforces at most one trialing/active subscription per
    /// account; violating commits fail.
    async fn put_subscription(&mut self, subscription: Subscription) -> Result<(), LedgerError>;

    /// Loads the usage counter for one (subscription, period) pair.
    async fn usage_counter(
        &mut self,
        subscription_id: &SubscriptionId,
        period: &BillingPeriod,
    ) -> Result<Option<UsagePeriodCounter>, LedgerError>;

    /// Loads the most recent usage counter for a subscription.
    async fn latest_usage_counter(
        &mut self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<UsagePeriodCounter>, LedgerError>;

    /// Stages a usage counter insert or update.
    async fn put_usage_counter(&mut self, counter: UsagePeriodCounter) -> Result<(), LedgerError>;

    /// Loads the one-off unlock attached to a resource, if any.
    async fn grant_for_resource(
        &mut self,
        resource_id: &VideoId,
    ) -> Result<Option<ResourceGrant>, LedgerError>;

    /// Stages a resource grant insert or update.
    async fn put_grant(&mut self, grant: ResourceGrant) -> Result<(), LedgerError>;

    /// Commits all staged writes atomically.
    ///
    /// Fails with `StorageConflict` when a concurrent transaction
    /// invalidated this unit's reads or claimed one of its event
    /// identifiers first.
    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;
}

/// Durable, transactional owner of all ledger state.
///
/// The read methods observe the latest committed state and never block
/// writers; use [`LedgerStore::begin`] for anything that mutates.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Opens a new unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, LedgerError>;

    /// Loads an account.
    async fn load_account(&self, id: &AccountId) -> Result<Option<Account>, LedgerError>;

    /// Loads the full transaction history of an account, oldest first.
    async fn account_transactions(
        &self,
        id: &AccountId,
    ) -> Result<Vec<LedgerTransaction>, LedgerError>;

    /// Loads the account's live subscription, if any.
    async fn current_subscription(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<Subscription>, LedgerError>;

    /// Loads the usage counter for one (subscription, period) pair.
    async fn usage_counter(
        &self,
        subscription_id: &SubscriptionId,
        period: &BillingPeriod,
    ) -> Result<Option<UsagePeriodCounter>, LedgerError>;

    /// Loads the one-off unlock attached to a resource, if any.
    async fn grant_for_resource(
        &self,
        resource_id: &VideoId,
    ) -> Result<Option<ResourceGrant>, LedgerError>;

    /// Looks up the processing record of a payment event.
    async fn processed_event(
        &self,
        event_id: &PaymentEventId,
    ) -> Result<Option<ProcessedEvent>, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Trait object safety tests

    #[test]
    fn ledger_store_is_object_safe() {
        fn _accepts_dyn(_store: &dyn LedgerStore) {}
    }

    #[test]
    fn unit_of_work_is_object_safe() {
        fn _accepts_dyn(_uow: &mut dyn UnitOfWork) {}
    }

    #[test]
    fn processed_event_captures_outcome() {
        let record = ProcessedEvent::new(
            PaymentEventId::new("evt_1").unwrap(),
            "purchase.succeeded",
            "credited 100 credits",
            Timestamp::now(),
        );
        assert_eq!(record.event_type, "purchase.succeeded");
        assert_eq!(record.outcome, "credited 100 credits");
    }
}
