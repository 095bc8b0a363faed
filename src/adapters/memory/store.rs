//! In-memory implementation of the LedgerStore port.
//!
//! Uses optimistic concurrency: a unit of work records the epoch of
//! every account, subscription, and grant it reads, and commit fails
//! with `StorageConflict` when any of them moved in the meantime.
//! Epochs are per-entity, so units of work on unrelated accounts never
//! conflict - matching the serialization contract of the production
//! store.
//!
//! Event admission is checked again at commit: when two units of work
//! race on the same event identifier, exactly one commits and the other
//! conflicts; its retry then observes the identifier as a duplicate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::entitlement::ResourceGrant;
use crate::domain::foundation::{
    AccountId, LedgerError, PaymentEventId, SubscriptionId, Timestamp, VideoId,
};
use crate::domain::ledger::{Account, LedgerTransaction};
use crate::domain::subscription::{BillingPeriod, Subscription, SubscriptionStatus};
use crate::domain::usage::UsagePeriodCounter;
use crate::ports::{Admission, LedgerStore, ProcessedEvent, UnitOfWork};

type CounterKey = (SubscriptionId, Timestamp);

#[derive(Default)]
struct Shared {
    account_epochs: HashMap<AccountId, u64>,
    subscription_epochs: HashMap<SubscriptionId, u64>,
    grant_epochs: HashMap<VideoId, u64>,

    accounts: HashMap<AccountId, Account>,
    transactions: Vec<LedgerTransaction>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    counters: HashMap<CounterKey, UsagePeriodCounter>,
    grants: HashMap<VideoId, ResourceGrant>,
    events: HashMap<PaymentEventId, ProcessedEvent>,
}

impl Shared {
    fn account_epoch(&self, id: &AccountId) -> u64 {
        self.account_epochs.get(id).copied().unwrap_or(0)
    }

    fn subscription_epoch(&self, id: &SubscriptionId) -> u64 {
        self.subscription_epochs.get(id).copied().unwrap_or(0)
    }

    fn grant_epoch(&self, id: &VideoId) -> u64 {
        self.grant_epochs.get(id).copied().unwrap_or(0)
    }

    fn live_subscription(&self, account_id: &AccountId) -> Option<&Subscription> {
        self.subscriptions
            .values()
            .filter(|s| &s.account_id == account_id && s.is_live())
            .max_by_key(|s| (s.created_at, s.id.as_str().to_string()))
    }
}

/// In-memory, transactional ledger store.
pub struct InMemoryLedgerStore {
    shared: Arc<Mutex<Shared>>,
}

impl InMemoryLedgerStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, LedgerError> {
        Ok(Box::new(InMemoryUnitOfWork {
            shared: Arc::clone(&self.shared),
            observed_accounts: HashMap::new(),
            observed_subscriptions: HashMap::new(),
            observed_grants: HashMap::new(),
            staged_accounts: HashMap::new(),
            staged_transactions: Vec::new(),
            staged_subscriptions: HashMap::new(),
            staged_counters: HashMap::new(),
            staged_grants: HashMap::new(),
            staged_events: HashMap::new(),
        }))
    }

    async fn load_account(&self, id: &AccountId) -> Result<Option<Account>, LedgerError> {
        let shared = self.shared.lock().await;
        Ok(shared.accounts.get(id).cloned())
    }

    async fn account_transactions(
        &self,
        id: &AccountId,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        let shared = self.shared.lock().await;
        Ok(shared
            .transactions
            .iter()
            .filter(|t| &t.account_id == id)
            .cloned()
            .collect())
    }

    async fn current_subscription(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<Subscription>, LedgerError> {
        let shared = self.shared.lock().await;
        Ok(shared.live_subscription(account_id).cloned())
    }

    async fn usage_counter(
        &self,
        subscription_id: &SubscriptionId,
        period: &BillingPeriod,
    ) -> Result<Option<UsagePeriodCounter>, LedgerError> {
        let shared = self.shared.lock().await;
        Ok(shared
            .counters
            .get(&(subscription_id.clone(), period.start()))
            .cloned())
    }

    async fn grant_for_resource(
        &self,
        resource_id: &VideoId,
    ) -> Result<Option<ResourceGrant>, LedgerError> {
        let shared = self.shared.lock().await;
        Ok(shared.grants.get(resource_id).cloned())
    }

    async fn processed_event(
        &self,
        event_id: &PaymentEventId,
    ) -> Result<Option<ProcessedEvent>, LedgerError> {
        let shared = self.shared.lock().await;
        Ok(shared.events.get(event_id).cloned())
    }
}

struct InMemoryUnitOfWork {
    shared: Arc<Mutex<Shared>>,

    // Epochs observed at first read or stage; commit validates them.
    observed_accounts: HashMap<AccountId, u64>,
    observed_subscriptions: HashMap<SubscriptionId, u64>,
    observed_grants: HashMap<VideoId, u64>,

    staged_accounts: HashMap<AccountId, Account>,
    staged_transactions: Vec<LedgerTransaction>,
    staged_subscriptions: HashMap<SubscriptionId, Subscription>,
    staged_counters: HashMap<CounterKey, UsagePeriodCounter>,
    staged_grants: HashMap<VideoId, ResourceGrant>,
    staged_events: HashMap<PaymentEventId, ProcessedEvent>,
}

impl InMemoryUnitOfWork {
    fn observe_account(&mut self, shared: &Shared, id: &AccountId) {
        let epoch = shared.account_epoch(id);
        self.observed_accounts.entry(id.clone()).or_insert(epoch);
    }

    fn observe_subscription(&mut self, shared: &Shared, id: &SubscriptionId) {
        let epoch = shared.subscription_epoch(id);
        self.observed_subscriptions.entry(id.clone()).or_insert(epoch);
    }

    fn observe_grant(&mut self, shared: &Shared, id: &VideoId) {
        let epoch = shared.grant_epoch(id);
        self.observed_grants.entry(id.clone()).or_insert(epoch);
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn account(&mut self, id: &AccountId) -> Result<Option<Account>, LedgerError> {
        let shared = Arc::clone(&self.shared);
        let shared = shared.lock().await;
        self.observe_account(&shared, id);
        if let Some(staged) = self.staged_accounts.get(id) {
            return Ok(Some(staged.clone()));
        }
        Ok(shared.accounts.get(id).cloned())
    }

    async fn put_account(&mut self, account: Account) -> Result<(), LedgerError> {
        let shared = Arc::clone(&self.shared);
        let shared = shared.lock().await;
        self.observe_account(&shared, &account.id);
        drop(shared);
        self.staged_accounts.insert(account.id.clone(), account);
        Ok(())
    }

    async fn append_transaction(
        &mut self,
        transaction: LedgerTransaction,
    ) -> Result<(), LedgerError> {
        let shared = Arc::clone(&self.shared);
        let shared = shared.lock().await;
        self.observe_account(&shared, &transaction.account_id);
        drop(shared);
        self.staged_transactions.push(transaction);
        Ok(())
    }

    async fn admit_event(
        &mut self,
        event_id: &PaymentEventId,
        now: Timestamp,
    ) -> Result<Admission, LedgerError> {
        if self.staged_events.contains_key(event_id) {
            // Already claimed by this unit of work.
            return Ok(Admission::Accepted);
        }
        let shared = self.shared.lock().await;
        if shared.events.contains_key(event_id) {
            return Ok(Admission::Duplicate);
        }
        drop(shared);
        self.staged_events.insert(
            event_id.clone(),
            ProcessedEvent::new(event_id.clone(), "", "admitted", now),
        );
        Ok(Admission::Accepted)
    }

    async fn record_event(&mut self, record: ProcessedEvent) -> Result<(), LedgerError> {
        self.staged_events.insert(record.event_id.clone(), record);
        Ok(())
    }

    async fn subscription(
        &mut self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, LedgerError> {
        let shared = Arc::clone(&self.shared);
        let shared = shared.lock().await;
        self.observe_subscription(&shared, id);
        if let Some(staged) = self.staged_subscriptions.get(id) {
            return Ok(Some(staged.clone()));
        }
        Ok(shared.subscriptions.get(id).cloned())
    }

    async fn current_subscription(
        &mut self,
        account_id: &AccountId,
    ) -> Result<Option<Subscription>, LedgerError> {
        let shared = Arc::clone(&self.shared);
        let shared = shared.lock().await;
        self.observe_account(&shared, account_id);

        // Merged view: staged rows shadow committed rows.
        let mut candidates: HashMap<&SubscriptionId, &Subscription> = shared
            .subscriptions
            .iter()
            .filter(|(_, s)| &s.account_id == account_id)
            .map(|(id, s)| (id, s))
            .collect();
        for (id, s) in &self.staged_subscriptions {
            if &s.account_id == account_id {
                candidates.insert(id, s);
            } else {
                candidates.remove(id);
            }
        }

        let found = candidates
            .values()
            .filter(|s| s.is_live())
            .max_by_key(|s| (s.created_at, s.id.as_str().to_string()))
            .map(|s| (*s).clone());
        if let Some(sub) = &found {
            self.observe_subscription(&shared, &sub.id);
        }
        Ok(found)
    }

    async fn put_subscription(&mut self, subscription: Subscription) -> Result<(), LedgerError> {
        let shared = Arc::clone(&self.shared);
        let shared = shared.lock().await;
        self.observe_subscription(&shared, &subscription.id);
        self.observe_account(&shared, &subscription.account_id);
        drop(shared);
        self.staged_subscriptions
            .insert(subscription.id.clone(), subscription);
        Ok(())
    }

    async fn usage_counter(
        &mut self,
        subscription_id: &SubscriptionId,
        period: &BillingPeriod,
    ) -> Result<Option<UsagePeriodCounter>, LedgerError> {
        let shared = Arc::clone(&self.shared);
        let shared = shared.lock().await;
        // Observed even when absent, so a racing first-use of the same
        // period conflicts instead of losing an increment.
        self.observe_subscription(&shared, subscription_id);
        let key = (subscription_id.clone(), period.start());
        if let Some(staged) = self.staged_counters.get(&key) {
            return Ok(Some(staged.clone()));
        }
        Ok(shared.counters.get(&key).cloned())
    }

    async fn latest_usage_counter(
        &mut self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<UsagePeriodCounter>, LedgerError> {
        let shared = Arc::clone(&self.shared);
        let shared = shared.lock().await;
        self.observe_subscription(&shared, subscription_id);

        let committed = shared
            .counters
            .iter()
            .filter(|((id, _), _)| id == subscription_id)
            .map(|(_, c)| c);
        let staged = self
            .staged_counters
            .iter()
            .filter(|((id, _), _)| id == subscription_id)
            .map(|(_, c)| c);

        Ok(committed
            .chain(staged)
            .max_by_key(|c| c.period.start())
            .cloned())
    }

    async fn put_usage_counter(&mut self, counter: UsagePeriodCounter) -> Result<(), LedgerError> {
        let shared = Arc::clone(&self.shared);
        let shared = shared.lock().await;
        self.observe_subscription(&shared, &counter.subscription_id);
        drop(shared);
        let key = (counter.subscription_id.clone(), counter.period.start());
        self.staged_counters.insert(key, counter);
        Ok(())
    }

    async fn grant_for_resource(
        &mut self,
        resource_id: &VideoId,
    ) -> Result<Option<ResourceGrant>, LedgerError> {
        let shared = Arc::clone(&self.shared);
        let shared = shared.lock().await;
        self.observe_grant(&shared, resource_id);
        if let Some(staged) = self.staged_grants.get(resource_id) {
            return Ok(Some(staged.clone()));
        }
        Ok(shared.grants.get(resource_id).cloned())
    }

    async fn put_grant(&mut self, grant: ResourceGrant) -> Result<(), LedgerError> {
        let shared = Arc::clone(&self.shared);
        let shared = shared.lock().await;
        self.observe_grant(&shared, &grant.resource_id);
        self.observe_account(&shared, &grant.account_id);
        drop(shared);
        self.staged_grants.insert(grant.resource_id.clone(), grant);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let this = *self;
        let mut shared = this.shared.lock().await;

        // Validate every observed epoch.
        for (id, seen) in &this.observed_accounts {
            if shared.account_epoch(id) != *seen {
                return Err(LedgerError::StorageConflict);
            }
        }
        for (id, seen) in &this.observed_subscriptions {
            if shared.subscription_epoch(id) != *seen {
                return Err(LedgerError::StorageConflict);
            }
        }
        for (id, seen) in &this.observed_grants {
            if shared.grant_epoch(id) != *seen {
                return Err(LedgerError::StorageConflict);
            }
        }

        // Event identifiers claimed by a concurrent commit first.
        for id in this.staged_events.keys() {
            if shared.events.contains_key(id) {
                return Err(LedgerError::StorageConflict);
            }
        }

        // Uniqueness: at most one trialing/active subscription per
        // account, as the production schema enforces with a partial
        // unique index. Violations surface as conflicts so the retry
        // path can supersede the row it did not see.
        for account_id in this
            .staged_subscriptions
            .values()
            .map(|s| s.account_id.clone())
            .collect::<std::collections::HashSet<_>>()
        {
            let mut merged: HashMap<&SubscriptionId, &Subscription> = shared
                .subscriptions
                .iter()
                .filter(|(_, s)| s.account_id == account_id)
                .map(|(id, s)| (id, s))
                .collect();
            for (id, s) in &this.staged_subscriptions {
                if s.account_id == account_id {
                    merged.insert(id, s);
                }
            }
            let current = merged
                .values()
                .filter(|s| {
                    matches!(
                        s.status,
                        SubscriptionStatus::Trialing | SubscriptionStatus::Active
                    )
                })
                .count();
            if current > 1 {
                return Err(LedgerError::StorageConflict);
            }
        }

        // Apply.
        for (id, account) in this.staged_accounts {
            *shared.account_epochs.entry(id.clone()).or_insert(0) += 1;
            shared.accounts.insert(id, account);
        }
        for transaction in this.staged_transactions {
            *shared
                .account_epochs
                .entry(transaction.account_id.clone())
                .or_insert(0) += 1;
            shared.transactions.push(transaction);
        }
        for (id, subscription) in this.staged_subscriptions {
            *shared.subscription_epochs.entry(id.clone()).or_insert(0) += 1;
            *shared
                .account_epochs
                .entry(subscription.account_id.clone())
                .or_insert(0) += 1;
            shared.subscriptions.insert(id, subscription);
        }
        for (key, counter) in this.staged_counters {
            *shared
                .subscription_epochs
                .entry(counter.subscription_id.clone())
                .or_insert(0) += 1;
            shared.counters.insert(key, counter);
        }
        for (id, grant) in this.staged_grants {
            *shared.grant_epochs.entry(id.clone()).or_insert(0) += 1;
            *shared
                .account_epochs
                .entry(grant.account_id.clone())
                .or_insert(0) += 1;
            shared.grants.insert(id, grant);
        }
        for (id, record) in this.staged_events {
            shared.events.insert(id, record);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_id(n: u32) -> AccountId {
        AccountId::new(format!("user-{}", n)).unwrap()
    }

    async fn seed(store: &InMemoryLedgerStore, id: &AccountId) {
        let mut uow = store.begin().await.unwrap();
        uow.put_account(Account::new(id.clone(), Timestamp::now()))
            .await
            .unwrap();
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible() {
        let store = InMemoryLedgerStore::new();
        let id = account_id(1);

        let mut uow = store.begin().await.unwrap();
        uow.put_account(Account::new(id.clone(), Timestamp::now()))
            .await
            .unwrap();

        assert!(store.load_account(&id).await.unwrap().is_none());
        uow.commit().await.unwrap();
        assert!(store.load_account(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dropped_unit_of_work_discards_writes() {
        let store = InMemoryLedgerStore::new();
        let id = account_id(1);

        let mut uow = store.begin().await.unwrap();
        uow.put_account(Account::new(id.clone(), Timestamp::now()))
            .await
            .unwrap();
        drop(uow);

        assert!(store.load_account(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conflicting_writers_on_one_account_serialize() {
        let store = InMemoryLedgerStore::new();
        let id = account_id(1);
        seed(&store, &id).await;

        // Both units read the account before either commits.
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        let mut a = first.account(&id).await.unwrap().unwrap();
        let mut b = second.account(&id).await.unwrap().unwrap();

        a.apply_credit(100);
        first.put_account(a).await.unwrap();
        first.commit().await.unwrap();

        b.apply_credit(50);
        second.put_account(b).await.unwrap();
        let err = second.commit().await.unwrap_err();

        assert_eq!(err, LedgerError::StorageConflict);
        // The first writer's update survives; no lost update.
        assert_eq!(store.load_account(&id).await.unwrap().unwrap().balance, 100);
    }

    #[tokio::test]
    async fn writers_on_unrelated_accounts_do_not_conflict() {
        let store = InMemoryLedgerStore::new();
        let one = account_id(1);
        let two = account_id(2);
        seed(&store, &one).await;
        seed(&store, &two).await;

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        let mut a = first.account(&one).await.unwrap().unwrap();
        let mut b = second.account(&two).await.unwrap().unwrap();

        a.apply_credit(100);
        first.put_account(a).await.unwrap();
        b.apply_credit(50);
        second.put_account(b).await.unwrap();

        first.commit().await.unwrap();
        second.commit().await.unwrap();

        assert_eq!(store.load_account(&one).await.unwrap().unwrap().balance, 100);
        assert_eq!(store.load_account(&two).await.unwrap().unwrap().balance, 50);
    }

    #[tokio::test]
    async fn racing_admissions_of_one_event_resolve_to_one_accept() {
        let store = InMemoryLedgerStore::new();
        let event_id = PaymentEventId::new("evt_race").unwrap();
        let now = Timestamp::now();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();

        assert_eq!(
            first.admit_event(&event_id, now).await.unwrap(),
            Admission::Accepted
        );
        assert_eq!(
            second.admit_event(&event_id, now).await.unwrap(),
            Admission::Accepted
        );

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert_eq!(err, LedgerError::StorageConflict);

        // The loser's retry observes the duplicate.
        let mut retry = store.begin().await.unwrap();
        assert_eq!(
            retry.admit_event(&event_id, now).await.unwrap(),
            Admission::Duplicate
        );
    }

    #[tokio::test]
    async fn admission_is_idempotent_within_one_unit_of_work() {
        let store = InMemoryLedgerStore::new();
        let event_id = PaymentEventId::new("evt_1").unwrap();
        let now = Timestamp::now();

        let mut uow = store.begin().await.unwrap();
        assert_eq!(
            uow.admit_event(&event_id, now).await.unwrap(),
            Admission::Accepted
        );
        assert_eq!(
            uow.admit_event(&event_id, now).await.unwrap(),
            Admission::Accepted
        );
        uow.commit().await.unwrap();

        assert!(store.processed_event(&event_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn record_event_enriches_the_admitted_row() {
        let store = InMemoryLedgerStore::new();
        let event_id = PaymentEventId::new("evt_1").unwrap();
        let now = Timestamp::now();

        let mut uow = store.begin().await.unwrap();
        uow.admit_event(&event_id, now).await.unwrap();
        uow.record_event(ProcessedEvent::new(
            event_id.clone(),
            "purchase.succeeded",
            "credited 100 credits",
            now,
        ))
        .await
        .unwrap();
        uow.commit().await.unwrap();

        let record = store.processed_event(&event_id).await.unwrap().unwrap();
        assert_eq!(record.event_type, "purchase.succeeded");
    }

    #[tokio::test]
    async fn reads_within_a_unit_of_work_see_its_own_writes() {
        let store = InMemoryLedgerStore::new();
        let id = account_id(1);

        let mut uow = store.begin().await.unwrap();
        let mut account = Account::new(id.clone(), Timestamp::now());
        account.apply_credit(10);
        uow.put_account(account).await.unwrap();

        let read_back = uow.account(&id).await.unwrap().unwrap();
        assert_eq!(read_back.balance, 10);
    }
}
