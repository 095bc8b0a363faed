//! EntitlementEngine - the outbound synchronous API.
//!
//! `authorize` is advisory and read-only; `record_consumption` is the
//! authoritative check-and-act step, running the balance or quota check
//! and the matching mutation in one unit of work. Callers queue the
//! gated work (export job, generation job) only after a successful
//! consumption: the guarantee is "if this returned success, the
//! economic effect is durably recorded", not that the gated action will
//! succeed.

use std::sync::Arc;

use crate::domain::entitlement::{
    route, ActionRequest, ConsumptionOutcome, Decision, EntitlementResolver, Route,
};
use crate::domain::foundation::{AccountId, LedgerError, Timestamp};
use crate::domain::ledger::{credit_ledger, Account, TransactionKind};
use crate::domain::usage::quota_tracker;
use crate::ports::{LedgerStore, MAX_COMMIT_ATTEMPTS};

/// Facade wiring the resolver and the consuming operations over one
/// ledger store.
pub struct EntitlementEngine {
    store: Arc<dyn LedgerStore>,
    resolver: EntitlementResolver,
}

impl EntitlementEngine {
    /// Creates an engine over the given store.
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            resolver: EntitlementResolver::new(Arc::clone(&store)),
            store,
        }
    }

    /// Opens the billing account for a user. Idempotent: an existing
    /// account is returned unchanged.
    pub async fn register_account(&self, account_id: &AccountId) -> Result<Account, LedgerError> {
        let now = Timestamp::now();
        let mut attempts: u32 = 0;
        loop {
            let mut uow = self.store.begin().await?;
            if let Some(existing) = uow.account(account_id).await? {
                return Ok(existing);
            }
            let account = Account::new(account_id.clone(), now);
            uow.put_account(account.clone()).await?;
            match uow.commit().await {
                Ok(()) => return Ok(account),
                Err(LedgerError::StorageConflict) if attempts + 1 < MAX_COMMIT_ATTEMPTS => {
                    attempts += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Advisory check: may this account perform the action right now?
    ///
    /// Mutates nothing. The consumption step re-checks inside its own
    /// transaction, so a stale allow here can still be denied there.
    pub async fn authorize(
        &self,
        account_id: &AccountId,
        action: &ActionRequest,
    ) -> Result<Decision, LedgerError> {
        self.resolver
            .authorize(account_id, action, Timestamp::now())
            .await
    }

    /// Current credit balance, read-consistent with the latest commit.
    pub async fn balance(&self, account_id: &AccountId) -> Result<u64, LedgerError> {
        self.store
            .load_account(account_id)
            .await?
            .map(|account| account.balance)
            .ok_or_else(|| LedgerError::UnknownAccount(account_id.to_string()))
    }

    /// Records the economic effect of performing an action.
    ///
    /// Routes to the unlock, quota, or credit path with the same policy
    /// as `authorize`, then performs the authorizing mutation in one
    /// unit of work. Serialization conflicts are retried internally.
    ///
    /// # Errors
    ///
    /// - `UnknownAccount` if the account does not exist
    /// - `InsufficientBalance` on the credit path when the balance is short
    /// - `NotPermitted` when the plan's caps refuse the action outright
    pub async fn record_consumption(
        &self,
        account_id: &AccountId,
        action: &ActionRequest,
    ) -> Result<ConsumptionOutcome, LedgerError> {
        let now = Timestamp::now();
        let mut attempts: u32 = 0;
        loop {
            let mut uow = self.store.begin().await?;

            if uow.account(account_id).await?.is_none() {
                return Err(LedgerError::UnknownAccount(account_id.to_string()));
            }
            let grant = match action.resource() {
                Some(resource) => uow.grant_for_resource(resource).await?,
                None => None,
            };
            let subscription = uow.current_subscription(account_id).await?;

            let outcome = match route(action, grant.as_ref(), subscription.as_ref()) {
                Route::Unlocked { resource_id } => {
                    // Already paid for; nothing to record.
                    return Ok(ConsumptionOutcome::CoveredByUnlock { resource_id });
                }
                Route::Refused { reason } => {
                    return Err(LedgerError::NotPermitted(reason));
                }
                Route::Quota {
                    subscription_id,
                    counter,
                    ..
                } => {
                    let subscription =
                        uow.subscription(&subscription_id).await?.ok_or_else(|| {
                            LedgerError::UnknownSubscription(subscription_id.to_string())
                        })?;
                    let check = quota_tracker::check_and_increment(
                        uow.as_mut(),
                        &subscription,
                        counter,
                        1,
                        now,
                    )
                    .await?;
                    if !check.allowed {
                        // Denied: the counter is untouched, nothing to commit.
                        return Ok(ConsumptionOutcome::Counted(check));
                    }
                    ConsumptionOutcome::Counted(check)
                }
                Route::Credits { cost } => {
                    let transaction = credit_ledger::debit(
                        uow.as_mut(),
                        account_id,
                        cost,
                        TransactionKind::Consumption,
                        action.metadata(),
                        now,
                    )
                    .await?;
                    ConsumptionOutcome::Debited(transaction)
                }
            };

            match uow.commit().await {
                Ok(()) => return Ok(outcome),
                Err(LedgerError::StorageConflict) if attempts + 1 < MAX_COMMIT_ATTEMPTS => {
                    attempts += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryLedgerStore;
    use crate::domain::entitlement::{GrantKind, ResourceGrant};
    use crate::domain::foundation::{
        PlanId, Quality, SubscriptionId, TransactionId, VideoId,
    };
    use crate::domain::ledger::{ClipDuration, GenerationModel, VideoGenerationParams};
    use crate::domain::subscription::{
        counters, PlanEntitlements, Quota, Subscription, SubscriptionStatus,
    };
    use crate::domain::usage::quota_tracker::current_period;
    use crate::domain::subscription::CounterKind;

    fn account_id() -> AccountId {
        AccountId::new("user-1").unwrap()
    }

    fn generation_action() -> ActionRequest {
        ActionRequest::GenerateVideo(VideoGenerationParams {
            duration: ClipDuration::FiveSeconds,
            quality: Quality::Q480p,
            model: GenerationModel::Standard,
        })
    }

    fn export_action(video: &str) -> ActionRequest {
        ActionRequest::ExportVideo {
            video_id: VideoId::new(video).unwrap(),
            quality: Quality::Q1080p,
            duration_seconds: 45,
        }
    }

    fn starter_subscription(exports: Quota) -> Subscription {
        Subscription::activate(
            SubscriptionId::new("sub_1").unwrap(),
            account_id(),
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
            Timestamp::now(),
        )
    }

    async fn engine_with_account() -> (EntitlementEngine, Arc<InMemoryLedgerStore>) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let engine = EntitlementEngine::new(store.clone());
        engine.register_account(&account_id()).await.unwrap();
        (engine, store)
    }

    async fn seed_credits(store: &Arc<InMemoryLedgerStore>, amount: u64) {
        let mut uow = store.begin().await.unwrap();
        credit_ledger::credit(
            uow.as_mut(),
            &account_id(),
            amount,
            TransactionKind::Grant,
            None,
            serde_json::json!({}),
            Timestamp::now(),
        )
        .await
        .unwrap();
        uow.commit().await.unwrap();
    }

    async fn seed_subscription(store: &Arc<InMemoryLedgerStore>, sub: &Subscription) {
        let mut uow = store.begin().await.unwrap();
        uow.put_subscription(sub.clone()).await.unwrap();
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn register_account_is_idempotent() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let engine = EntitlementEngine::new(store.clone());

        let first = engine.register_account(&account_id()).await.unwrap();
        seed_credits(&store, 40).await;
        let second = engine.register_account(&account_id()).await.unwrap();

        assert_eq!(first.id, second.id);
        // The existing account is returned, not replaced.
        assert_eq!(second.balance, 40);
    }

    #[tokio::test]
    async fn balance_reflects_the_latest_commit() {
        let (engine, store) = engine_with_account().await;
        assert_eq!(engine.balance(&account_id()).await.unwrap(), 0);

        seed_credits(&store, 100).await;
        assert_eq!(engine.balance(&account_id()).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn balance_of_unknown_account_is_an_error() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let engine = EntitlementEngine::new(store);

        let err = engine.balance(&account_id()).await.unwrap_err();
        assert!(matches!(err, LedgerError::UnknownAccount(_)));
    }

    #[tokio::test]
    async fn credit_metered_consumption_debits_the_balance() {
        let (engine, store) = engine_with_account().await;
        seed_credits(&store, 100).await;

        let outcome = engine
            .record_consumption(&account_id(), &generation_action())
            .await
            .unwrap();

        match outcome {
            ConsumptionOutcome::Debited(tx) => assert_eq!(tx.amount, -10),
            other => panic!("expected a debit, got {:?}", other),
        }
        assert_eq!(engine.balance(&account_id()).await.unwrap(), 90);
    }

    #[tokio::test]
    async fn short_balance_fails_the_consumption() {
        let (engine, store) = engine_with_account().await;
        seed_credits(&store, 5).await;

        let err = engine
            .record_consumption(&account_id(), &generation_action())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                balance: 5,
                required: 10
            }
        );
        assert_eq!(engine.balance(&account_id()).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn quota_consumption_increments_the_counter() {
        let (engine, store) = engine_with_account().await;
        let sub = starter_subscription(Quota::Limited(10));
        seed_subscription(&store, &sub).await;

        let outcome = engine
            .record_consumption(&account_id(), &export_action("vid_9"))
            .await
            .unwrap();

        match outcome {
            ConsumptionOutcome::Counted(check) => {
                assert!(check.allowed);
                assert_eq!(check.used, 1);
            }
            other => panic!("expected a quota count, got {:?}", other),
        }

        let row = store
            .usage_counter(&sub.id, &current_period(Timestamp::now()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.value(CounterKind::Resettable, counters::EXPORTS), 1);
    }

    #[tokio::test]
    async fn exhausted_quota_reports_denial_without_mutating() {
        let (engine, store) = engine_with_account().await;
        let sub = starter_subscription(Quota::Limited(1));
        seed_subscription(&store, &sub).await;

        engine
            .record_consumption(&account_id(), &export_action("vid_9"))
            .await
            .unwrap();
        let outcome = engine
            .record_consumption(&account_id(), &export_action("vid_9"))
            .await
            .unwrap();

        match outcome {
            ConsumptionOutcome::Counted(check) => {
                assert!(!check.allowed);
                assert_eq!(check.used, 1);
                assert_eq!(check.limit, Quota::Limited(1));
            }
            other => panic!("expected a quota denial, got {:?}", other),
        }
        assert!(!outcome.permitted());
    }

    #[tokio::test]
    async fn unlock_covers_consumption_without_charging() {
        let (engine, store) = engine_with_account().await;

        let mut uow = store.begin().await.unwrap();
        uow.put_grant(ResourceGrant::new(
            VideoId::new("vid_9").unwrap(),
            account_id(),
            GrantKind::WatermarkRemoval,
            TransactionId::new(),
            Timestamp::now(),
        ))
        .await
        .unwrap();
        uow.commit().await.unwrap();

        let outcome = engine
            .record_consumption(&account_id(), &export_action("vid_9"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ConsumptionOutcome::CoveredByUnlock {
                resource_id: VideoId::new("vid_9").unwrap()
            }
        );
        assert_eq!(engine.balance(&account_id()).await.unwrap(), 0);
        assert!(store.account_transactions(&account_id()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn plan_caps_refuse_oversized_exports() {
        let (engine, store) = engine_with_account().await;
        seed_subscription(&store, &starter_subscription(Quota::Limited(10))).await;

        let action = ActionRequest::ExportVideo {
            video_id: VideoId::new("vid_9").unwrap(),
            quality: Quality::Q4k,
            duration_seconds: 45,
        };

        let err = engine
            .record_consumption(&account_id(), &action)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotPermitted(_)));
    }

    #[tokio::test]
    async fn consumption_for_unknown_account_fails() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let engine = EntitlementEngine::new(store);

        let err = engine
            .record_consumption(&account_id(), &generation_action())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownAccount(_)));
    }

    #[tokio::test]
    async fn authorize_and_consume_agree_on_the_credit_path() {
        let (engine, store) = engine_with_account().await;
        seed_credits(&store, 10).await;

        let decision = engine
            .authorize(&account_id(), &generation_action())
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.cost, Some(10));

        let outcome = engine
            .record_consumption(&account_id(), &generation_action())
            .await
            .unwrap();
        assert!(outcome.permitted());
        assert_eq!(engine.balance(&account_id()).await.unwrap(), 0);
    }
}
