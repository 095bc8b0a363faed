//! WebhookReconciler - the asynchronous decision point.
//!
//! Maps each payment event type to its ledger mutation. Every branch
//! admits the event identifier inside the same unit of work as its
//! effect, so delivery is at-least-once but the economic effect is
//! exactly-once: a rejected admission short-circuits as `Duplicate`,
//! the expected outcome of provider retry.
//!
//! Effects are written to be safe under out-of-order delivery across
//! event types for the same subscription: renewals and status updates
//! for a cancelled subscription are acknowledged and ignored rather
//! than failed, and all effects on the same account serialize through
//! the store's conflict detection.

use std::sync::Arc;

use serde_json::json;

use crate::domain::entitlement::{GrantKind, ResourceGrant};
use crate::domain::foundation::{
    AccountId, LedgerError, PlanId, SubscriptionId, Timestamp, VideoId,
};
use crate::domain::ledger::{credit_ledger, LedgerTransaction, TransactionKind};
use crate::domain::subscription::{BillingPeriod, PlanEntitlements, Subscription, SubscriptionStatus};
use crate::domain::usage::quota_tracker;
use crate::domain::webhook::{PaymentEvent, PaymentEventKind, WebhookError};
use crate::ports::{Admission, LedgerStore, ProcessedEvent, UnitOfWork, MAX_COMMIT_ATTEMPTS};

/// What reconciling one event did.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// A credit package was applied to the account.
    CreditsGranted { account_id: AccountId, amount: u64 },

    /// A one-off unlock was attached to a resource.
    UnlockGranted {
        account_id: AccountId,
        resource_id: VideoId,
    },

    /// A subscription was created, superseding any live predecessor.
    SubscriptionActivated {
        account_id: AccountId,
        subscription_id: SubscriptionId,
    },

    /// A billing period renewed and the next counter opened.
    SubscriptionRenewed {
        subscription_id: SubscriptionId,
        period: BillingPeriod,
    },

    /// The plan and entitlement set changed in place.
    PlanChanged {
        subscription_id: SubscriptionId,
        plan_id: PlanId,
    },

    /// Only the subscription status changed.
    StatusUpdated {
        subscription_id: SubscriptionId,
        status: SubscriptionStatus,
    },

    /// The event identifier was already processed; nothing applied.
    Duplicate,

    /// The event was acknowledged without effect.
    Ignored { reason: String },
}

impl ReconcileOutcome {
    /// Short summary recorded on the processed-event row.
    pub fn summary(&self) -> String {
        match self {
            ReconcileOutcome::CreditsGranted { account_id, amount } => {
                format!("credited {} credits to {}", amount, account_id)
            }
            ReconcileOutcome::UnlockGranted {
                account_id,
                resource_id,
            } => format!("unlocked {} for {}", resource_id, account_id),
            ReconcileOutcome::SubscriptionActivated {
                account_id,
                subscription_id,
            } => format!("activated {} for {}", subscription_id, account_id),
            ReconcileOutcome::SubscriptionRenewed {
                subscription_id,
                period,
            } => format!("renewed {} into {}", subscription_id, period),
            ReconcileOutcome::PlanChanged {
                subscription_id,
                plan_id,
            } => format!("moved {} to plan {}", subscription_id, plan_id),
            ReconcileOutcome::StatusUpdated {
                subscription_id,
                status,
            } => format!("set {} to {}", subscription_id, status.as_str()),
            ReconcileOutcome::Duplicate => "duplicate delivery".to_string(),
            ReconcileOutcome::Ignored { reason } => format!("ignored: {}", reason),
        }
    }
}

/// Applies payment events to the ledger, exactly once each.
pub struct WebhookReconciler {
    store: Arc<dyn LedgerStore>,
}

impl WebhookReconciler {
    /// Creates a reconciler over the given store.
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Reconciles one delivered event.
    ///
    /// Serialization conflicts are retried internally; a malformed
    /// event surfaces as an error without blocking later, unrelated
    /// events, because nothing of the failed unit of work commits.
    pub async fn process(&self, event: &PaymentEvent) -> Result<ReconcileOutcome, WebhookError> {
        let now = Timestamp::now();
        let kind = event.kind();

        let mut attempts: u32 = 0;
        loop {
            let mut uow = self.store.begin().await?;

            match uow.admit_event(&event.id, now).await? {
                Admission::Accepted => {}
                Admission::Duplicate => {
                    tracing::debug!(event_id = %event.id, "duplicate delivery, skipping");
                    return Ok(ReconcileOutcome::Duplicate);
                }
            }

            let outcome = match self.apply(uow.as_mut(), event, kind, now).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    if err.status_code() == http::StatusCode::BAD_REQUEST {
                        tracing::warn!(
                            event_id = %event.id,
                            event_type = %event.event_type,
                            error = %err,
                            "rejected malformed payment event"
                        );
                    }
                    return Err(err);
                }
            };

            uow.record_event(ProcessedEvent::new(
                event.id.clone(),
                event.event_type.clone(),
                outcome.summary(),
                now,
            ))
            .await?;

            match uow.commit().await {
                Ok(()) => {
                    tracing::info!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        outcome = %outcome.summary(),
                        "payment event reconciled"
                    );
                    return Ok(outcome);
                }
                Err(LedgerError::StorageConflict) if attempts + 1 < MAX_COMMIT_ATTEMPTS => {
                    attempts += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn apply(
        &self,
        uow: &mut dyn UnitOfWork,
        event: &PaymentEvent,
        kind: PaymentEventKind,
        now: Timestamp,
    ) -> Result<ReconcileOutcome, WebhookError> {
        match kind {
            PaymentEventKind::PurchaseSucceeded => self.apply_purchase(uow, event, now).await,
            PaymentEventKind::SubscriptionActivated => {
                self.apply_activation(uow, event, now).await
            }
            PaymentEventKind::SubscriptionRenewed => self.apply_renewal(uow, event, now).await,
            PaymentEventKind::SubscriptionPlanChanged => {
                self.apply_plan_change(uow, event, now).await
            }
            PaymentEventKind::SubscriptionPastDue => {
                self.apply_status(uow, event, SubscriptionStatus::PastDue, now).await
            }
            PaymentEventKind::SubscriptionCancelled => {
                self.apply_status(uow, event, SubscriptionStatus::Cancelled, now).await
            }
            PaymentEventKind::Unknown => Ok(ReconcileOutcome::Ignored {
                reason: format!("unhandled event type '{}'", event.event_type),
            }),
        }
    }

    async fn apply_purchase(
        &self,
        uow: &mut dyn UnitOfWork,
        event: &PaymentEvent,
        now: Timestamp,
    ) -> Result<ReconcileOutcome, WebhookError> {
        let payment = event
            .data
            .payment
            .as_ref()
            .ok_or(WebhookError::MissingField("payment"))?;
        let meta = payment.purchase_metadata()?;
        let account_id =
            AccountId::new(&meta.user_id).map_err(|_| WebhookError::MissingMetadata("user_id"))?;

        if meta.unlock_type.as_deref() == Some(GrantKind::WatermarkRemoval.as_str()) {
            let video = meta
                .video_id
                .as_deref()
                .ok_or(WebhookError::MissingMetadata("video_id"))?;
            let video_id =
                VideoId::new(video).map_err(|_| WebhookError::MissingMetadata("video_id"))?;

            if uow.account(&account_id).await?.is_none() {
                return Err(WebhookError::UnknownAccount(account_id.to_string()));
            }

            let marker = LedgerTransaction::unlock_marker(
                account_id.clone(),
                Some(event.id.clone()),
                json!({
                    "video_id": video,
                    "payment_id": payment.payment_id,
                }),
                now,
            );
            uow.append_transaction(marker.clone()).await?;

            let grant = ResourceGrant::new(
                video_id.clone(),
                account_id.clone(),
                GrantKind::WatermarkRemoval,
                marker.id,
                now,
            );
            uow.put_grant(grant).await?;

            return Ok(ReconcileOutcome::UnlockGranted {
                account_id,
                resource_id: video_id,
            });
        }

        match meta.purchase_type.as_deref() {
            Some("credit_package") => {
                let package = payment.credit_package()?;
                if package.total_credits == 0 {
                    return Err(WebhookError::InvalidPayload(
                        "total_credits must be positive".to_string(),
                    ));
                }

                let product = payment.line_items.first().and_then(|item| item.name.clone());
                credit_ledger::credit(
                    uow,
                    &account_id,
                    package.total_credits,
                    TransactionKind::Purchase,
                    Some(&event.id),
                    json!({
                        "payment_id": payment.payment_id,
                        "product": product,
                    }),
                    now,
                )
                .await?;

                Ok(ReconcileOutcome::CreditsGranted {
                    account_id,
                    amount: package.total_credits,
                })
            }
            _ => Ok(ReconcileOutcome::Ignored {
                reason: format!("unhandled purchase type for payment {}", payment.payment_id),
            }),
        }
    }

    async fn apply_activation(
        &self,
        uow: &mut dyn UnitOfWork,
        event: &PaymentEvent,
        now: Timestamp,
    ) -> Result<ReconcileOutcome, WebhookError> {
        let object = event
            .data
            .subscription
            .as_ref()
            .ok_or(WebhookError::MissingField("subscription"))?;
        let meta = object.subscription_metadata()?;
        let entitlements = PlanEntitlements::from_metadata(&object.metadata)?;

        let account_id =
            AccountId::new(&meta.user_id).map_err(|_| WebhookError::MissingMetadata("user_id"))?;
        let plan_id =
            PlanId::new(&meta.plan_id).map_err(|_| WebhookError::MissingMetadata("plan_id"))?;
        let subscription_id = SubscriptionId::new(&object.subscription_id)
            .map_err(|_| WebhookError::MissingField("subscription_id"))?;

        if uow.account(&account_id).await?.is_none() {
            return Err(WebhookError::UnknownAccount(account_id.to_string()));
        }

        // A new subscription supersedes the live one; the old row is
        // cancelled, never deleted.
        if let Some(mut previous) = uow.current_subscription(&account_id).await? {
            if previous.id != subscription_id {
                previous
                    .cancel(now)
                    .map_err(|e| WebhookError::InvalidTransition(e.to_string()))?;
                uow.put_subscription(previous).await?;
            }
        }

        let status = if object.status.as_deref() == Some("trialing") {
            SubscriptionStatus::Trialing
        } else {
            SubscriptionStatus::Active
        };

        let subscription = Subscription::activate(
            subscription_id.clone(),
            account_id.clone(),
            plan_id,
            entitlements,
            status,
            now,
        );
        uow.put_subscription(subscription).await?;

        Ok(ReconcileOutcome::SubscriptionActivated {
            account_id,
            subscription_id,
        })
    }

    async fn apply_renewal(
        &self,
        uow: &mut dyn UnitOfWork,
        event: &PaymentEvent,
        now: Timestamp,
    ) -> Result<ReconcileOutcome, WebhookError> {
        let object = event
            .data
            .subscription
            .as_ref()
            .ok_or(WebhookError::MissingField("subscription"))?;
        let subscription_id = SubscriptionId::new(&object.subscription_id)
            .map_err(|_| WebhookError::MissingField("subscription_id"))?;

        let mut subscription = uow
            .subscription(&subscription_id)
            .await?
            .ok_or_else(|| WebhookError::UnknownSubscription(subscription_id.to_string()))?;

        if !subscription.is_live() {
            // Out-of-order with a cancellation that already committed.
            return Ok(ReconcileOutcome::Ignored {
                reason: format!("renewal for cancelled subscription {}", subscription_id),
            });
        }

        let new_period = quota_tracker::current_period(now);
        subscription
            .renew(new_period, now)
            .map_err(|e| WebhookError::InvalidTransition(e.to_string()))?;
        uow.put_subscription(subscription.clone()).await?;

        quota_tracker::renew(uow, &subscription, new_period, now).await?;

        Ok(ReconcileOutcome::SubscriptionRenewed {
            subscription_id,
            period: new_period,
        })
    }

    async fn apply_plan_change(
        &self,
        uow: &mut dyn UnitOfWork,
        event: &PaymentEvent,
        now: Timestamp,
    ) -> Result<ReconcileOutcome, WebhookError> {
        let object = event
            .data
            .subscription
            .as_ref()
            .ok_or(WebhookError::MissingField("subscription"))?;
        let meta = object.subscription_metadata()?;
        let entitlements = PlanEntitlements::from_metadata(&object.metadata)?;
        let plan_id =
            PlanId::new(&meta.plan_id).map_err(|_| WebhookError::MissingMetadata("plan_id"))?;
        let subscription_id = SubscriptionId::new(&object.subscription_id)
            .map_err(|_| WebhookError::MissingField("subscription_id"))?;

        let mut subscription = uow
            .subscription(&subscription_id)
            .await?
            .ok_or_else(|| WebhookError::UnknownSubscription(subscription_id.to_string()))?;

        // The current period's counters are untouched; the new limits
        // apply to usage already accumulated this month.
        subscription.change_plan(plan_id.clone(), entitlements, now);
        uow.put_subscription(subscription).await?;

        Ok(ReconcileOutcome::PlanChanged {
            subscription_id,
            plan_id,
        })
    }

    async fn apply_status(
        &self,
        uow: &mut dyn UnitOfWork,
        event: &PaymentEvent,
        target: SubscriptionStatus,
        now: Timestamp,
    ) -> Result<ReconcileOutcome, WebhookError> {
        let object = event
            .data
            .subscription
            .as_ref()
            .ok_or(WebhookError::MissingField("subscription"))?;
        let subscription_id = SubscriptionId::new(&object.subscription_id)
            .map_err(|_| WebhookError::MissingField("subscription_id"))?;

        let mut subscription = uow
            .subscription(&subscription_id)
            .await?
            .ok_or_else(|| WebhookError::UnknownSubscription(subscription_id.to_string()))?;

        if subscription.status == SubscriptionStatus::Cancelled
            && target != SubscriptionStatus::Cancelled
        {
            // A late status update for an already-cancelled subscription.
            return Ok(ReconcileOutcome::Ignored {
                reason: format!("status update for cancelled subscription {}", subscription_id),
            });
        }

        match target {
            SubscriptionStatus::PastDue => subscription.mark_past_due(now),
            SubscriptionStatus::Cancelled => subscription.cancel(now),
            other => {
                return Err(WebhookError::InvalidTransition(format!(
                    "status events cannot set {:?}",
                    other
                )))
            }
        }
        .map_err(|e| WebhookError::InvalidTransition(e.to_string()))?;

        uow.put_subscription(subscription).await?;

        Ok(ReconcileOutcome::StatusUpdated {
            subscription_id,
            status: target,
        })
    }
}
