//! PostgreSQL implementation of the LedgerStore port.
//!
//! Units of work map to serializable database transactions; row locks
//! on the hot records (accounts, subscriptions, counters) keep
//! serialization aborts rare, and the remaining conflicts surface as
//! `StorageConflict` for the caller's bounded retry. Uniqueness of
//! event identifiers and of the live subscription per account is
//! enforced by the schema, not application logic.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::entitlement::{GrantKind, ResourceGrant};
use crate::domain::foundation::{
    AccountId, LedgerError, PaymentEventId, PlanId, SubscriptionId, Timestamp, TransactionId,
    VideoId,
};
use crate::domain::ledger::{Account, LedgerTransaction, TransactionKind};
use crate::domain::subscription::{
    BillingPeriod, PlanEntitlements, Subscription, SubscriptionStatus,
};
use crate::domain::usage::UsagePeriodCounter;
use crate::ports::{Admission, LedgerStore, ProcessedEvent, UnitOfWork};

/// Production ledger store on PostgreSQL.
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Creates a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies pending schema migrations.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))
    }
}

fn map_sqlx(err: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(db) = &err {
        if let Some(code) = db.code() {
            // Serialization failure, deadlock, or unique violation: the
            // caller re-issues the unit of work.
            if code == "40001" || code == "40P01" || code == "23505" {
                return LedgerError::StorageConflict;
            }
        }
    }
    LedgerError::Storage(err.to_string())
}

fn corrupt(what: &str, detail: impl std::fmt::Display) -> LedgerError {
    LedgerError::Storage(format!("corrupt {} row: {}", what, detail))
}

fn account_from_row(row: &PgRow) -> Result<Account, LedgerError> {
    Ok(Account {
        id: AccountId::new(row.try_get::<String, _>("id").map_err(map_sqlx)?)
            .map_err(|e| corrupt("account", e))?,
        balance: row.try_get::<i64, _>("balance").map_err(map_sqlx)? as u64,
        created_at: Timestamp::from_datetime(
            row.try_get::<DateTime<Utc>, _>("created_at").map_err(map_sqlx)?,
        ),
    })
}

fn transaction_from_row(row: &PgRow) -> Result<LedgerTransaction, LedgerError> {
    let kind: String = row.try_get("kind").map_err(map_sqlx)?;
    let event_id: Option<String> = row.try_get("event_id").map_err(map_sqlx)?;
    Ok(LedgerTransaction {
        id: TransactionId::from_uuid(row.try_get::<Uuid, _>("id").map_err(map_sqlx)?),
        account_id: AccountId::new(row.try_get::<String, _>("account_id").map_err(map_sqlx)?)
            .map_err(|e| corrupt("transaction", e))?,
        amount: row.try_get("amount").map_err(map_sqlx)?,
        kind: TransactionKind::parse(&kind)
            .ok_or_else(|| corrupt("transaction", format!("kind '{}'", kind)))?,
        event_id: event_id
            .map(PaymentEventId::new)
            .transpose()
            .map_err(|e| corrupt("transaction", e))?,
        metadata: row.try_get("metadata").map_err(map_sqlx)?,
        created_at: Timestamp::from_datetime(
            row.try_get::<DateTime<Utc>, _>("created_at").map_err(map_sqlx)?,
        ),
    })
}

fn subscription_from_row(row: &PgRow) -> Result<Subscription, LedgerError> {
    let status: String = row.try_get("status").map_err(map_sqlx)?;
    let entitlements: serde_json::Value = row.try_get("entitlements").map_err(map_sqlx)?;
    Ok(Subscription {
        id: SubscriptionId::new(row.try_get::<String, _>("id").map_err(map_sqlx)?)
            .map_err(|e| corrupt("subscription", e))?,
        account_id: AccountId::new(row.try_get::<String, _>("account_id").map_err(map_sqlx)?)
            .map_err(|e| corrupt("subscription", e))?,
        plan_id: PlanId::new(row.try_get::<String, _>("plan_id").map_err(map_sqlx)?)
            .map_err(|e| corrupt("subscription", e))?,
        status: SubscriptionStatus::parse(&status).map_err(|e| corrupt("subscription", e))?,
        entitlements: serde_json::from_value::<PlanEntitlements>(entitlements)
            .map_err(|e| corrupt("subscription", e))?,
        period_start: Timestamp::from_datetime(
            row.try_get::<DateTime<Utc>, _>("period_start").map_err(map_sqlx)?,
        ),
        period_end: Timestamp::from_datetime(
            row.try_get::<DateTime<Utc>, _>("period_end").map_err(map_sqlx)?,
        ),
        created_at: Timestamp::from_datetime(
            row.try_get::<DateTime<Utc>, _>("created_at").map_err(map_sqlx)?,
        ),
        updated_at: Timestamp::from_datetime(
            row.try_get::<DateTime<Utc>, _>("updated_at").map_err(map_sqlx)?,
        ),
    })
}

fn counter_from_row(row: &PgRow) -> Result<UsagePeriodCounter, LedgerError> {
    let resettable: serde_json::Value = row.try_get("resettable").map_err(map_sqlx)?;
    let cumulative: serde_json::Value = row.try_get("cumulative").map_err(map_sqlx)?;
    let resettable: BTreeMap<String, u64> =
        serde_json::from_value(resettable).map_err(|e| corrupt("usage counter", e))?;
    let cumulative: BTreeMap<String, u64> =
        serde_json::from_value(cumulative).map_err(|e| corrupt("usage counter", e))?;

    let period = BillingPeriod::from_bounds(
        Timestamp::from_datetime(
            row.try_get::<DateTime<Utc>, _>("period_start").map_err(map_sqlx)?,
        ),
        Timestamp::from_datetime(
            row.try_get::<DateTime<Utc>, _>("period_end").map_err(map_sqlx)?,
        ),
    );

    Ok(UsagePeriodCounter::from_parts(
        AccountId::new(row.try_get::<String, _>("account_id").map_err(map_sqlx)?)
            .map_err(|e| corrupt("usage counter", e))?,
        SubscriptionId::new(row.try_get::<String, _>("subscription_id").map_err(map_sqlx)?)
            .map_err(|e| corrupt("usage counter", e))?,
        period,
        resettable,
        cumulative,
        Timestamp::from_datetime(
            row.try_get::<DateTime<Utc>, _>("created_at").map_err(map_sqlx)?,
        ),
    ))
}

fn grant_from_row(row: &PgRow) -> Result<ResourceGrant, LedgerError> {
    let kind: String = row.try_get("kind").map_err(map_sqlx)?;
    let revoked_at: Option<DateTime<Utc>> = row.try_get("revoked_at").map_err(map_sqlx)?;
    Ok(ResourceGrant {
        resource_id: VideoId::new(row.try_get::<String, _>("resource_id").map_err(map_sqlx)?)
            .map_err(|e| corrupt("grant", e))?,
        account_id: AccountId::new(row.try_get::<String, _>("account_id").map_err(map_sqlx)?)
            .map_err(|e| corrupt("grant", e))?,
        kind: GrantKind::parse(&kind).ok_or_else(|| corrupt("grant", format!("kind '{}'", kind)))?,
        origin_transaction: TransactionId::from_uuid(
            row.try_get::<Uuid, _>("origin_transaction").map_err(map_sqlx)?,
        ),
        granted_at: Timestamp::from_datetime(
            row.try_get::<DateTime<Utc>, _>("granted_at").map_err(map_sqlx)?,
        ),
        revoked_at: revoked_at.map(Timestamp::from_datetime),
    })
}

fn event_from_row(row: &PgRow) -> Result<ProcessedEvent, LedgerError> {
    Ok(ProcessedEvent {
        event_id: PaymentEventId::new(row.try_get::<String, _>("event_id").map_err(map_sqlx)?)
            .map_err(|e| corrupt("processed event", e))?,
        event_type: row.try_get("event_type").map_err(map_sqlx)?,
        outcome: row.try_get("outcome").map_err(map_sqlx)?,
        processed_at: Timestamp::from_datetime(
            row.try_get::<DateTime<Utc>, _>("processed_at").map_err(map_sqlx)?,
        ),
    })
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        Ok(Box::new(PostgresUnitOfWork {
            tx,
            admitted: HashSet::new(),
        }))
    }

    async fn load_account(&self, id: &AccountId) -> Result<Option<Account>, LedgerError> {
        sqlx::query("SELECT id, balance, created_at FROM accounts WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .map(|row| account_from_row(&row))
            .transpose()
    }

    async fn account_transactions(
        &self,
        id: &AccountId,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, amount, kind, event_id, metadata, created_at
            FROM ledger_transactions
            WHERE account_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn current_subscription(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<Subscription>, LedgerError> {
        sqlx::query(
            r#"
            SELECT id, account_id, plan_id, status, entitlements,
                   period_start, period_end, created_at, updated_at
            FROM subscriptions
            WHERE account_id = $1 AND status IN ('trialing', 'active', 'past_due')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(account_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .map(|row| subscription_from_row(&row))
        .transpose()
    }

    async fn usage_counter(
        &self,
        subscription_id: &SubscriptionId,
        period: &BillingPeriod,
    ) -> Result<Option<UsagePeriodCounter>, LedgerError> {
        sqlx::query(
            r#"
            SELECT subscription_id, account_id, period_start, period_end,
                   resettable, cumulative, created_at
            FROM usage_period_counters
            WHERE subscription_id = $1 AND period_start = $2
            "#,
        )
        .bind(subscription_id.as_str())
        .bind(period.start().as_datetime())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .map(|row| counter_from_row(&row))
        .transpose()
    }

    async fn grant_for_resource(
        &self,
        resource_id: &VideoId,
    ) -> Result<Option<ResourceGrant>, LedgerError> {
        sqlx::query(
            r#"
            SELECT resource_id, account_id, kind, origin_transaction, granted_at, revoked_at
            FROM resource_grants
            WHERE resource_id = $1
            "#,
        )
        .bind(resource_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .map(|row| grant_from_row(&row))
        .transpose()
    }

    async fn processed_event(
        &self,
        event_id: &PaymentEventId,
    ) -> Result<Option<ProcessedEvent>, LedgerError> {
        sqlx::query(
            "SELECT event_id, event_type, outcome, processed_at FROM processed_events WHERE event_id = $1",
        )
        .bind(event_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .map(|row| event_from_row(&row))
        .transpose()
    }
}

struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
    // Identifiers claimed by this transaction; re-admission within the
    // same unit of work is idempotent.
    admitted: HashSet<PaymentEventId>,
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn account(&mut self, id: &AccountId) -> Result<Option<Account>, LedgerError> {
        sqlx::query("SELECT id, balance, created_at FROM accounts WHERE id = $1 FOR UPDATE")
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?
            .map(|row| account_from_row(&row))
            .transpose()
    }

    async fn put_account(&mut self, account: Account) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, balance, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET balance = EXCLUDED.balance
            "#,
        )
        .bind(account.id.as_str())
        .bind(account.balance as i64)
        .bind(account.created_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn append_transaction(
        &mut self,
        transaction: LedgerTransaction,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO ledger_transactions
                (id, account_id, amount, kind, event_id, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(transaction.id.as_uuid())
        .bind(transaction.account_id.as_str())
        .bind(transaction.amount)
        .bind(transaction.kind.as_str())
        .bind(transaction.event_id.as_ref().map(|id| id.as_str()))
        .bind(&transaction.metadata)
        .bind(transaction.created_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn admit_event(
        &mut self,
        event_id: &PaymentEventId,
        now: Timestamp,
    ) -> Result<Admission, LedgerError> {
        if self.admitted.contains(event_id) {
            return Ok(Admission::Accepted);
        }
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, event_type, outcome, processed_at)
            VALUES ($1, '', 'admitted', $2)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id.as_str())
        .bind(now.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Ok(Admission::Duplicate);
        }
        self.admitted.insert(event_id.clone());
        Ok(Admission::Accepted)
    }

    async fn record_event(&mut self, record: ProcessedEvent) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            UPDATE processed_events
            SET event_type = $2, outcome = $3, processed_at = $4
            WHERE event_id = $1
            "#,
        )
        .bind(record.event_id.as_str())
        .bind(&record.event_type)
        .bind(&record.outcome)
        .bind(record.processed_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn subscription(
        &mut self,
        id: &SubscriptionId,
    ) -> Result<Option<Subscription>, LedgerError> {
        sqlx::query(
            r#"
            SELECT id, account_id, plan_id, status, entitlements,
                   period_start, period_end, created_at, updated_at
            FROM subscriptions
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .map(|row| subscription_from_row(&row))
        .transpose()
    }

    async fn current_subscription(
        &mut self,
        account_id: &AccountId,
    ) -> Result<Option<Subscription>, LedgerError> {
        sqlx::query(
            r#"
            SELECT id, account_id, plan_id, status, entitlements,
                   period_start, period_end, created_at, updated_at
            FROM subscriptions
            WHERE account_id = $1 AND status IN ('trialing', 'active', 'past_due')
            ORDER BY created_at DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(account_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .map(|row| subscription_from_row(&row))
        .transpose()
    }

    async fn put_subscription(&mut self, subscription: Subscription) -> Result<(), LedgerError> {
        let entitlements = serde_json::to_value(&subscription.entitlements)
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (id, account_id, plan_id, status, entitlements,
                 period_start, period_end, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                plan_id = EXCLUDED.plan_id,
                status = EXCLUDED.status,
                entitlements = EXCLUDED.entitlements,
                period_start = EXCLUDED.period_start,
                period_end = EXCLUDED.period_end,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(subscription.id.as_str())
        .bind(subscription.account_id.as_str())
        .bind(subscription.plan_id.as_str())
        .bind(subscription.status.as_str())
        .bind(&entitlements)
        .bind(subscription.period_start.as_datetime())
        .bind(subscription.period_end.as_datetime())
        .bind(subscription.created_at.as_datetime())
        .bind(subscription.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn usage_counter(
        &mut self,
        subscription_id: &SubscriptionId,
        period: &BillingPeriod,
    ) -> Result<Option<UsagePeriodCounter>, LedgerError> {
        sqlx::query(
            r#"
            SELECT subscription_id, account_id, period_start, period_end,
                   resettable, cumulative, created_at
            FROM usage_period_counters
            WHERE subscription_id = $1 AND period_start = $2
            FOR UPDATE
            "#,
        )
        .bind(subscription_id.as_str())
        .bind(period.start().as_datetime())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .map(|row| counter_from_row(&row))
        .transpose()
    }

    async fn latest_usage_counter(
        &mut self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<UsagePeriodCounter>, LedgerError> {
        sqlx::query(
            r#"
            SELECT subscription_id, account_id, period_start, period_end,
                   resettable, cumulative, created_at
            FROM usage_period_counters
            WHERE subscription_id = $1
            ORDER BY period_start DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(subscription_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .map(|row| counter_from_row(&row))
        .transpose()
    }

    async fn put_usage_counter(&mut self, counter: UsagePeriodCounter) -> Result<(), LedgerError> {
        let resettable = serde_json::to_value(counter.resettable())
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        let cumulative = serde_json::to_value(counter.cumulative())
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO usage_period_counters
                (subscription_id, account_id, period_start, period_end,
                 resettable, cumulative, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (subscription_id, period_start) DO UPDATE SET
                resettable = EXCLUDED.resettable,
                cumulative = EXCLUDED.cumulative
            "#,
        )
        .bind(counter.subscription_id.as_str())
        .bind(counter.account_id.as_str())
        .bind(counter.period.start().as_datetime())
        .bind(counter.period.end().as_datetime())
        .bind(&resettable)
        .bind(&cumulative)
        .bind(counter.created_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn grant_for_resource(
        &mut self,
        resource_id: &VideoId,
    ) -> Result<Option<ResourceGrant>, LedgerError> {
        sqlx::query(
            r#"
            SELECT resource_id, account_id, kind, origin_transaction, granted_at, revoked_at
            FROM resource_grants
            WHERE resource_id = $1
            FOR UPDATE
            "#,
        )
        .bind(resource_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .map(|row| grant_from_row(&row))
        .transpose()
    }

    async fn put_grant(&mut self, grant: ResourceGrant) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO resource_grants
                (resource_id, account_id, kind, origin_transaction, granted_at, revoked_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (resource_id) DO UPDATE SET
                kind = EXCLUDED.kind,
                revoked_at = EXCLUDED.revoked_at
            "#,
        )
        .bind(grant.resource_id.as_str())
        .bind(grant.account_id.as_str())
        .bind(grant.kind.as_str())
        .bind(grant.origin_transaction.as_uuid())
        .bind(grant.granted_at.as_datetime())
        .bind(grant.revoked_at.map(|t| *t.as_datetime()))
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.commit().await.map_err(map_sqlx)
    }
}
