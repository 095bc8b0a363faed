//! Credit ledger operations.
//!
//! Each operation runs inside a caller-supplied [`UnitOfWork`], so the
//! balance change, the appended transaction, and (for provider-driven
//! credits) the event admission commit together or not at all. The
//! caller owns the commit and any conflict retry.

use crate::domain::foundation::{AccountId, LedgerError, PaymentEventId, Timestamp};
use crate::domain::ledger::{LedgerTransaction, TransactionKind};
use crate::ports::{Admission, ProcessedEvent, UnitOfWork};

/// Appends a credit and atomically increases the balance.
///
/// When `event_id` is present the identifier is admitted in the same
/// unit of work; a previously processed identifier fails with
/// `DuplicateEvent` and nothing is staged.
///
/// # Errors
///
/// - `InvalidAmount` if `amount` is zero
/// - `DuplicateEvent` if `event_id` was already processed
/// - `UnknownAccount` if the account does not exist
pub async fn credit(
    uow: &mut dyn UnitOfWork,
    account_id: &AccountId,
    amount: u64,
    kind: TransactionKind,
    event_id: Option<&PaymentEventId>,
    metadata: serde_json::Value,
    now: Timestamp,
) -> Result<LedgerTransaction, LedgerError> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount);
    }

    if let Some(id) = event_id {
        match uow.admit_event(id, now).await? {
            Admission::Accepted => {
                uow.record_event(ProcessedEvent::new(
                    id.clone(),
                    kind.as_str(),
                    format!("credited {} credits", amount),
                    now,
                ))
                .await?;
            }
            Admission::Duplicate => {
                return Err(LedgerError::DuplicateEvent(id.to_string()));
            }
        }
    }

    let mut account = uow
        .account(account_id)
        .await?
        .ok_or_else(|| LedgerError::UnknownAccount(account_id.to_string()))?;

    account.apply_credit(amount);
    uow.put_account(account).await?;

    let transaction = LedgerTransaction::credit(
        account_id.clone(),
        amount,
        kind,
        event_id.cloned(),
        metadata,
        now,
    );
    uow.append_transaction(transaction.clone()).await?;

    Ok(transaction)
}

/// Appends a debit and atomically decreases the balance.
///
/// The balance check and the decrement happen in one unit of work, so
/// this is the authorizing step for credit-metered consumption: no
/// advisory pre-check is needed.
///
/// # Errors
///
/// - `InvalidAmount` if `amount` is zero
/// - `UnknownAccount` if the account does not exist
/// - `InsufficientBalance` if the balance is smaller than `amount`
pub async fn debit(
    uow: &mut dyn UnitOfWork,
    account_id: &AccountId,
    amount: u64,
    kind: TransactionKind,
    metadata: serde_json::Value,
    now: Timestamp,
) -> Result<LedgerTransaction, LedgerError> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount);
    }

    let mut account = uow
        .account(account_id)
        .await?
        .ok_or_else(|| LedgerError::UnknownAccount(account_id.to_string()))?;

    account.apply_debit(amount)?;
    uow.put_account(account).await?;

    let transaction =
        LedgerTransaction::debit(account_id.clone(), amount, kind, metadata, now);
    uow.append_transaction(transaction.clone()).await?;

    Ok(transaction)
}
