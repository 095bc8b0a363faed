//! Account entity - one per user, holding the credit balance.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{AccountId, LedgerError, Timestamp};

/// A billing account.
///
/// The balance never goes negative; debits that would overdraw fail
/// without effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique user identifier.
    pub id: AccountId,

    /// Current credit balance.
    pub balance: u64,

    /// When the account was opened.
    pub created_at: Timestamp,
}

impl Account {
    /// Opens an account with a zero balance.
    pub fn new(id: AccountId, now: Timestamp) -> Self {
        Self {
            id,
            balance: 0,
            created_at: now,
        }
    }

    /// Increases the balance.
    pub fn apply_credit(&mut self, amount: u64) {
        self.balance += amount;
    }

    /// Decreases the balance.
    ///
    /// Fails with `InsufficientBalance` if the balance would go
    /// negative; partial debits never happen.
    pub fn apply_debit(&mut self, amount: u64) -> Result<(), LedgerError> {
        if self.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                balance: self.balance,
                required: amount,
            });
        }
        self.balance -= amount;
        Ok(())
    }
}
