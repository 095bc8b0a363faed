//! Immutable, append-only ledger transactions.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{AccountId, PaymentEventId, Timestamp, TransactionId};

/// Classification of a ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Credits bought through the payment provider.
    Purchase,
    /// Credits spent on a metered action.
    Consumption,
    /// Credits returned by a refund-class event.
    Refund,
    /// Credits or unlocks granted without payment.
    Grant,
}

impl TransactionKind {
    /// Returns the storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Purchase => "purchase",
            TransactionKind::Consumption => "consumption",
            TransactionKind::Refund => "refund",
            TransactionKind::Grant => "grant",
        }
    }

    /// Parses a storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "purchase" => Some(TransactionKind::Purchase),
            "consumption" => Some(TransactionKind::Consumption),
            "refund" => Some(TransactionKind::Refund),
            "grant" => Some(TransactionKind::Grant),
            _ => None,
        }
    }
}

/// One immutable entry in an account's audit trail.
///
/// The amount is signed: positive for credits entering the account,
/// negative for consumption. The sum of all transactions for an account
/// equals its current balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Unique transaction identifier.
    pub id: TransactionId,

    /// Account this entry belongs to.
    pub account_id: AccountId,

    /// Signed credit delta.
    pub amount: i64,

    /// Classification.
    pub kind: TransactionKind,

    /// Originating payment event, when provider-driven.
    pub event_id: Option<PaymentEventId>,

    /// Free-form context (action parameters, product names).
    pub metadata: serde_json::Value,

    /// When the entry was appended.
    pub created_at: Timestamp,
}

impl LedgerTransaction {
    /// Builds a positive entry for credits entering the account.
    pub fn credit(
        account_id: AccountId,
        amount: u64,
        kind: TransactionKind,
        event_id: Option<PaymentEventId>,
        metadata: serde_json::Value,
        now: Timestamp,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            account_id,
            amount: amount as i64,
            kind,
            event_id,
            metadata,
            created_at: now,
        }
    }

    /// Builds a negative entry for credits leaving the account.
    pub fn debit(
        account_id: AccountId,
        amount: u64,
        kind: TransactionKind,
        metadata: serde_json::Value,
        now: Timestamp,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            account_id,
            amount: -(amount as i64),
            kind,
            event_id: None,
            metadata,
            created_at: now,
        }
    }

    /// Builds a zero-amount marker entry anchoring a one-off unlock.
    ///
    /// Unlocks do not move the balance, but the grant still references
    /// a ledger entry so the audit trail covers it.
    pub fn unlock_marker(
        account_id: AccountId,
        event_id: Option<PaymentEventId>,
        metadata: serde_json::Value,
        now: Timestamp,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            account_id,
            amount: 0,
            kind: TransactionKind::Grant,
            event_id,
            metadata,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn account_id() -> AccountId {
        AccountId::new("user-1").unwrap()
    }

    #[test]
    fn credit_entries_are_positive() {
        let tx = LedgerTransaction::credit(
            account_id(),
            100,
            TransactionKind::Purchase,
            Some(PaymentEventId::new("evt_1").unwrap()),
            json!({"product": "Starter Pack"}),
            Timestamp::now(),
        );

        assert_eq!(tx.amount, 100);
        assert_eq!(tx.kind, TransactionKind::Purchase);
        assert_eq!(tx.event_id.unwrap().as_str(), "evt_1");
    }

    #[test]
    fn debit_entries_are_negative() {
        let tx = LedgerTransaction::debit(
            account_id(),
            30,
            TransactionKind::Consumption,
            json!({"action": "generate_video"}),
            Timestamp::now(),
        );

        assert_eq!(tx.amount, -30);
        assert!(tx.event_id.is_none());
    }

    #[test]
    fn unlock_marker_has_zero_amount() {
        let tx = LedgerTransaction::unlock_marker(
            account_id(),
            Some(PaymentEventId::new("evt_2").unwrap()),
            json!({"video_id": "vid_9"}),
            Timestamp::now(),
        );

        assert_eq!(tx.amount, 0);
        assert_eq!(tx.kind, TransactionKind::Grant);
    }

    #[test]
    fn kind_roundtrips_through_storage_representation() {
        for kind in [
            TransactionKind::Purchase,
            TransactionKind::Consumption,
            TransactionKind::Refund,
            TransactionKind::Grant,
        ] {
            assert_eq!(TransactionKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TransactionKind::parse("transfer"), None);
    }
}
