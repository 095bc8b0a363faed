//! Error types for the ledger core.

use thiserror::Error;

/// Errors that occur during value object construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Field '{field}' cannot be empty")]
    EmptyField { field: String },

    #[error("Field '{field}' has invalid value: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ValidationError {
    /// Creates an empty field validation error.
    pub fn empty_field(field: impl Into<String>) -> Self {
        ValidationError::EmptyField {
            field: field.into(),
        }
    }

    /// Creates an invalid value validation error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors returned by ledger operations.
///
/// `DuplicateEvent` is a successful no-op signal rather than a failure:
/// it means the economic effect of the event was already applied.
/// `StorageConflict` is retried internally a bounded number of times and
/// only surfaces once the retry budget is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The payment event was already processed; no effect was applied.
    #[error("Event '{0}' was already processed")]
    DuplicateEvent(String),

    /// A debit would take the balance below zero.
    #[error("Insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: u64, required: u64 },

    /// A counter increment would exceed the tier limit.
    #[error("Quota exceeded for '{counter}': {used}/{limit}")]
    QuotaExceeded {
        counter: String,
        used: u64,
        limit: u64,
    },

    /// No account exists for the given identifier.
    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    /// No subscription exists for the given identifier.
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(String),

    /// The tier does not declare a counter with this name.
    #[error("Unknown counter: {0}")]
    UnknownCounter(String),

    /// A credit or debit amount must be strictly positive.
    #[error("Amount must be positive")]
    InvalidAmount,

    /// Required metadata was missing or malformed on an external event.
    #[error("Invalid event payload: {0}")]
    InvalidEventPayload(String),

    /// The action is refused by the active plan's caps.
    #[error("Action not permitted: {0}")]
    NotPermitted(String),

    /// The transaction could not be serialized against concurrent writers.
    #[error("Storage conflict: transaction could not be serialized")]
    StorageConflict,

    /// The storage layer failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Returns true if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::StorageConflict)
    }
}
