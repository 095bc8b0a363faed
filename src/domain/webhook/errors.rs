//! Webhook error types.
//!
//! Defines the error conditions of webhook reconciliation, with HTTP
//! status mapping and retryability semantics for the delivery endpoint.
//! A duplicate delivery is not an error: it resolves to
//! `ReconcileOutcome::Duplicate` before any of these can occur.

use http::StatusCode;
use thiserror::Error;

use crate::domain::foundation::LedgerError;

/// Errors that occur while reconciling a payment event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    /// Payload or metadata failed validation.
    #[error("Invalid event payload: {0}")]
    InvalidPayload(String),

    /// Required object missing from the event payload.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Required metadata field missing from the payment or subscription.
    #[error("Missing metadata: {0}")]
    MissingMetadata(&'static str),

    /// The referenced account does not exist yet.
    #[error("Account not found: {0}")]
    UnknownAccount(String),

    /// The referenced subscription does not exist yet.
    #[error("Subscription not found: {0}")]
    UnknownSubscription(String),

    /// The event implies a subscription state change that is not valid.
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    /// The ledger store failed.
    #[error("Ledger error: {0}")]
    Ledger(LedgerError),
}

impl WebhookError {
    /// Returns true if the provider should retry delivering the event.
    ///
    /// Retryable errors indicate temporary failures: storage conflicts
    /// that outlasted the internal retry budget, and references that may
    /// resolve through eventual consistency.
    pub fn is_retryable(&self) -> bool {
        match self {
            WebhookError::UnknownAccount(_) | WebhookError::UnknownSubscription(_) => true,
            WebhookError::Ledger(e) => {
                matches!(e, LedgerError::StorageConflict | LedgerError::Storage(_))
            }
            _ => false,
        }
    }

    /// Maps the error to the HTTP status the delivery endpoint returns.
    ///
    /// Status codes drive the provider's retry behaviour:
    /// - 2xx: acknowledged, no retry
    /// - 4xx: malformed, no retry
    /// - 5xx: transient, will retry
    pub fn status_code(&self) -> StatusCode {
        match self {
            // Malformed events are rejected permanently.
            WebhookError::InvalidPayload(_)
            | WebhookError::MissingField(_)
            | WebhookError::MissingMetadata(_) => StatusCode::BAD_REQUEST,

            // May succeed on redelivery.
            WebhookError::UnknownAccount(_)
            | WebhookError::UnknownSubscription(_)
            | WebhookError::InvalidTransition(_)
            | WebhookError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LedgerError> for WebhookError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UnknownAccount(id) => WebhookError::UnknownAccount(id),
            LedgerError::UnknownSubscription(id) => WebhookError::UnknownSubscription(id),
            LedgerError::InvalidEventPayload(reason) => WebhookError::InvalidPayload(reason),
            other => WebhookError::Ledger(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ══════════════════════════════════════════════════════════════
    // Retryability Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn unknown_references_are_retryable() {
        // Might be eventual consistency between services.
        assert!(WebhookError::UnknownAccount("user-1".into()).is_retryable());
        assert!(WebhookError::UnknownSubscription("sub_1".into()).is_retryable());
    }

    #[test]
    fn exhausted_storage_conflict_is_retryable() {
        let err = WebhookError::Ledger(LedgerError::StorageConflict);
        assert!(err.is_retryable());
    }

    #[test]
    fn malformed_payloads_are_not_retryable() {
        assert!(!WebhookError::InvalidPayload("bad".into()).is_retryable());
        assert!(!WebhookError::MissingField("payment").is_retryable());
        assert!(!WebhookError::MissingMetadata("user_id").is_retryable());
    }

    #[test]
    fn invalid_transition_is_not_retryable() {
        assert!(!WebhookError::InvalidTransition("bad".into()).is_retryable());
    }

    // ══════════════════════════════════════════════════════════════
    // Status Code Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn malformed_payloads_return_bad_request() {
        assert_eq!(
            WebhookError::InvalidPayload("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WebhookError::MissingField("payment").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WebhookError::MissingMetadata("user_id").status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn transient_failures_return_internal_error() {
        assert_eq!(
            WebhookError::UnknownAccount("user-1".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            WebhookError::Ledger(LedgerError::StorageConflict).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    // ══════════════════════════════════════════════════════════════
    // Conversion Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn ledger_unknown_account_converts_to_webhook_variant() {
        let err: WebhookError = LedgerError::UnknownAccount("user-1".into()).into();
        assert_eq!(err, WebhookError::UnknownAccount("user-1".into()));
    }

    #[test]
    fn ledger_invalid_payload_converts_to_webhook_variant() {
        let err: WebhookError = LedgerError::InvalidEventPayload("no plan_id".into()).into();
        assert_eq!(err, WebhookError::InvalidPayload("no plan_id".into()));
    }

    #[test]
    fn other_ledger_errors_are_wrapped() {
        let err: WebhookError = LedgerError::StorageConflict.into();
        assert_eq!(err, WebhookError::Ledger(LedgerError::StorageConflict));
    }
}
