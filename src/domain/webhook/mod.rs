//! Webhook domain module.
//!
//! Maps payment-provider events to ledger mutations, exactly once per
//! provider event identifier.
//!
//! # Module Structure
//!
//! - `event` - Wire types and validated metadata records
//! - `errors` - WebhookError with retryability and status mapping
//! - `reconciler` - The asynchronous decision point

mod errors;
mod event;
mod reconciler;

pub use errors::WebhookError;
pub use event::{
    CreditPackageMetadata, LineItem, PaymentEvent, PaymentEventData, PaymentEventKind,
    PaymentObject, PurchaseMetadata, SubscriptionMetadata, SubscriptionObject,
};
pub use reconciler::{ReconcileOutcome, WebhookReconciler};
