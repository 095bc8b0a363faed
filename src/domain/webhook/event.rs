//! Payment-provider webhook event types.
//!
//! Defines the structures for parsing provider payloads. Only fields
//! relevant to reconciliation are captured; everything else in the
//! provider's full event schema is ignored.
//!
//! Product-catalog facts (credit amounts, plan limits, feature flags)
//! reach this subsystem exclusively through the `metadata` objects and
//! are trusted verbatim; catalog lookup happens outside this core.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::PaymentEventId;
use crate::domain::webhook::WebhookError;

/// A payment-provider webhook event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Provider-assigned event identifier (evt_xxx format).
    pub id: PaymentEventId,

    /// Event type string (e.g. "purchase.succeeded").
    #[serde(rename = "type")]
    pub event_type: String,

    /// Event-specific payload.
    pub data: PaymentEventData,
}

impl PaymentEvent {
    /// Parses the event type into a known variant.
    pub fn kind(&self) -> PaymentEventKind {
        PaymentEventKind::from_str(&self.event_type)
    }
}

/// Container for event-specific data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEventData {
    /// Present on purchase events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentObject>,

    /// Present on subscription events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<SubscriptionObject>,
}

/// The payment object carried by purchase events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentObject {
    /// Provider payment identifier.
    pub payment_id: String,

    /// Opaque metadata attached at checkout (user_id, purchase kind).
    #[serde(default)]
    pub metadata: serde_json::Value,

    /// Purchased products with their catalog metadata.
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

impl PaymentObject {
    /// Parses the checkout metadata into a validated record.
    pub fn purchase_metadata(&self) -> Result<PurchaseMetadata, WebhookError> {
        serde_json::from_value(self.metadata.clone())
            .map_err(|e| WebhookError::InvalidPayload(format!("payment metadata: {}", e)))
    }

    /// Parses the first line item's catalog metadata as a credit package.
    pub fn credit_package(&self) -> Result<CreditPackageMetadata, WebhookError> {
        let item = self
            .line_items
            .first()
            .ok_or(WebhookError::MissingField("line_items"))?;
        serde_json::from_value(item.metadata.clone())
            .map_err(|e| WebhookError::InvalidPayload(format!("credit package metadata: {}", e)))
    }
}

/// One purchased product within a payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    /// Product display name.
    #[serde(default)]
    pub name: Option<String>,

    /// Provider product identifier.
    #[serde(default)]
    pub product_id: Option<String>,

    /// Catalog metadata attached to the product.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// The subscription object carried by subscription events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionObject {
    /// Provider subscription identifier.
    pub subscription_id: String,

    /// Opaque metadata: user binding, plan id, and the plan's
    /// entitlement set.
    #[serde(default)]
    pub metadata: serde_json::Value,

    /// Provider-reported status, when present.
    #[serde(default)]
    pub status: Option<String>,
}

impl SubscriptionObject {
    /// Parses the user/plan binding out of the subscription metadata.
    pub fn subscription_metadata(&self) -> Result<SubscriptionMetadata, WebhookError> {
        serde_json::from_value(self.metadata.clone())
            .map_err(|e| WebhookError::InvalidPayload(format!("subscription metadata: {}", e)))
    }
}

/// Checkout metadata attached to a payment.
#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseMetadata {
    /// The purchasing user.
    pub user_id: String,

    /// Set to "credit_package" on credit purchases.
    #[serde(default)]
    pub purchase_type: Option<String>,

    /// Set to "watermark_removal" on one-off unlock purchases.
    #[serde(default, rename = "type")]
    pub unlock_type: Option<String>,

    /// The video targeted by an unlock purchase.
    #[serde(default)]
    pub video_id: Option<String>,
}

/// Catalog metadata of a credit-package product.
#[derive(Debug, Clone, Deserialize)]
pub struct CreditPackageMetadata {
    /// Base plus bonus credits; the amount actually granted.
    pub total_credits: u64,

    #[serde(default)]
    pub credits: Option<u64>,

    #[serde(default)]
    pub bonus_credits: Option<u64>,
}

/// User and plan binding carried on subscription metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionMetadata {
    pub user_id: String,
    pub plan_id: String,
}

/// Known payment event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEventKind {
    /// A one-time purchase settled (credits or a one-off unlock).
    PurchaseSucceeded,
    /// A subscription started (or restarted after cancellation).
    SubscriptionActivated,
    /// A billing period renewed.
    SubscriptionRenewed,
    /// The plan changed mid-period.
    SubscriptionPlanChanged,
    /// A renewal payment failed.
    SubscriptionPastDue,
    /// The subscription ended.
    SubscriptionCancelled,
    /// Unknown or unhandled event type.
    Unknown,
}

impl PaymentEventKind {
    /// Parses a provider event type string.
    pub fn from_str(s: &str) -> Self {
        match s {
            "purchase.succeeded" => Self::PurchaseSucceeded,
            "subscription.activated" => Self::SubscriptionActivated,
            "subscription.renewed" => Self::SubscriptionRenewed,
            "subscription.plan_changed" => Self::SubscriptionPlanChanged,
            "subscription.past_due" => Self::SubscriptionPastDue,
            "subscription.cancelled" => Self::SubscriptionCancelled,
            _ => Self::Unknown,
        }
    }

    /// Returns the provider event type string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PurchaseSucceeded => "purchase.succeeded",
            Self::SubscriptionActivated => "subscription.activated",
            Self::SubscriptionRenewed => "subscription.renewed",
            Self::SubscriptionPlanChanged => "subscription.plan_changed",
            Self::SubscriptionPastDue => "subscription.past_due",
            Self::SubscriptionCancelled => "subscription.cancelled",
            Self::Unknown => "unknown",
        }
    }
}
