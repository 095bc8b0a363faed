//! One-off resource unlocks.
//!
//! A grant attaches a capability to one specific resource rather than
//! to the account. Immutable once granted; it never expires unless a
//! refund-class event explicitly revokes it.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{AccountId, Timestamp, TransactionId, VideoId};

/// Capability granted by a one-off purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    /// The video exports without a watermark, permanently.
    WatermarkRemoval,
}

impl GrantKind {
    /// Returns the storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantKind::WatermarkRemoval => "watermark_removal",
        }
    }

    /// Parses a storage or metadata representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "watermark_removal" => Some(GrantKind::WatermarkRemoval),
            _ => None,
        }
    }
}

/// A permanent grant tied to one owned resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGrant {
    /// The unlocked resource.
    pub resource_id: VideoId,

    /// Account that paid for the unlock.
    pub account_id: AccountId,

    /// What the grant unlocks.
    pub kind: GrantKind,

    /// Ledger entry anchoring the grant in the audit trail.
    pub origin_transaction: TransactionId,

    /// When the grant was made.
    pub granted_at: Timestamp,

    /// Set only by a refund-class revocation.
    pub revoked_at: Option<Timestamp>,
}

impl ResourceGrant {
    /// Creates an active grant.
    pub fn new(
        resource_id: VideoId,
        account_id: AccountId,
        kind: GrantKind,
        origin_transaction: TransactionId,
        now: Timestamp,
    ) -> Self {
        Self {
            resource_id,
            account_id,
            kind,
            origin_transaction,
            granted_at: now,
            revoked_at: None,
        }
    }

    /// Returns true if the grant has not been revoked.
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }

    /// Returns true if this grant unlocks the given resource.
    pub fn covers(&self, resource_id: &VideoId) -> bool {
        self.is_active() && &self.resource_id == resource_id
    }

    /// Revokes the grant (refund-class events only).
    pub fn revoke(&mut self, now: Timestamp) {
        if self.revoked_at.is_none() {
            self.revoked_at = Some(now);
        }
    }
}
