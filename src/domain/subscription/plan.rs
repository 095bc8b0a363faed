//! Plan entitlement sets parsed from provider metadata.
//!
//! Product-catalog facts reach this subsystem only through opaque event
//! metadata. They are parsed here into a validated, versioned record and
//! never propagated as untyped maps into the ledger core.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::domain::foundation::{LedgerError, Quality};

/// Counter names declared by plan entitlement sets.
pub mod counters {
    /// Exports consumed this billing period. Reset on renewal.
    pub const EXPORTS: &str = "exports";
    /// Total storage consumed, in GB. Never reset.
    pub const STORAGE_GB: &str = "storage_gb";
}

/// Supported entitlement metadata schema version.
pub const METADATA_SCHEMA_VERSION: u32 = 1;

/// A per-period cap, with `-1` in provider metadata meaning unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quota {
    /// Capped at the given value.
    Limited(u64),
    /// No cap; counters still increment for audit.
    Unlimited,
}

impl Quota {
    /// Returns true if `used + delta` stays within the cap.
    pub fn allows(&self, used: u64, delta: u64) -> bool {
        match self {
            Quota::Unlimited => true,
            Quota::Limited(limit) => used.saturating_add(delta) <= *limit,
        }
    }

    /// Returns true for the unlimited sentinel.
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Quota::Unlimited)
    }

    /// The numeric cap, if finite.
    pub fn limit(&self) -> Option<u64> {
        match self {
            Quota::Limited(limit) => Some(*limit),
            Quota::Unlimited => None,
        }
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quota::Limited(limit) => write!(f, "{}", limit),
            Quota::Unlimited => write!(f, "unlimited"),
        }
    }
}

impl Serialize for Quota {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Quota::Limited(limit) => serializer.serialize_i64(*limit as i64),
            Quota::Unlimited => serializer.serialize_i64(-1),
        }
    }
}

impl<'de> Deserialize<'de> for Quota {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        match raw {
            -1 => Ok(Quota::Unlimited),
            n if n >= 0 => Ok(Quota::Limited(n as u64)),
            n => Err(D::Error::custom(format!(
                "quota must be -1 (unlimited) or non-negative, got {}",
                n
            ))),
        }
    }
}

/// Whether renewal zeroes a counter or carries it forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    /// Zeroed on renewal (e.g. exports per month).
    Resettable,
    /// Carried forward unchanged on renewal (e.g. storage used).
    Cumulative,
}

/// Cap and reset behaviour for one named counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterLimit {
    pub quota: Quota,
    pub kind: CounterKind,
}

/// Structured limits granted by a subscription plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntitlements {
    /// Metadata schema version; newer versions are rejected at the boundary.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Exports allowed per billing month.
    pub exports_per_month: Quota,

    /// Longest clip the plan may export, in seconds.
    pub max_duration_seconds: u64,

    /// Highest rendition the plan may export.
    pub quality: Quality,

    /// Storage cap in GB.
    pub storage_gb: Quota,

    /// Feature flags granted by the plan.
    #[serde(default)]
    pub features: Vec<String>,

    /// Whether exports are watermark-free.
    #[serde(default)]
    pub watermark_free: bool,
}

fn default_schema_version() -> u32 {
    METADATA_SCHEMA_VERSION
}

impl PlanEntitlements {
    /// Parses an entitlement set out of raw provider metadata.
    ///
    /// Fails fast with `InvalidEventPayload` on missing or malformed
    /// fields and on schema versions newer than this build understands.
    pub fn from_metadata(value: &serde_json::Value) -> Result<Self, LedgerError> {
        let parsed: Self = serde_json::from_value(value.clone())
            .map_err(|e| LedgerError::InvalidEventPayload(format!("plan entitlements: {}", e)))?;
        if parsed.schema_version > METADATA_SCHEMA_VERSION {
            return Err(LedgerError::InvalidEventPayload(format!(
                "unsupported entitlement schema version {}",
                parsed.schema_version
            )));
        }
        Ok(parsed)
    }

    /// Looks up the cap and reset behaviour of a named counter.
    ///
    /// Returns `None` for counters the plan does not declare.
    pub fn counter_limit(&self, name: &str) -> Option<CounterLimit> {
        match name {
            counters::EXPORTS => Some(CounterLimit {
                quota: self.exports_per_month,
                kind: CounterKind::Resettable,
            }),
            counters::STORAGE_GB => Some(CounterLimit {
                quota: self.storage_gb,
                kind: CounterKind::Cumulative,
            }),
            _ => None,
        }
    }

    /// Checks whether the plan grants a feature flag.
    pub fn has_feature(&self, name: &str) -> bool {
        self.features.iter().any(|f| f == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn creator_metadata() -> serde_json::Value {
        json!({
            "exports_per_month": 50,
            "max_duration_seconds": 300,
            "quality": "4K",
            "storage_gb": 50,
            "features": ["advanced_editor", "stock_music", "custom_branding"],
            "watermark_free": true
        })
    }

    // ══════════════════════════════════════════════════════════════
    // Quota Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn quota_minus_one_deserializes_as_unlimited() {
        let quota: Quota = serde_json::from_str("-1").unwrap();
        assert_eq!(quota, Quota::Unlimited);
    }

    #[test]
    fn quota_non_negative_deserializes_as_limited() {
        let quota: Quota = serde_json::from_str("10").unwrap();
        assert_eq!(quota, Quota::Limited(10));
    }

    #[test]
    fn quota_rejects_other_negative_values() {
        let result: Result<Quota, _> = serde_json::from_str("-2");
        assert!(result.is_err());
    }

    #[test]
    fn quota_serializes_unlimited_as_minus_one() {
        assert_eq!(serde_json::to_string(&Quota::Unlimited).unwrap(), "-1");
        assert_eq!(serde_json::to_string(&Quota::Limited(50)).unwrap(), "50");
    }

    #[test]
    fn limited_quota_allows_up_to_the_cap() {
        let quota = Quota::Limited(10);
        assert!(quota.allows(9, 1));
        assert!(quota.allows(0, 10));
        assert!(!quota.allows(10, 1));
        assert!(!quota.allows(5, 6));
    }

    #[test]
    fn unlimited_quota_always_allows() {
        assert!(Quota::Unlimited.allows(1_000_000, 1_000_000));
    }

    #[test]
    fn quota_displays_for_user_messages() {
        assert_eq!(format!("{}", Quota::Limited(10)), "10");
        assert_eq!(format!("{}", Quota::Unlimited), "unlimited");
    }

    // ══════════════════════════════════════════════════════════════
    // PlanEntitlements Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn from_metadata_parses_a_full_entitlement_set() {
        let plan = PlanEntitlements::from_metadata(&creator_metadata()).unwrap();

        assert_eq!(plan.exports_per_month, Quota::Limited(50));
        assert_eq!(plan.max_duration_seconds, 300);
        assert_eq!(plan.quality, Quality::Q4k);
        assert_eq!(plan.storage_gb, Quota::Limited(50));
        assert!(plan.watermark_free);
        assert_eq!(plan.schema_version, METADATA_SCHEMA_VERSION);
    }

    #[test]
    fn from_metadata_parses_unlimited_sentinel() {
        let plan = PlanEntitlements::from_metadata(&json!({
            "exports_per_month": -1,
            "max_duration_seconds": 600,
            "quality": "4K",
            "storage_gb": 200
        }))
        .unwrap();

        assert!(plan.exports_per_month.is_unlimited());
        assert!(!plan.watermark_free);
        assert!(plan.features.is_empty());
    }

    #[test]
    fn from_metadata_rejects_missing_fields() {
        let result = PlanEntitlements::from_metadata(&json!({ "quality": "4K" }));
        assert!(matches!(result, Err(LedgerError::InvalidEventPayload(_))));
    }

    #[test]
    fn from_metadata_rejects_newer_schema_versions() {
        let mut metadata = creator_metadata();
        metadata["schema_version"] = json!(99);

        let result = PlanEntitlements::from_metadata(&metadata);
        assert!(matches!(result, Err(LedgerError::InvalidEventPayload(_))));
    }

    #[test]
    fn counter_limit_declares_exports_as_resettable() {
        let plan = PlanEntitlements::from_metadata(&creator_metadata()).unwrap();
        let limit = plan.counter_limit(counters::EXPORTS).unwrap();

        assert_eq!(limit.quota, Quota::Limited(50));
        assert_eq!(limit.kind, CounterKind::Resettable);
    }

    #[test]
    fn counter_limit_declares_storage_as_cumulative() {
        let plan = PlanEntitlements::from_metadata(&creator_metadata()).unwrap();
        let limit = plan.counter_limit(counters::STORAGE_GB).unwrap();

        assert_eq!(limit.kind, CounterKind::Cumulative);
    }

    #[test]
    fn counter_limit_returns_none_for_undeclared_counters() {
        let plan = PlanEntitlements::from_metadata(&creator_metadata()).unwrap();
        assert!(plan.counter_limit("api_calls").is_none());
    }

    #[test]
    fn has_feature_matches_exact_flags() {
        let plan = PlanEntitlements::from_metadata(&creator_metadata()).unwrap();
        assert!(plan.has_feature("custom_branding"));
        assert!(!plan.has_feature("priority_support"));
    }
}
