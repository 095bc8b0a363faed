//! Clipdeck Billing - Entitlement and usage-ledger engine
//!
//! Reconciles prepaid credit balances, subscription-tier quotas, and
//! one-off feature unlocks against asynchronous payment-provider events,
//! while serving synchronous authorization checks from application code.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
