//! Subscription domain module.
//!
//! Handles subscription lifecycle, plan entitlement sets parsed from
//! provider metadata, and calendar-month billing periods.
//!
//! # Module Structure
//!
//! - `aggregate` - Subscription aggregate entity
//! - `status` - SubscriptionStatus state machine
//! - `plan` - PlanEntitlements, Quota sentinel, counter declarations
//! - `period` - BillingPeriod calendar-month window

mod aggregate;
mod period;
mod plan;
mod status;

pub use aggregate::Subscription;
pub use period::BillingPeriod;
pub use plan::{counters, CounterKind, CounterLimit, PlanEntitlements, Quota};
pub use status::SubscriptionStatus;
