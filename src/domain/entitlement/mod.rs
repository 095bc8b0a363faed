//! Entitlement domain module.
//!
//! Combines credit balance, quota state, and one-off unlocks into a
//! single authorization decision.
//!
//! # Module Structure
//!
//! - `action` - Gated actions and their parameters
//! - `decision` - Authorization decisions and consumption outcomes
//! - `grant` - One-off resource unlocks
//! - `resolver` - The synchronous decision point

mod action;
mod decision;
mod grant;
mod resolver;

pub use action::ActionRequest;
pub use decision::{ConsumptionOutcome, Decision};
pub use grant::{GrantKind, ResourceGrant};
pub use resolver::EntitlementResolver;
pub(crate) use resolver::{route, Route};
