//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! ## Ledger Ports
//!
//! - `LedgerStore` - Durable, transactional state of balances, usage
//!   counters, subscriptions, grants, and processed events
//! - `UnitOfWork` - A single atomic transaction against the store;
//!   the sole mutation boundary of the subsystem

mod ledger_store;

pub use ledger_store::{
    Admission, LedgerStore, ProcessedEvent, UnitOfWork, MAX_COMMIT_ATTEMPTS,
};
