//! Adapters - Implementations of the ports.
//!
//! - `memory` - In-memory LedgerStore with optimistic concurrency,
//!   used by tests and as the reference semantics for the port
//! - `postgres` - Production LedgerStore on PostgreSQL via sqlx

pub mod memory;
pub mod postgres;
