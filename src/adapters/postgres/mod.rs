//! PostgreSQL LedgerStore adapter.

mod store;

pub use store::PostgresLedgerStore;
