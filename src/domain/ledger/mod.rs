//! Ledger domain module.
//!
//! Consumable credit balances with a full audit trail. Every balance
//! change appends exactly one immutable transaction, so the balance is
//! always reconstructable as the sum of the account's transactions.
//!
//! # Module Structure
//!
//! - `account` - Account entity holding the current balance
//! - `transaction` - Append-only LedgerTransaction records
//! - `credit_ledger` - Atomic credit/debit operations
//! - `cost` - Pure cost policy for metered actions

mod account;
pub mod cost;
pub mod credit_ledger;
mod transaction;

pub use account::Account;
pub use cost::{ClipDuration, GenerationModel, VideoGenerationParams};
pub use transaction::{LedgerTransaction, TransactionKind};
