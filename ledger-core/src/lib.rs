//! Tally Ledger Core
//!
//! Domain types and balance netting for the group-expense ledger.
//!
//! # Architecture
//!
//! - **Minor units**: all money is `i64` minor units, never floating point
//! - **Per-currency netting**: currencies are never combined
//! - **Ports**: the ledger feed ([`LedgerSource`]) and settlement persistence
//!   ([`SettlementStore`]) are traits with in-memory implementations
//!
//! # Invariants
//!
//! - Zero sum: Σ balances == 0 for every (group, currency)
//! - Deterministic: same ordered facts → same balances
//! - Only completed settlements affect balances

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod expense;
pub mod balance;
pub mod record;
pub mod storage;
pub mod ledger;
pub mod error;

// Re-exports
pub use error::{Error, Result};
pub use types::{
    Currency, FriendWeight, GroupId, MinorUnits, SettlementId, SettlementSuggestion, UserId,
};
pub use expense::{Expense, ExpenseSplit, LedgerEntry, SplitMethod};
pub use balance::{BalanceCalculator, Balances};
pub use record::{CompletionMetadata, Settlement, SettlementStatus};
pub use storage::{CasOutcome, MemoryStore, SettlementStore};
pub use ledger::{LedgerSnapshot, LedgerSource, MemoryLedger};
