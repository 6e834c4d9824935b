//! Error types for the ledger

use crate::types::{Currency, GroupId, SettlementId};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Currency code is not a three-letter uppercase ISO 4217 code
    #[error("Invalid currency code: {0:?}")]
    InvalidCurrency(String),

    /// Facts of different currencies were netted together
    #[error("Currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch {
        /// Currency being netted
        expected: Currency,
        /// Currency of the offending fact
        found: Currency,
    },

    /// Netted balances do not sum to zero
    #[error("Unbalanced ledger for {currency}: balances sum to {residual}")]
    UnbalancedLedger {
        /// Currency of the balance map
        currency: Currency,
        /// Σ of all balances (should be zero), widened so it cannot wrap
        residual: i128,
    },

    /// Expense cannot be split as described
    #[error("Invalid expense: {0}")]
    InvalidExpense(String),

    /// Arithmetic overflow on minor units
    #[error("Overflow in {0}")]
    Overflow(String),

    /// Settlement id already stored
    #[error("Settlement already exists: {0}")]
    DuplicateSettlement(SettlementId),

    /// Group unknown to the ledger source
    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    /// Persistence backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
