//! Error types for settlement engine

use crate::algorithm::AlgorithmKind;
use ledger_core::{SettlementId, SettlementStatus};
use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Generic message shown to end users for any computation failure
pub const SUGGESTION_FAILURE_MESSAGE: &str = "unable to compute settlement suggestions";

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error (netting, currency, persistence)
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Rejected settlement request
    #[error("Invalid settlement: {0}")]
    InvalidSettlement(String),

    /// Unknown settlement id
    #[error("Settlement not found: {0}")]
    SettlementNotFound(SettlementId),

    /// Transition attempted from a terminal state
    #[error("Invalid transition for settlement {id}: {from} -> {to}")]
    InvalidTransition {
        /// Settlement ID
        id: SettlementId,
        /// Status found in the store
        from: SettlementStatus,
        /// Requested status
        to: SettlementStatus,
    },

    /// Compare-and-swap kept losing against concurrent writers
    #[error("Concurrent modification of settlement {id} after {attempts} attempts")]
    ConcurrentModification {
        /// Settlement ID
        id: SettlementId,
        /// Attempts made
        attempts: u32,
    },

    /// Algorithm exceeded its iteration bound
    #[error("{algorithm} exceeded iteration bound {bound}")]
    ComputationTimeout {
        /// Algorithm that gave up
        algorithm: AlgorithmKind,
        /// Iteration bound (number of non-zero balances)
        bound: usize,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if retrying the same call can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ConcurrentModification { .. })
    }

    /// Check if the error reflects corrupt upstream data
    pub fn is_unbalanced_ledger(&self) -> bool {
        matches!(
            self,
            Error::Ledger(ledger_core::Error::UnbalancedLedger { .. })
        )
    }

    /// Message safe to show to end users; never includes balance data
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::InvalidSettlement(_) => "the settlement request is invalid",
            Error::SettlementNotFound(_) => "settlement not found",
            Error::InvalidTransition { .. } => "the settlement can no longer be changed",
            Error::ConcurrentModification { .. } => {
                "the settlement was modified concurrently, please retry"
            }
            Error::Ledger(ledger_core::Error::InvalidCurrency(_)) => "unsupported currency",
            Error::Ledger(ledger_core::Error::GroupNotFound(_)) => "group not found",
            _ => SUGGESTION_FAILURE_MESSAGE,
        }
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Metrics(err.to_string())
    }
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
