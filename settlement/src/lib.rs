//! Settlement Engine
//!
//! Turns a group's shared-expense ledger into a short list of payments that
//! clears every debt, and tracks those payments until they are confirmed.
//!
//! # Architecture
//!
//! 1. **Netting**: ledger facts + completed settlements → per-currency balances
//!    (`ledger_core::BalanceCalculator`)
//! 2. **Algorithms**: balances → ordered payment suggestions
//!    ([`algorithm`])
//! 3. **Caching**: single-flight memoization keyed by ledger fingerprint
//!    ([`cache`])
//! 4. **Lifecycle**: pending → completed | cancelled with compare-and-swap
//!    writes ([`lifecycle`])
//!
//! # Algorithms
//!
//! Largest-debtor/largest-creditor matching, the standard greedy
//! approximation of the minimum-transaction problem:
//! - At most n − 1 payments for n non-zero balances
//! - Deterministic tie-break by ascending user id
//! - Optional friend-first pre-matching
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{Currency, GroupId, MemoryLedger, MemoryStore};
//! use settlement::{Config, LoggingNotifier, SettlementEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> settlement::Result<()> {
//!     let ledger = Arc::new(MemoryLedger::new());
//!     let engine = SettlementEngine::new(
//!         Config::default(),
//!         ledger,
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(LoggingNotifier),
//!     )?;
//!     engine.start();
//!
//!     let set = engine
//!         .compute_suggestions(&GroupId::new("trip"), Currency::USD, None)
//!         .await?;
//!     for tx in &set.transactions {
//!         println!("{}", tx);
//!     }
//!
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod algorithm;
pub mod cache;
pub mod comparator;
pub mod lifecycle;
pub mod metrics;
pub mod error;
pub mod config;
pub mod engine;

// Re-exports
pub use error::{Error, Result, SUGGESTION_FAILURE_MESSAGE};
pub use config::{CacheConfig, Config, LifecycleConfig, SuggestionConfig};
pub use algorithm::{
    AlgorithmKind, FriendPreference, Greedy, MinCashFlow, SettlementStrategy, StrategyOptions,
};
pub use cache::{CacheKey, CacheStats, CachedSuggestions, LedgerFingerprint, SuggestionCache};
pub use comparator::{AlgorithmComparator, AlgorithmRun, ComparisonReport};
pub use lifecycle::{
    CompletionOutcome, LoggingNotifier, NewSettlement, PaymentNotifier, SettlementLifecycle,
};
pub use metrics::Metrics;
pub use engine::{SettlementEngine, SuggestionSet};
