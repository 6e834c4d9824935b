//! Side-by-side algorithm comparison
//!
//! Runs every [`AlgorithmKind`] over one balance snapshot and reports how many
//! transactions each produced, how much money each moved and how long each
//! took. Operational tooling only; the engine never picks an algorithm from
//! these numbers.

use crate::algorithm::{replay, AlgorithmKind, StrategyOptions};
use ledger_core::{Balances, Currency, MinorUnits};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// One algorithm's result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmRun {
    /// Algorithm
    pub algorithm: AlgorithmKind,

    /// Transactions produced
    pub transaction_count: usize,

    /// Σ transaction amounts
    pub amount_moved: MinorUnits,

    /// Wall-clock latency in microseconds
    pub latency_micros: u64,

    /// Failure message when the run did not complete
    pub error: Option<String>,
}

/// Comparison of all algorithms over one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    /// Snapshot currency
    pub currency: Currency,

    /// Members with a non-zero balance
    pub non_zero_balances: usize,

    /// Σ positive balances; every complete run moves exactly this much
    pub expected_amount: MinorUnits,

    /// Per-algorithm results, in `AlgorithmKind::ALL` order
    pub runs: Vec<AlgorithmRun>,

    /// True when every run succeeded, settled the snapshot and moved
    /// `expected_amount`
    pub consistent: bool,
}

impl ComparisonReport {
    /// Result of one algorithm
    pub fn run(&self, algorithm: AlgorithmKind) -> Option<&AlgorithmRun> {
        self.runs.iter().find(|run| run.algorithm == algorithm)
    }

    /// Successful run with the fewest transactions (first in order on ties)
    pub fn fewest_transactions(&self) -> Option<&AlgorithmRun> {
        self.runs
            .iter()
            .filter(|run| run.error.is_none())
            .min_by_key(|run| run.transaction_count)
    }
}

/// Runs all algorithms against a snapshot
#[derive(Debug, Clone, Default)]
pub struct AlgorithmComparator {
    options: StrategyOptions,
}

impl AlgorithmComparator {
    /// Create comparator; `options` are passed to every algorithm
    pub fn new(options: StrategyOptions) -> Self {
        Self { options }
    }

    /// Compare all algorithms
    pub fn compare(&self, balances: &Balances) -> ComparisonReport {
        let (expected_amount, mut consistent) = match balances.total_owed() {
            Ok(total) => (total, true),
            Err(e) => {
                warn!("Snapshot total is out of range: {}", e);
                (0, false)
            }
        };

        let runs: Vec<AlgorithmRun> = AlgorithmKind::ALL
            .iter()
            .map(|kind| {
                let run = self.run_one(*kind, balances);
                if run.error.is_some() || run.amount_moved != expected_amount {
                    warn!(
                        "{} inconsistent: moved {} of {} ({})",
                        kind,
                        run.amount_moved,
                        expected_amount,
                        run.error.as_deref().unwrap_or("no error")
                    );
                    consistent = false;
                }
                run
            })
            .collect();

        info!(
            "Compared {} algorithms over {} balances in {} (consistent: {})",
            runs.len(),
            balances.non_zero_count(),
            balances.currency(),
            consistent
        );

        ComparisonReport {
            currency: balances.currency(),
            non_zero_balances: balances.non_zero_count(),
            expected_amount,
            runs,
            consistent,
        }
    }

    fn run_one(&self, algorithm: AlgorithmKind, balances: &Balances) -> AlgorithmRun {
        let start = Instant::now();
        let result = algorithm.strategy().settle(balances, &self.options);
        let latency_micros = start.elapsed().as_micros() as u64;

        let outcome = result.and_then(|transactions| {
            let remaining = replay(balances, &transactions)?;
            if !remaining.is_settled() {
                return Err(crate::Error::Other(format!(
                    "{} left balances unsettled",
                    algorithm
                )));
            }
            let moved = transactions
                .iter()
                .try_fold(0 as MinorUnits, |acc, tx| acc.checked_add(tx.amount))
                .ok_or_else(|| {
                    ledger_core::Error::Overflow(format!("amount moved by {}", algorithm))
                })?;
            Ok((transactions.len(), moved))
        });

        match outcome {
            Ok((transaction_count, amount_moved)) => AlgorithmRun {
                algorithm,
                transaction_count,
                amount_moved,
                latency_micros,
                error: None,
            },
            Err(e) => AlgorithmRun {
                algorithm,
                transaction_count: 0,
                amount_moved: 0,
                latency_micros,
                error: Some(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{FriendWeight, UserId};

    fn balances(entries: &[(&str, MinorUnits)]) -> Balances {
        Balances::from_entries(
            Currency::USD,
            entries.iter().map(|(u, a)| (UserId::new(*u), *a)),
        )
        .unwrap()
    }

    #[test]
    fn test_all_algorithms_move_same_amount() {
        let snapshot = balances(&[("A", -30), ("B", -20), ("C", 50)]);

        let report = AlgorithmComparator::default().compare(&snapshot);

        assert!(report.consistent);
        assert_eq!(report.expected_amount, 50);
        assert_eq!(report.runs.len(), 3);
        for run in &report.runs {
            assert_eq!(run.amount_moved, 50);
            assert_eq!(run.transaction_count, 2);
            assert!(run.error.is_none());
        }
    }

    #[test]
    fn test_friend_preference_may_cost_transactions() {
        let snapshot = balances(&[("A", -30), ("B", -20), ("C", 30), ("D", 20)]);
        let comparator = AlgorithmComparator::new(StrategyOptions {
            friend_weights: vec![FriendWeight::new(UserId::new("A"), UserId::new("D"), 5.0)],
            friend_threshold: 1.0,
        });

        let report = comparator.compare(&snapshot);

        assert!(report.consistent);
        assert_eq!(
            report.run(AlgorithmKind::Greedy).unwrap().transaction_count,
            2
        );
        assert_eq!(
            report
                .run(AlgorithmKind::FriendPreference)
                .unwrap()
                .transaction_count,
            3
        );
        assert_eq!(
            report.fewest_transactions().unwrap().algorithm,
            AlgorithmKind::MinCashFlow
        );
    }

    #[test]
    fn test_failures_are_recorded() {
        let snapshot = balances(&[("A", -30), ("B", 20)]);

        let report = AlgorithmComparator::default().compare(&snapshot);

        assert!(!report.consistent);
        assert!(report.runs.iter().all(|run| run.error.is_some()));
        assert!(report.fewest_transactions().is_none());
    }

    #[test]
    fn test_out_of_range_snapshot_is_inconsistent() {
        let snapshot = balances(&[("a", MinorUnits::MIN), ("b", MinorUnits::MAX), ("c", 1)]);

        let report = AlgorithmComparator::default().compare(&snapshot);

        assert!(!report.consistent);
        assert_eq!(report.expected_amount, 0);
        assert!(report.runs.iter().all(|run| run.error.is_some()));
    }

    #[test]
    fn test_extreme_snapshot_is_consistent() {
        let snapshot = balances(&[
            ("a", -MinorUnits::MAX),
            ("b", MinorUnits::MAX - 1),
            ("c", 1),
        ]);

        let report = AlgorithmComparator::default().compare(&snapshot);

        assert!(report.consistent);
        assert_eq!(report.expected_amount, MinorUnits::MAX);
    }
}
