//! Minimum cash flow
//!
//! Repeatedly settles the largest debtor against the largest creditor. Each
//! step zeroes at least one side, so n non-zero balances need at most n − 1
//! transactions.
//!
//! This is the classic greedy approximation. It does not guarantee the
//! minimum number of transactions: finding that is NP-hard (it reduces to
//! partitioning balances into the most zero-sum subsets).

use super::{AlgorithmKind, SettlementStrategy, StrategyOptions, WorkingSet};
use crate::Result;
use ledger_core::{Balances, SettlementSuggestion, UserId};
use std::cmp::Reverse;

/// Linear-scan largest-debtor/largest-creditor matching
#[derive(Debug, Default, Clone, Copy)]
pub struct MinCashFlow;

impl MinCashFlow {
    /// Drive `set` to zero
    ///
    /// Iterative; the loop is bounded by the working set's guard.
    pub(crate) fn run(set: &mut WorkingSet) -> Result<()> {
        while !set.is_settled() {
            let (debtor, creditor) = match Self::select(set) {
                Some(pair) => pair,
                None => break,
            };
            set.settle(&debtor, &creditor)?;
        }
        Ok(())
    }

    /// Largest debtor and largest creditor; ties go to the lowest user id
    fn select(set: &WorkingSet) -> Option<(UserId, UserId)> {
        let remaining = set.remaining();

        let debtor = remaining
            .iter()
            .filter(|(_, amount)| **amount < 0)
            .max_by_key(|(user, amount)| (amount.unsigned_abs(), Reverse(*user)))?;
        let creditor = remaining
            .iter()
            .filter(|(_, amount)| **amount > 0)
            .max_by_key(|(user, amount)| (**amount, Reverse(*user)))?;

        Some((debtor.0.clone(), creditor.0.clone()))
    }
}

impl SettlementStrategy for MinCashFlow {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::MinCashFlow
    }

    fn settle(
        &self,
        balances: &Balances,
        _options: &StrategyOptions,
    ) -> Result<Vec<SettlementSuggestion>> {
        let mut set = WorkingSet::new(self.kind(), balances)?;
        Self::run(&mut set)?;
        set.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::replay;
    use ledger_core::{Currency, MinorUnits};

    fn balances(entries: &[(&str, MinorUnits)]) -> Balances {
        Balances::from_entries(
            Currency::USD,
            entries.iter().map(|(u, a)| (UserId::new(*u), *a)),
        )
        .unwrap()
    }

    fn pairs(txs: &[SettlementSuggestion]) -> Vec<(&str, &str, MinorUnits)> {
        txs.iter()
            .map(|t| (t.payer_id.as_str(), t.receiver_id.as_str(), t.amount))
            .collect()
    }

    #[test]
    fn test_two_debtors_one_creditor() {
        let start = balances(&[("A", -30), ("B", -20), ("C", 50)]);

        let txs = MinCashFlow.settle(&start, &StrategyOptions::default()).unwrap();

        assert_eq!(pairs(&txs), vec![("A", "C", 30), ("B", "C", 20)]);
        assert!(replay(&start, &txs).unwrap().is_settled());
    }

    #[test]
    fn test_ties_broken_by_user_id() {
        let start = balances(&[("d2", -10), ("d1", -10), ("c2", 10), ("c1", 10)]);

        let txs = MinCashFlow.settle(&start, &StrategyOptions::default()).unwrap();

        assert_eq!(pairs(&txs), vec![("d1", "c1", 10), ("d2", "c2", 10)]);
    }

    #[test]
    fn test_partial_settlement_chain() {
        let start = balances(&[("a", -70), ("b", -30), ("c", 60), ("d", 40)]);

        let txs = MinCashFlow.settle(&start, &StrategyOptions::default()).unwrap();

        assert_eq!(
            pairs(&txs),
            vec![("a", "c", 60), ("b", "d", 30), ("a", "d", 10)]
        );
        assert!(txs.len() <= 3);
    }

    #[test]
    fn test_empty_and_all_zero() {
        let options = StrategyOptions::default();

        assert!(MinCashFlow
            .settle(&Balances::new(Currency::USD), &options)
            .unwrap()
            .is_empty());
        assert!(MinCashFlow
            .settle(&balances(&[("a", 0), ("b", 0)]), &options)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_unbalanced_input_rejected() {
        let err = MinCashFlow
            .settle(&balances(&[("a", -10), ("b", 9)]), &StrategyOptions::default())
            .unwrap_err();

        assert!(err.is_unbalanced_ledger());
    }
}
