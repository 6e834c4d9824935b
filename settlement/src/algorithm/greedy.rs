//! Heap-based greedy matching
//!
//! Same selection rule as [`MinCashFlow`](super::MinCashFlow), but the largest
//! debtor and creditor come from two max-heaps instead of a scan, giving
//! O(n log n) overall. Heap entries are ordered by (magnitude, reversed user
//! id) so equal magnitudes pop the lowest id first, which keeps the output
//! identical to `MinCashFlow` for every input.

use super::{AlgorithmKind, SettlementStrategy, StrategyOptions, WorkingSet};
use crate::Result;
use ledger_core::{Balances, SettlementSuggestion, UserId};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// (magnitude, reversed id); magnitudes are unsigned so `MinorUnits::MIN` fits
type Entry = (u64, Reverse<UserId>);

/// Two-heap largest-debtor/largest-creditor matching
#[derive(Debug, Default, Clone, Copy)]
pub struct Greedy;

impl Greedy {
    /// Drive whatever is left in `set` to zero
    pub(crate) fn run(set: &mut WorkingSet) -> Result<()> {
        let mut debtors: BinaryHeap<Entry> = BinaryHeap::new();
        let mut creditors: BinaryHeap<Entry> = BinaryHeap::new();

        for (user, amount) in set.remaining() {
            if *amount < 0 {
                debtors.push((amount.unsigned_abs(), Reverse(user.clone())));
            } else if *amount > 0 {
                creditors.push((amount.unsigned_abs(), Reverse(user.clone())));
            }
        }

        while let (Some((_, Reverse(debtor))), Some((_, Reverse(creditor)))) =
            (debtors.pop(), creditors.pop())
        {
            set.settle(&debtor, &creditor)?;

            let owed = set.balance(&debtor);
            if owed < 0 {
                debtors.push((owed.unsigned_abs(), Reverse(debtor)));
            }
            let due = set.balance(&creditor);
            if due > 0 {
                creditors.push((due.unsigned_abs(), Reverse(creditor)));
            }
        }

        Ok(())
    }
}

impl SettlementStrategy for Greedy {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Greedy
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
