//! Settlement algorithms
//!
//! Every strategy turns a zero-summed [`Balances`] map into an ordered list of
//! payments that, applied in order, brings every balance to zero.
//!
//! # Contract
//!
//! - payer ≠ receiver and amount > 0 for every transaction
//! - each amount ≤ min(|payer balance|, receiver balance) at that step
//! - at most n − 1 transactions for n non-zero balances
//! - deterministic: ties are broken by ascending user id
//!
//! # Variants
//!
//! | kind | selection |
//! |---|---|
//! | `MinCashFlow` | largest debtor ↔ largest creditor, linear scan |
//! | `Greedy` | same rule, two max-heaps |
//! | `FriendPreference` | friend pairs above a threshold first, then `Greedy` |
//!
//! None of them solves the minimum-transaction problem exactly (it is NP-hard);
//! they are fast approximations.

use crate::{Error, Result};
use ledger_core::{Balances, Currency, FriendWeight, MinorUnits, SettlementSuggestion, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub mod friend_preference;
pub mod greedy;
pub mod min_cash_flow;

pub use friend_preference::FriendPreference;
pub use greedy::Greedy;
pub use min_cash_flow::MinCashFlow;

/// Algorithm selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    /// Largest debtor pays largest creditor
    MinCashFlow,
    /// Heap-based form of `MinCashFlow`
    Greedy,
    /// Friends settle with each other first
    FriendPreference,
}

impl AlgorithmKind {
    /// All variants, in comparison order
    pub const ALL: [AlgorithmKind; 3] = [
        AlgorithmKind::MinCashFlow,
        AlgorithmKind::Greedy,
        AlgorithmKind::FriendPreference,
    ];

    /// Stable name used in logs, metrics and config
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::MinCashFlow => "min_cash_flow",
            AlgorithmKind::Greedy => "greedy",
            AlgorithmKind::FriendPreference => "friend_preference",
        }
    }

    /// Strategy implementing this kind
    pub fn strategy(&self) -> Box<dyn SettlementStrategy> {
        match self {
            AlgorithmKind::MinCashFlow => Box::new(MinCashFlow),
            AlgorithmKind::Greedy => Box::new(Greedy),
            AlgorithmKind::FriendPreference => Box::new(FriendPreference),
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlgorithmKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "min_cash_flow" | "mincashflow" => Ok(AlgorithmKind::MinCashFlow),
            "greedy" => Ok(AlgorithmKind::Greedy),
            "friend_preference" | "friendpreference" => Ok(AlgorithmKind::FriendPreference),
            other => Err(Error::Config(format!("unknown algorithm: {}", other))),
        }
    }
}

/// Inputs besides the balances
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyOptions {
    /// Affinities between members (only `FriendPreference` reads them)
    pub friend_weights: Vec<FriendWeight>,

    /// Pairs need a weight strictly above this to be matched first
    pub friend_threshold: f64,
}

/// Settlement strategy capability
pub trait SettlementStrategy: Send + Sync {
    /// Which variant this is
    fn kind(&self) -> AlgorithmKind;

    /// Produce transactions that zero `balances`
    fn settle(
        &self,
        balances: &Balances,
        options: &StrategyOptions,
    ) -> Result<Vec<SettlementSuggestion>>;
}

/// Remaining balances and emitted transactions of one run
///
/// Shared by all strategies: validates every step, removes members as soon as
/// they reach zero, and enforces the iteration bound.
#[derive(Debug)]
pub struct WorkingSet {
    algorithm: AlgorithmKind,
    currency: Currency,
    remaining: BTreeMap<UserId, MinorUnits>,
    transactions: Vec<SettlementSuggestion>,
    bound: usize,
}

impl WorkingSet {
    /// Start a run over `balances`
    ///
    /// Fails with `UnbalancedLedger` when the balances do not sum to zero,
    /// which includes the single non-zero balance case.
    pub fn new(algorithm: AlgorithmKind, balances: &Balances) -> Result<Self> {
        balances.verify_zero_sum()?;

        let remaining: BTreeMap<UserId, MinorUnits> = balances
            .non_zero()
            .map(|(user, amount)| (user.clone(), amount))
            .collect();
        let bound = remaining.len();

        Ok(Self {
            algorithm,
            currency: balances.currency(),
            remaining,
            transactions: Vec::with_capacity(bound.saturating_sub(1)),
            bound,
        })
    }

    /// Non-zero balances, ascending by user id
    pub fn remaining(&self) -> &BTreeMap<UserId, MinorUnits> {
        &self.remaining
    }

    /// Balance of a member (zero once settled)
    pub fn balance(&self, user: &UserId) -> MinorUnits {
        self.remaining.get(user).copied().unwrap_or(0)
    }

    /// Check if every balance is zero
    pub fn is_settled(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Transactions emitted so far
    pub fn transactions(&self) -> &[SettlementSuggestion] {
        &self.transactions
    }

    /// Settle `min(|debtor|, creditor)` from `debtor` to `creditor`
    pub fn settle(&mut self, debtor: &UserId, creditor: &UserId) -> Result<MinorUnits> {
        if self.transactions.len() >= self.bound {
            return Err(Error::ComputationTimeout {
                algorithm: self.algorithm,
                bound: self.bound,
            });
        }

        let owed = self.balance(debtor);
        let due = self.balance(creditor);
        if debtor == creditor || owed >= 0 || due <= 0 {
            return Err(Error::Other(format!(
                "{} selected an invalid pair {} -> {}",
                self.algorithm, debtor, creditor
            )));
        }

        let amount = owed.checked_neg().map_or(due, |debt| debt.min(due));
        self.credit(debtor, amount);
        self.credit(creditor, -amount);

        self.transactions.push(SettlementSuggestion {
            payer_id: debtor.clone(),
            receiver_id: creditor.clone(),
            amount,
            currency: self.currency,
        });

        Ok(amount)
    }

    /// Finish the run
    pub fn finish(self) -> Result<Vec<SettlementSuggestion>> {
        if !self.is_settled() {
            return Err(Error::Other(format!(
                "{} left {} balances unsettled",
                self.algorithm,
                self.remaining.len()
            )));
        }
        Ok(self.transactions)
    }

    fn credit(&mut self, user: &UserId, delta: MinorUnits) {
        let zeroed = match self.remaining.get_mut(user) {
            Some(balance) => {
                *balance += delta;
                *balance == 0
            }
            None => false,
        };
        if zeroed {
            self.remaining.remove(user);
        }
    }
}

/// Apply `transactions` to `balances` in order, failing on any contract breach
///
/// Used by the comparator and the tests to check a strategy's output.
pub fn replay(balances: &Balances, transactions: &[SettlementSuggestion]) -> Result<Balances> {
    let mut working = balances.clone();
    for tx in transactions {
        let owed = working.get(&tx.payer_id);
        let due = working.get(&tx.receiver_id);
        if tx.payer_id == tx.receiver_id
            || tx.amount <= 0
            || tx.amount.unsigned_abs() > owed.min(0).unsigned_abs()
            || tx.amount > due.max(0)
        {
            return Err(Error::Other(format!("transaction breaks contract: {}", tx)));
        }
        working.apply(tx)?;
    }
    Ok(working)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balances(entries: &[(&str, MinorUnits)]) -> Balances {
        Balances::from_entries(
            Currency::USD,
            entries.iter().map(|(u, a)| (UserId::new(*u), *a)),
        )
        .unwrap()
    }

    #[test]
    fn test_kind_round_trip_names() {
        for kind in AlgorithmKind::ALL {
            assert_eq!(kind.as_str().parse::<AlgorithmKind>().unwrap(), kind);
            assert_eq!(kind.strategy().kind(), kind);
        }
        assert_eq!(
            "Min-Cash-Flow".parse::<AlgorithmKind>().unwrap(),
            AlgorithmKind::MinCashFlow
        );
        assert!("simplex".parse::<AlgorithmKind>().is_err());
    }

    #[test]
    fn test_working_set_rejects_single_balance() {
        let result = WorkingSet::new(AlgorithmKind::Greedy, &balances(&[("a", 10)]));
        assert!(matches!(
            result,
            Err(Error::Ledger(ledger_core::Error::UnbalancedLedger { .. }))
        ));
    }

    #[test]
    fn test_working_set_settle_and_finish() {
        let mut set =
            WorkingSet::new(AlgorithmKind::Greedy, &balances(&[("a", -10), ("b", 10)])).unwrap();

        assert_eq!(set.settle(&UserId::new("a"), &UserId::new("b")).unwrap(), 10);
        assert!(set.is_settled());

        let txs = set.finish().unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].amount, 10);
    }

    #[test]
    fn test_working_set_rejects_wrong_direction() {
        let mut set =
            WorkingSet::new(AlgorithmKind::Greedy, &balances(&[("a", -10), ("b", 10)])).unwrap();

        assert!(set.settle(&UserId::new("b"), &UserId::new("a")).is_err());
        assert!(set.settle(&UserId::new("a"), &UserId::new("a")).is_err());
    }

    #[test]
    fn test_working_set_iteration_bound() {
        let mut set = WorkingSet::new(
            AlgorithmKind::MinCashFlow,
            &balances(&[("a", -10), ("b", 10)]),
        )
        .unwrap();
        // Force the bound to be hit on the first step
        set.bound = 0;

        let err = set.settle(&UserId::new("a"), &UserId::new("b")).unwrap_err();
        assert!(matches!(
            err,
            Error::ComputationTimeout {
                algorithm: AlgorithmKind::MinCashFlow,
                bound: 0
            }
        ));
    }

    #[test]
    fn test_working_set_rejects_wrapping_sum() {
        let start = balances(&[("a", MinorUnits::MAX), ("b", MinorUnits::MAX), ("c", 2)]);

        let result = WorkingSet::new(AlgorithmKind::MinCashFlow, &start);

        assert!(matches!(
            result,
            Err(Error::Ledger(ledger_core::Error::UnbalancedLedger { .. }))
        ));
    }

    #[test]
    fn test_working_set_extreme_balances() {
        let start = balances(&[("a", -MinorUnits::MAX), ("b", MinorUnits::MAX - 1), ("c", 1)]);
        let mut set = WorkingSet::new(AlgorithmKind::Greedy, &start).unwrap();

        assert_eq!(
            set.settle(&UserId::new("a"), &UserId::new("b")).unwrap(),
            MinorUnits::MAX - 1
        );
        assert_eq!(set.settle(&UserId::new("a"), &UserId::new("c")).unwrap(), 1);
        assert!(set.finish().is_ok());
    }

    #[test]
    fn test_replay_detects_overpayment() {
        let start = balances(&[("a", -10), ("b", 10)]);
        let tx = SettlementSuggestion {
            payer_id: UserId::new("a"),
            receiver_id: UserId::new("b"),
            amount: 11,
            currency: Currency::USD,
        };

        assert!(replay(&start, &[tx]).is_err());
    }
}
