//! Expense facts consumed by the balance calculator
//!
//! An [`Expense`] is one payment split across participants. Splitting uses
//! floor division on minor units; the leftover (`remainder`) is reported
//! separately so the calculator can assign it by the largest-magnitude rule.

use crate::types::{Currency, MinorUnits, UserId};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One already-split obligation: `participant_id` owes `payer_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseSplit {
    /// Member who fronted the money
    pub payer_id: UserId,

    /// Member who owes a share
    pub participant_id: UserId,

    /// Share owed in minor units
    pub owed_amount: MinorUnits,

    /// Currency
    pub currency: Currency,
}

/// How an expense is divided between participants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SplitMethod {
    /// Equal shares
    Equal {
        /// Participants (may include the payer)
        participants: Vec<UserId>,
    },
    /// Explicit amounts that must add up to the expense amount
    Exact {
        /// Participant → amount
        shares: Vec<(UserId, MinorUnits)>,
    },
    /// Proportional to integer share counts
    Weighted {
        /// Participant → share count
        shares: Vec<(UserId, u32)>,
    },
}

/// Expense paid by one member on behalf of several
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    /// Expense ID (owned by the expense collaborator)
    pub expense_id: String,

    /// Member who paid
    pub payer_id: UserId,

    /// Total in minor units
    pub amount: MinorUnits,

    /// Currency
    pub currency: Currency,

    /// Split rule
    pub split: SplitMethod,
}

/// Floor shares of an expense plus the undivided remainder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitShares {
    /// Participant → floor share, ascending by participant
    pub shares: BTreeMap<UserId, MinorUnits>,

    /// Units left after floor division (0 ≤ remainder < participant count)
    pub remainder: MinorUnits,
}

impl Expense {
    /// Divide the expense into floor shares
    pub fn floor_shares(&self) -> Result<SplitShares> {
        if self.amount <= 0 {
            return Err(Error::InvalidExpense(format!(
                "expense {} amount must be positive",
                self.expense_id
            )));
        }

        let mut shares: BTreeMap<UserId, MinorUnits> = BTreeMap::new();

        match &self.split {
            SplitMethod::Equal { participants } => {
                if participants.is_empty() {
                    return Err(self.invalid("has no participants"));
                }
                let count = participants.len() as MinorUnits;
                let each = self.amount / count;
                for participant in participants {
                    let slot = shares.entry(participant.clone()).or_insert(0);
                    *slot = slot
                        .checked_add(each)
                        .ok_or_else(|| Error::Overflow("equal split".to_string()))?;
                }
            }
            SplitMethod::Exact { shares: exact } => {
                if exact.is_empty() {
                    return Err(self.invalid("has no participants"));
                }
                let mut total: MinorUnits = 0;
                for (participant, amount) in exact {
                    if *amount < 0 {
                        return Err(self.invalid("has a negative exact share"));
                    }
                    total = total
                        .checked_add(*amount)
                        .ok_or_else(|| Error::Overflow("exact split".to_string()))?;
                    *shares.entry(participant.clone()).or_insert(0) += amount;
                }
                if total != self.amount {
                    return Err(Error::InvalidExpense(format!(
                        "expense {} exact shares sum to {} but amount is {}",
                        self.expense_id, total, self.amount
                    )));
                }
            }
            SplitMethod::Weighted { shares: weighted } => {
                let total_weight: u64 = weighted.iter().map(|(_, w)| u64::from(*w)).sum();
                if total_weight == 0 {
                    return Err(self.invalid("has zero total weight"));
                }
                for (participant, weight) in weighted {
                    // Zero-weight participants owe nothing and never absorb the remainder
                    if *weight == 0 {
                        continue;
                    }
                    let share = i128::from(self.amount) * i128::from(*weight)
                        / i128::from(total_weight);
                    // share <= amount, so it always fits back into i64
                    *shares.entry(participant.clone()).or_insert(0) += share as MinorUnits;
                }
            }
        }

        let distributed: MinorUnits = shares.values().sum();
        Ok(SplitShares {
            shares,
            remainder: self.amount - distributed,
        })
    }

    fn invalid(&self, reason: &str) -> Error {
        Error::InvalidExpense(format!("expense {} {}", self.expense_id, reason))
    }
}

/// Ordered fact read from the ledger source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEntry {
    /// Whole expense, split by the calculator
    Expense(Expense),
    /// Pre-split obligation
    Split(ExpenseSplit),
}

impl LedgerEntry {
    /// Currency of the fact
    pub fn currency(&self) -> Currency {
        match self {
            LedgerEntry::Expense(expense) => expense.currency,
            LedgerEntry::Split(split) => split.currency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expense(amount: MinorUnits, split: SplitMethod) -> Expense {
        Expense {
            expense_id: "exp-1".to_string(),
            payer_id: UserId::new("alice"),
            amount,
            currency: Currency::USD,
            split,
        }
    }

    fn users(names: &[&str]) -> Vec<UserId> {
        names.iter().map(|n| UserId::new(*n)).collect()
    }

    #[test]
    fn test_equal_split_with_remainder() {
        let e = expense(
            1000,
            SplitMethod::Equal {
                participants: users(&["alice", "bob", "carol"]),
            },
        );

        let split = e.floor_shares().unwrap();
        assert_eq!(split.remainder, 1);
        assert!(split.shares.values().all(|s| *s == 333));
    }

    #[test]
    fn test_exact_split_must_match_amount() {
        let e = expense(
            1000,
            SplitMethod::Exact {
                shares: vec![(UserId::new("bob"), 600), (UserId::new("carol"), 300)],
            },
        );
        assert!(matches!(e.floor_shares(), Err(Error::InvalidExpense(_))));

        let e = expense(
            900,
            SplitMethod::Exact {
                shares: vec![(UserId::new("bob"), 600), (UserId::new("carol"), 300)],
            },
        );
        let split = e.floor_shares().unwrap();
        assert_eq!(split.remainder, 0);
        assert_eq!(split.shares[&UserId::new("bob")], 600);
    }

    #[test]
    fn test_weighted_split() {
        let e = expense(
            1000,
            SplitMethod::Weighted {
                shares: vec![(UserId::new("bob"), 2), (UserId::new("carol"), 1)],
            },
        );

        let split = e.floor_shares().unwrap();
        assert_eq!(split.shares[&UserId::new("bob")], 666);
        assert_eq!(split.shares[&UserId::new("carol")], 333);
        assert_eq!(split.remainder, 1);
    }

    #[test]
    fn test_rejects_empty_and_non_positive() {
        let e = expense(100, SplitMethod::Equal { participants: vec![] });
        assert!(e.floor_shares().is_err());

        let e = expense(
            0,
            SplitMethod::Equal {
                participants: users(&["bob"]),
            },
        );
        assert!(e.floor_shares().is_err());

        let e = expense(
            100,
            SplitMethod::Weighted {
                shares: vec![(UserId::new("bob"), 0)],
            },
        );
        assert!(e.floor_shares().is_err());
    }
}
