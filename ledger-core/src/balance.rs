//! Balance netting
//!
//! Turns ordered ledger facts and completed settlements into a zero-summed
//! balance map per currency.
//!
//! # Sign convention
//!
//! ```text
//! positive  → the member is owed money (creditor)
//! negative  → the member owes money (debtor)
//! ```
//!
//! # Invariants
//!
//! - Σ balances == 0 for every (group, currency)
//! - Integer minor units only, overflow is an error
//! - Currencies are never combined

use crate::expense::{Expense, ExpenseSplit, LedgerEntry};
use crate::record::Settlement;
use crate::types::{Currency, MinorUnits, SettlementSuggestion, UserId};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Net balances of one group in one currency
///
/// Entries are kept in a `BTreeMap` so iteration is ascending by user id,
/// which the settlement algorithms rely on for deterministic tie-breaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    currency: Currency,
    entries: BTreeMap<UserId, MinorUnits>,
}

impl Balances {
    /// Empty balance map
    pub fn new(currency: Currency) -> Self {
        Self {
            currency,
            entries: BTreeMap::new(),
        }
    }

    /// Build from (user, amount) pairs; repeated users are summed
    pub fn from_entries<I>(currency: Currency, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (UserId, MinorUnits)>,
    {
        let mut balances = Self::new(currency);
        for (user, amount) in entries {
            balances.adjust(&user, amount)?;
        }
        Ok(balances)
    }

    /// Currency of the map
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Balance of one member (zero when absent)
    pub fn get(&self, user: &UserId) -> MinorUnits {
        self.entries.get(user).copied().unwrap_or(0)
    }

    /// Add `delta` to a member's balance
    pub fn adjust(&mut self, user: &UserId, delta: MinorUnits) -> Result<()> {
        let slot = self.entries.entry(user.clone()).or_insert(0);
        *slot = slot
            .checked_add(delta)
            .ok_or_else(|| Error::Overflow(format!("balance of {}", user)))?;
        Ok(())
    }

    /// All entries, ascending by user id
    pub fn iter(&self) -> impl Iterator<Item = (&UserId, MinorUnits)> {
        self.entries.iter().map(|(user, amount)| (user, *amount))
    }

    /// Entries with a non-zero balance, ascending by user id
    pub fn non_zero(&self) -> impl Iterator<Item = (&UserId, MinorUnits)> {
        self.iter().filter(|(_, amount)| *amount != 0)
    }

    /// Number of members with a non-zero balance
    pub fn non_zero_count(&self) -> usize {
        self.non_zero().count()
    }

    /// Number of members tracked
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no member is tracked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check if every balance is zero
    pub fn is_settled(&self) -> bool {
        self.entries.values().all(|amount| *amount == 0)
    }

    /// Σ of all balances (zero for a consistent ledger)
    ///
    /// Summed in `i128` so no combination of `i64` balances can wrap to zero.
    pub fn residual(&self) -> i128 {
        self.entries.values().map(|amount| i128::from(*amount)).sum()
    }

    /// Σ of positive balances: the amount any complete settlement must move
    ///
    /// Fails with `Overflow` when the total does not fit in minor units.
    pub fn total_owed(&self) -> Result<MinorUnits> {
        let total: i128 = self
            .entries
            .values()
            .filter(|amount| **amount > 0)
            .map(|amount| i128::from(*amount))
            .sum();
        MinorUnits::try_from(total)
            .map_err(|_| Error::Overflow(format!("total owed in {}", self.currency)))
    }

    /// Verify the zero-sum invariant
    ///
    /// Also rejects maps whose total owed exceeds `MinorUnits::MAX`. A map that
    /// passes holds no `MinorUnits::MIN` entry, and every partial sum of
    /// settled amounts fits in minor units.
    pub fn verify_zero_sum(&self) -> Result<()> {
        let residual = self.residual();
        if residual != 0 {
            return Err(Error::UnbalancedLedger {
                currency: self.currency,
                residual,
            });
        }
        self.total_owed().map(|_| ())
    }

    /// Apply a suggested payment: the payer's debt shrinks, the receiver's credit shrinks
    pub fn apply(&mut self, suggestion: &SettlementSuggestion) -> Result<()> {
        if suggestion.currency != self.currency {
            return Err(Error::CurrencyMismatch {
                expected: self.currency,
                found: suggestion.currency,
            });
        }
        self.adjust(&suggestion.payer_id, suggestion.amount)?;
        self.adjust(&suggestion.receiver_id, -suggestion.amount)
    }

    /// Drop members whose balance is zero
    pub fn compact(&mut self) {
        self.entries.retain(|_, amount| *amount != 0);
    }
}

/// Computes balances from ledger facts
#[derive(Debug, Default, Clone, Copy)]
pub struct BalanceCalculator;

impl BalanceCalculator {
    /// Create new calculator
    pub fn new() -> Self {
        Self
    }

    /// Net facts of a single currency
    ///
    /// Every fact must be in `currency`; anything else is a `CurrencyMismatch`.
    /// Only completed settlements are netted.
    pub fn calculate(
        &self,
        currency: Currency,
        entries: &[LedgerEntry],
        settlements: &[Settlement],
    ) -> Result<Balances> {
        let mut balances = Balances::new(currency);

        for entry in entries {
            if entry.currency() != currency {
                return Err(Error::CurrencyMismatch {
                    expected: currency,
                    found: entry.currency(),
                });
            }
            match entry {
                LedgerEntry::Expense(expense) => self.apply_expense(&mut balances, expense)?,
                LedgerEntry::Split(split) => self.apply_split(&mut balances, split)?,
            }
        }

        for settlement in settlements.iter().filter(|s| s.affects_balances()) {
            if settlement.currency != currency {
                return Err(Error::CurrencyMismatch {
                    expected: currency,
                    found: settlement.currency,
                });
            }
            balances.adjust(&settlement.payer_id, settlement.amount)?;
            balances.adjust(&settlement.receiver_id, -settlement.amount)?;
        }

        balances.verify_zero_sum()?;
        Ok(balances)
    }

    /// Net mixed-currency facts, one balance map per currency
    pub fn calculate_by_currency(
        &self,
        entries: &[LedgerEntry],
        settlements: &[Settlement],
    ) -> Result<BTreeMap<Currency, Balances>> {
        let mut entries_by_currency: BTreeMap<Currency, Vec<LedgerEntry>> = BTreeMap::new();
        for entry in entries {
            entries_by_currency
                .entry(entry.currency())
                .or_default()
                .push(entry.clone());
        }

        let mut settlements_by_currency: BTreeMap<Currency, Vec<Settlement>> = BTreeMap::new();
        for settlement in settlements.iter().filter(|s| s.affects_balances()) {
            settlements_by_currency
                .entry(settlement.currency)
                .or_default()
                .push(settlement.clone());
        }

        let mut currencies: Vec<Currency> = entries_by_currency.keys().copied().collect();
        currencies.extend(settlements_by_currency.keys().copied());
        currencies.sort();
        currencies.dedup();

        let mut result = BTreeMap::new();
        for currency in currencies {
            let balances = self.calculate(
                currency,
                entries_by_currency.get(&currency).map(Vec::as_slice).unwrap_or(&[]),
                settlements_by_currency.get(&currency).map(Vec::as_slice).unwrap_or(&[]),
            )?;
            result.insert(currency, balances);
        }

        Ok(result)
    }

    fn apply_split(&self, balances: &mut Balances, split: &ExpenseSplit) -> Result<()> {
        if split.owed_amount < 0 {
            return Err(Error::InvalidExpense(format!(
                "negative share owed by {}",
                split.participant_id
            )));
        }
        if split.payer_id == split.participant_id {
            // Paying one's own share nets to zero
            return Ok(());
        }
        balances.adjust(&split.payer_id, split.owed_amount)?;
        balances.adjust(&split.participant_id, -split.owed_amount)
    }

    fn apply_expense(&self, balances: &mut Balances, expense: &Expense) -> Result<()> {
        let split = expense.floor_shares()?;

        balances.adjust(&expense.payer_id, expense.amount)?;
        for (participant, share) in &split.shares {
            balances.adjust(participant, -share)?;
        }

        if split.remainder != 0 {
            // Largest |balance| among this expense's participants absorbs the
            // remainder; BTreeMap order makes the lowest user id win ties.
            let mut absorber: Option<(&UserId, u64)> = None;
            for participant in split.shares.keys() {
                let magnitude = balances.get(participant).unsigned_abs();
                if absorber.map_or(true, |(_, best)| magnitude > best) {
                    absorber = Some((participant, magnitude));
                }
            }
            if let Some((participant, _)) = absorber {
                tracing::debug!(
                    expense_id = %expense.expense_id,
                    participant = %participant,
                    remainder = split.remainder,
                    "Assigning split remainder"
                );
                balances.adjust(participant, -split.remainder)?;
            }
        }

        Ok(())
    }
}
