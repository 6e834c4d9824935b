//! Friend-first matching
//!
//! Pairs of members linked by a [`FriendWeight`] strictly above the threshold
//! settle with each other first, strongest link first. Whatever remains goes
//! through [`Greedy`]. Fewer payments between strangers may cost extra
//! transactions overall.
//!
//! # Ordering
//!
//! Weights descending, then the normalized (lower id, higher id) pair
//! ascending. Non-finite weights and self-links are ignored.

use super::{AlgorithmKind, Greedy, SettlementStrategy, StrategyOptions, WorkingSet};
use crate::Result;
use ledger_core::{Balances, FriendWeight, SettlementSuggestion};
use tracing::debug;

/// Friend-first matching followed by greedy
#[derive(Debug, Default, Clone, Copy)]
pub struct FriendPreference;

impl FriendPreference {
    /// Weights eligible for pre-matching, strongest first
    fn eligible<'a>(weights: &'a [FriendWeight], threshold: f64) -> Vec<&'a FriendWeight> {
        let mut eligible: Vec<&FriendWeight> = weights
            .iter()
            .filter(|w| w.weight.is_finite() && w.weight > threshold && w.user_a != w.user_b)
            .collect();

        eligible.sort_by(|x, y| {
            y.weight
                .total_cmp(&x.weight)
                .then_with(|| x.normalized_pair().cmp(&y.normalized_pair()))
        });
        eligible
    }

    fn run(set: &mut WorkingSet, options: &StrategyOptions) -> Result<()> {
        for link in Self::eligible(&options.friend_weights, options.friend_threshold) {
            let (a, b) = (&link.user_a, &link.user_b);
            let (balance_a, balance_b) = (set.balance(a), set.balance(b));

            let settled = if balance_a < 0 && balance_b > 0 {
                Some(set.settle(a, b)?)
            } else if balance_b < 0 && balance_a > 0 {
                Some(set.settle(b, a)?)
            } else {
                None
            };

            if let Some(amount) = settled {
                debug!("Friend pair {}/{} settled {}", a, b, amount);
            }
        }

        Greedy::run(set)
    }
}

impl SettlementStrategy for FriendPreference {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::FriendPreference
    }

    fn settle(
        &self,
        balances: &Balances,
        options: &StrategyOptions,
    ) -> Result<Vec<SettlementSuggestion>> {
        let mut set = WorkingSet::new(self.kind(), balances)?;
        Self::run(&mut set, options)?;
        set.finish()
    }
}
