//! Ledger source
//!
//! Read-only view of the group-expense ledger: ordered expense facts per
//! (group, currency), group membership, and friend weights. The production
//! ledger lives in an external service; [`MemoryLedger`] is the in-process
//! implementation.
//!
//! Every mutation of a (group, currency) bumps its `version`, which callers use
//! as the ledger half of a cache fingerprint. Friend weights are group-wide, so
//! changing one bumps the version of every currency the group has facts in.

use crate::expense::{Expense, ExpenseSplit, LedgerEntry};
use crate::types::{Currency, FriendWeight, GroupId, UserId};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Ordered facts of one group in one currency
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Monotonic version of (group, currency)
    pub version: u64,

    /// Facts in ledger order
    pub entries: Vec<LedgerEntry>,
}

/// Read-only feed of ledger facts
#[async_trait]
pub trait LedgerSource: Send + Sync {
    /// Facts of a group in one currency
    async fn snapshot(&self, group_id: &GroupId, currency: Currency) -> Result<LedgerSnapshot>;

    /// Current version of (group, currency) without materializing facts
    ///
    /// Must change whenever the facts or the group's friend weights change.
    async fn version(&self, group_id: &GroupId, currency: Currency) -> Result<u64>;

    /// Members of a group
    async fn members(&self, group_id: &GroupId) -> Result<BTreeSet<UserId>>;

    /// Friend weights between members of a group
    async fn friend_weights(&self, group_id: &GroupId) -> Result<Vec<FriendWeight>>;
}

#[derive(Debug, Default)]
struct GroupLedger {
    members: BTreeSet<UserId>,
    entries: HashMap<Currency, Vec<(String, LedgerEntry)>>,
    versions: HashMap<Currency, u64>,
    friend_weights: Vec<FriendWeight>,
}

impl GroupLedger {
    fn bump(&mut self, currency: Currency) {
        *self.versions.entry(currency).or_insert(0) += 1;
    }
}

/// In-memory ledger
#[derive(Debug, Default)]
pub struct MemoryLedger {
    groups: RwLock<HashMap<GroupId, GroupLedger>>,
}

impl MemoryLedger {
    /// Create empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a group with the given members
    pub fn add_group<I>(&self, group_id: GroupId, members: I)
    where
        I: IntoIterator<Item = UserId>,
    {
        let mut groups = self.groups.write();
        let group = groups.entry(group_id).or_default();
        group.members.extend(members);
    }

    /// Add a member to an existing group
    pub fn add_member(&self, group_id: &GroupId, user_id: UserId) -> Result<()> {
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(group_id)
            .ok_or_else(|| Error::GroupNotFound(group_id.clone()))?;
        group.members.insert(user_id);
        Ok(())
    }

    /// Record an expense; returns the new version of (group, currency)
    pub fn record_expense(&self, group_id: &GroupId, expense: Expense) -> Result<u64> {
        let key = expense.expense_id.clone();
        self.record(group_id, key, LedgerEntry::Expense(expense))
    }

    /// Record a pre-split obligation under `fact_id`
    pub fn record_split(
        &self,
        group_id: &GroupId,
        fact_id: impl Into<String>,
        split: ExpenseSplit,
    ) -> Result<u64> {
        self.record(group_id, fact_id.into(), LedgerEntry::Split(split))
    }

    /// Delete a fact by id; returns the currency it belonged to, if found
    pub fn remove_entry(&self, group_id: &GroupId, fact_id: &str) -> Result<Option<Currency>> {
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(group_id)
            .ok_or_else(|| Error::GroupNotFound(group_id.clone()))?;

        let mut removed = None;
        for (currency, entries) in group.entries.iter_mut() {
            let before = entries.len();
            entries.retain(|(id, _)| id != fact_id);
            if entries.len() != before {
                removed = Some(*currency);
                break;
            }
        }

        if let Some(currency) = removed {
            group.bump(currency);
            tracing::debug!("Removed ledger fact {} from group {}", fact_id, group_id);
        }
        Ok(removed)
    }

    /// Set the affinity between two members, replacing any previous weight
    pub fn set_friend_weight(&self, group_id: &GroupId, weight: FriendWeight) -> Result<()> {
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(group_id)
            .ok_or_else(|| Error::GroupNotFound(group_id.clone()))?;

        group
            .friend_weights
            .retain(|w| !w.links(&weight.user_a, &weight.user_b));
        group.friend_weights.push(weight);

        let currencies: Vec<Currency> = group.versions.keys().copied().collect();
        for currency in currencies {
            group.bump(currency);
        }
        Ok(())
    }

    fn record(&self, group_id: &GroupId, fact_id: String, entry: LedgerEntry) -> Result<u64> {
        let currency = entry.currency();
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(group_id)
            .ok_or_else(|| Error::GroupNotFound(group_id.clone()))?;

        group
            .entries
            .entry(currency)
            .or_default()
            .push((fact_id, entry));
        group.bump(currency);

        Ok(group.versions[&currency])
    }
}

#[async_trait]
impl LedgerSource for MemoryLedger {
    async fn snapshot(&self, group_id: &GroupId, currency: Currency) -> Result<LedgerSnapshot> {
        let groups = self.groups.read();
        let group = groups
            .get(group_id)
            .ok_or_else(|| Error::GroupNotFound(group_id.clone()))?;

        Ok(LedgerSnapshot {
            version: group.versions.get(&currency).copied().unwrap_or(0),
            entries: group
                .entries
                .get(&currency)
                .map(|entries| entries.iter().map(|(_, e)| e.clone()).collect())
                .unwrap_or_default(),
        })
    }

    async fn version(&self, group_id: &GroupId, currency: Currency) -> Result<u64> {
        let groups = self.groups.read();
        let group = groups
            .get(group_id)
            .ok_or_else(|| Error::GroupNotFound(group_id.clone()))?;
        Ok(group.versions.get(&currency).copied().unwrap_or(0))
    }

    async fn members(&self, group_id: &GroupId) -> Result<BTreeSet<UserId>> {
        let groups = self.groups.read();
        groups
            .get(group_id)
            .map(|g| g.members.clone())
            .ok_or_else(|| Error::GroupNotFound(group_id.clone()))
    }

    async fn friend_weights(&self, group_id: &GroupId) -> Result<Vec<FriendWeight>> {
        let groups = self.groups.read();
        groups
            .get(group_id)
            .map(|g| g.friend_weights.clone())
            .ok_or_else(|| Error::GroupNotFound(group_id.clone()))
    }
}
