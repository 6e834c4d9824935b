//! Settlement persistence
//!
//! The durable store is an external collaborator; this module defines the
//! contract it must honour and an in-memory implementation used by tests and
//! the operator tooling.
//!
//! # Contract
//!
//! - `compare_and_swap` replaces a record only if its stored status still
//!   equals `expected`. The check and the write are one atomic step.
//! - `revision` is a per (group, currency) counter that increases every time a
//!   stored settlement starts affecting balances (i.e. on completion).

use crate::record::{Settlement, SettlementStatus};
use crate::types::{Currency, GroupId, SettlementId};
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;

/// Outcome of a compare-and-swap write
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// Record replaced
    Swapped,
    /// Stored status differed from the expected one; nothing written
    Conflict {
        /// Status found in the store
        current: SettlementStatus,
    },
}

/// Durable store for settlement records
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Insert a new record; fails on duplicate id
    async fn insert(&self, settlement: Settlement) -> Result<()>;

    /// Fetch a record
    async fn get(&self, id: SettlementId) -> Result<Option<Settlement>>;

    /// Replace `updated.id` if its stored status equals `expected`
    async fn compare_and_swap(
        &self,
        expected: SettlementStatus,
        updated: Settlement,
    ) -> Result<CasOutcome>;

    /// Records of a group in one currency, oldest first
    async fn list(
        &self,
        group_id: &GroupId,
        currency: Currency,
        status: Option<SettlementStatus>,
    ) -> Result<Vec<Settlement>>;

    /// Balance-affecting revision of (group, currency)
    async fn revision(&self, group_id: &GroupId, currency: Currency) -> Result<u64>;
}

/// In-memory settlement store
///
/// CAS is implemented under the `DashMap` shard write lock held by
/// `get_mut`, so concurrent writers on the same id are serialized.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<SettlementId, Settlement>,
    revisions: DashMap<(GroupId, Currency), u64>,
}

impl MemoryStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn bump_revision(&self, group_id: &GroupId, currency: Currency) {
        *self
            .revisions
            .entry((group_id.clone(), currency))
            .or_insert(0) += 1;
    }
}

#[async_trait]
impl SettlementStore for MemoryStore {
    async fn insert(&self, settlement: Settlement) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        let affects = settlement.affects_balances();
        let (group_id, currency) = (settlement.group_id.clone(), settlement.currency);

        match self.records.entry(settlement.id) {
            Entry::Occupied(_) => return Err(Error::DuplicateSettlement(settlement.id)),
            Entry::Vacant(slot) => {
                slot.insert(settlement);
            }
        }

        if affects {
            self.bump_revision(&group_id, currency);
        }
        Ok(())
    }

    async fn get(&self, id: SettlementId) -> Result<Option<Settlement>> {
        Ok(self.records.get(&id).map(|record| record.clone()))
    }

    async fn compare_and_swap(
        &self,
        expected: SettlementStatus,
        updated: Settlement,
    ) -> Result<CasOutcome> {
        let affects = {
            let mut record = self
                .records
                .get_mut(&updated.id)
                .ok_or_else(|| Error::Storage(format!("settlement {} not stored", updated.id)))?;

            if record.status != expected {
                return Ok(CasOutcome::Conflict {
                    current: record.status,
                });
            }

            let affects = !record.affects_balances() && updated.affects_balances();
            *record = updated.clone();
            affects
        };

        if affects {
            self.bump_revision(&updated.group_id, updated.currency);
        }
        Ok(CasOutcome::Swapped)
    }

    async fn list(
        &self,
        group_id: &GroupId,
        currency: Currency,
        status: Option<SettlementStatus>,
    ) -> Result<Vec<Settlement>> {
        let mut records: Vec<Settlement> = self
            .records
            .iter()
            .filter(|r| &r.group_id == group_id && r.currency == currency)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .map(|r| r.clone())
            .collect();

        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn revision(&self, group_id: &GroupId, currency: Currency) -> Result<u64> {
        Ok(self
            .revisions
            .get(&(group_id.clone(), currency))
            .map(|r| *r)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;
    use chrono::Utc;

    fn pending() -> Settlement {
        Settlement::pending(
            GroupId::new("g1"),
            UserId::new("alice"),
            UserId::new("bob"),
            500,
            Currency::USD,
            UserId::new("alice"),
            None,
        )
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryStore::new();
        let settlement = pending();

        store.insert(settlement.clone()).await.unwrap();
        let fetched = store.get(settlement.id).await.unwrap().unwrap();
        assert_eq!(fetched, settlement);

        let duplicate = store.insert(settlement.clone()).await;
        assert_eq!(duplicate.unwrap_err(), Error::DuplicateSettlement(settlement.id));
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = MemoryStore::new();
        let settlement = pending();
        store.insert(settlement.clone()).await.unwrap();

        let completed = settlement.completed(Default::default(), Utc::now());
        let outcome = store
            .compare_and_swap(SettlementStatus::Pending, completed.clone())
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Swapped);

        // Second writer still expects Pending and loses
        let cancelled = settlement.cancelled("late", Utc::now());
        let outcome = store
            .compare_and_swap(SettlementStatus::Pending, cancelled)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CasOutcome::Conflict {
                current: SettlementStatus::Completed
            }
        );

        let stored = store.get(settlement.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SettlementStatus::Completed);
    }

    #[tokio::test]
    async fn test_revision_bumps_only_on_completion() {
        let store = MemoryStore::new();
        let group = GroupId::new("g1");
        let first = pending();
        let second = pending();
        store.insert(first.clone()).await.unwrap();
        store.insert(second.clone()).await.unwrap();
        assert_eq!(store.revision(&group, Currency::USD).await.unwrap(), 0);

        store
            .compare_and_swap(
                SettlementStatus::Pending,
                second.cancelled("duplicate", Utc::now()),
            )
            .await
            .unwrap();
        assert_eq!(store.revision(&group, Currency::USD).await.unwrap(), 0);

        store
            .compare_and_swap(
                SettlementStatus::Pending,
                first.completed(Default::default(), Utc::now()),
            )
            .await
            .unwrap();
        assert_eq!(store.revision(&group, Currency::USD).await.unwrap(), 1);
        assert_eq!(store.revision(&group, Currency::EUR).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let store = MemoryStore::new();
        let group = GroupId::new("g1");
        let first = pending();
        store.insert(first.clone()).await.unwrap();
        store.insert(pending()).await.unwrap();
        store
            .compare_and_swap(
                SettlementStatus::Pending,
                first.completed(Default::default(), Utc::now()),
            )
            .await
            .unwrap();

        let all = store.list(&group, Currency::USD, None).await.unwrap();
        assert_eq!(all.len(), 2);

        let completed = store
            .list(&group, Currency::USD, Some(SettlementStatus::Completed))
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, first.id);
    }
}
