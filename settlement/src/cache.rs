//! Suggestion cache
//!
//! Memoizes computed suggestion sets per (group, currency, ledger fingerprint,
//! algorithm).
//!
//! # Architecture
//!
//! Each key maps to a shared `tokio::sync::OnceCell`. The first caller for a
//! key runs the computation inside `get_or_try_init`; concurrent callers for
//! the same key wait on the same cell and receive the same `Arc`. A cell is
//! only ever observed empty or fully populated.
//!
//! # Invariants
//!
//! - At most one in-flight computation per key
//! - Failed computations are not cached; the next caller retries
//! - Entries older than the TTL are recomputed on access and dropped by
//!   [`SuggestionCache::purge_expired`]
//! - Any ledger mutation changes the fingerprint, so stale entries are never
//!   served even before explicit invalidation drops them

use crate::algorithm::AlgorithmKind;
use crate::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ledger_core::{Currency, GroupId, SettlementSuggestion};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::debug;

/// Identifies the exact ledger state suggestions were computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerFingerprint {
    /// Ledger version of (group, currency)
    pub ledger_version: u64,

    /// Balance-affecting settlement revision of (group, currency)
    pub settlement_revision: u64,
}

/// Cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Group
    pub group_id: GroupId,
    /// Currency
    pub currency: Currency,
    /// Ledger state
    pub fingerprint: LedgerFingerprint,
    /// Requested algorithm
    pub algorithm: AlgorithmKind,
}

/// Cached suggestion set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSuggestions {
    /// Ordered transactions
    pub transactions: Vec<SettlementSuggestion>,

    /// Algorithm that actually produced them (differs from the requested one
    /// after a fallback)
    pub algorithm: AlgorithmKind,

    /// When the computation finished
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug)]
struct CacheEntry {
    value: Arc<CachedSuggestions>,
    inserted: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted.elapsed() >= ttl
    }
}

type Slot = Arc<OnceCell<CacheEntry>>;

/// Point-in-time cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups served from a populated entry
    pub hits: u64,
    /// Lookups that ran the computation
    pub misses: u64,
    /// Entries dropped by invalidation
    pub invalidations: u64,
    /// Entries currently held
    pub entries: usize,
}

impl CacheStats {
    /// Hit rate in percent
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64) / (total as f64) * 100.0
        }
    }
}

/// Single-flight suggestion cache with TTL
#[derive(Debug)]
pub struct SuggestionCache {
    entries: DashMap<CacheKey, Slot>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl SuggestionCache {
    /// Create cache
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Entry time-to-live
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached value for `key`, or run `compute` to fill it
    ///
    /// The flag is `true` when the value was not computed by this call.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: CacheKey,
        compute: F,
    ) -> Result<(Arc<CachedSuggestions>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedSuggestions>>,
    {
        let slot = self.slot(&key);
        let computed = AtomicBool::new(false);
        let flag = &computed;

        let entry = slot
            .get_or_try_init(|| async move {
                flag.store(true, Ordering::Relaxed);
                let value = compute().await?;
                Ok::<_, crate::Error>(CacheEntry {
                    value: Arc::new(value),
                    inserted: Instant::now(),
                })
            })
            .await?;

        let hit = !computed.load(Ordering::Relaxed);
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Suggestion cache hit for {} {}", key.group_id, key.currency);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("Suggestion cache miss for {} {}", key.group_id, key.currency);
        }

        Ok((entry.value.clone(), hit))
    }

    /// Populated, unexpired value for `key`
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<CachedSuggestions>> {
        self.entries
            .get(key)
            .and_then(|slot| {
                slot.get()
                    .filter(|entry| !entry.is_expired(self.ttl))
                    .map(|entry| entry.value.clone())
            })
    }

    /// Drop every entry of (group, currency); returns the number dropped
    pub fn invalidate(&self, group_id: &GroupId, currency: Currency) -> usize {
        let mut dropped = 0usize;
        self.entries.retain(|key, _| {
            let stale = &key.group_id == group_id && key.currency == currency;
            if stale {
                dropped += 1;
            }
            !stale
        });

        if dropped > 0 {
            self.invalidations.fetch_add(dropped as u64, Ordering::Relaxed);
            debug!(
                "Invalidated {} suggestion entries for {} {}",
                dropped, group_id, currency
            );
        }
        dropped
    }

    /// Drop expired entries and abandoned empty slots; returns the number dropped
    pub fn purge_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut purged = 0usize;
        self.entries.retain(|_, slot| {
            let keep = match slot.get() {
                Some(entry) => !entry.is_expired(ttl),
                // Empty and unshared: a failed computation nobody is retrying
                None => Arc::strong_count(slot) > 1,
            };
            if !keep {
                purged += 1;
            }
            keep
        });
        purged
    }

    /// Number of entries held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache holds nothing
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    /// Spawn a task that purges expired entries every `interval`
    ///
    /// The task holds a weak reference and exits once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!("Swept {} expired suggestion entries", purged);
                }
            }
        })
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        let mut slot = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()));

        if slot.get().map_or(false, |entry| entry.is_expired(self.ttl)) {
            *slot = Arc::new(OnceCell::new());
        }
        slot.clone()
    }
}
