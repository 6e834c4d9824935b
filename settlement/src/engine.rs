//! Main settlement engine
//!
//! Facade over balance netting, the settlement algorithms, the suggestion
//! cache and the settlement lifecycle.
//!
//! # Suggestion flow
//!
//! 1. **Fingerprint**: ledger version + settlement revision of (group, currency)
//! 2. **Cache**: single-flight lookup keyed by fingerprint and algorithm
//! 3. **Netting**: ledger facts + completed settlements → balances
//! 4. **Algorithm**: requested strategy, falling back to greedy when it
//!    exceeds its iteration bound

use crate::{
    algorithm::{AlgorithmKind, Greedy, SettlementStrategy, StrategyOptions},
    cache::{CacheKey, CacheStats, CachedSuggestions, LedgerFingerprint, SuggestionCache},
    comparator::{AlgorithmComparator, ComparisonReport},
    config::Config,
    lifecycle::{CompletionOutcome, NewSettlement, PaymentNotifier, SettlementLifecycle},
    metrics::Metrics,
    Error, Result,
};
use chrono::{DateTime, Utc};
use ledger_core::{
    BalanceCalculator, Balances, CompletionMetadata, Currency, GroupId, LedgerSource, Settlement,
    SettlementId, SettlementStatus, SettlementStore, SettlementSuggestion,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Suggestions returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionSet {
    /// Group
    pub group_id: GroupId,

    /// Currency
    pub currency: Currency,

    /// Ordered transactions
    pub transactions: Vec<SettlementSuggestion>,

    /// Algorithm the caller asked for
    pub requested_algorithm: AlgorithmKind,

    /// Algorithm that produced the transactions
    pub algorithm: AlgorithmKind,

    /// When the transactions were computed
    pub generated_at: DateTime<Utc>,

    /// Served from the cache
    pub cache_hit: bool,
}

/// Settlement engine
pub struct SettlementEngine {
    /// Ledger feed
    ledger: Arc<dyn LedgerSource>,

    /// Settlement persistence
    store: Arc<dyn SettlementStore>,

    /// Suggestion cache
    cache: Arc<SuggestionCache>,

    /// Settlement state machine
    lifecycle: SettlementLifecycle,

    /// Balance netting
    calculator: BalanceCalculator,

    /// Metrics
    metrics: Metrics,

    /// Background cache sweeper
    sweeper: Mutex<Option<JoinHandle<()>>>,

    /// Configuration
    config: Config,
}

impl SettlementEngine {
    /// Create new settlement engine
    pub fn new(
        config: Config,
        ledger: Arc<dyn LedgerSource>,
        store: Arc<dyn SettlementStore>,
        notifier: Arc<dyn PaymentNotifier>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Metrics::new()?;
        let cache = Arc::new(SuggestionCache::new(config.cache.ttl()));

        let lifecycle = SettlementLifecycle::new(
            store.clone(),
            ledger.clone(),
            notifier,
            config.lifecycle.clone(),
        )
        .with_cache(cache.clone())
        .with_metrics(metrics.clone());

        Ok(Self {
            ledger,
            store,
            cache,
            lifecycle,
            calculator: BalanceCalculator::new(),
            metrics,
            sweeper: Mutex::new(None),
            config,
        })
    }

    /// Start background tasks
    pub fn start(&self) {
        if !self.config.cache.enabled {
            return;
        }
        let Some(interval) = self.config.cache.sweep_interval() else {
            return;
        };

        let mut sweeper = self.sweeper.lock();
        if sweeper.is_none() {
            *sweeper = Some(self.cache.spawn_sweeper(interval));
            info!("Suggestion cache sweeper started (every {:?})", interval);
        }
    }

    /// Stop background tasks and drop cached suggestions
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.cache.clear();
        info!("Settlement engine shut down");
    }

    /// Net balances of (group, currency)
    pub async fn balances(&self, group_id: &GroupId, currency: Currency) -> Result<Balances> {
        let snapshot = self.ledger.snapshot(group_id, currency).await?;
        let settlements = self
            .store
            .list(group_id, currency, Some(SettlementStatus::Completed))
            .await?;

        Ok(self
            .calculator
            .calculate(currency, &snapshot.entries, &settlements)?)
    }

    /// Suggested payments that settle (group, currency)
    ///
    /// `algorithm` defaults to the configured one. Two calls without an
    /// intervening ledger mutation return the same cached set.
    pub async fn compute_suggestions(
        &self,
        group_id: &GroupId,
        currency: Currency,
        algorithm: Option<AlgorithmKind>,
    ) -> Result<SuggestionSet> {
        let requested = algorithm.unwrap_or(self.config.suggestions.default_algorithm);

        let result = if self.config.cache.enabled {
            let key = CacheKey {
                group_id: group_id.clone(),
                currency,
                fingerprint: self.fingerprint(group_id, currency).await?,
                algorithm: requested,
            };
            self.cache
                .get_or_compute(key, || self.compute(group_id, currency, requested))
                .await
                .map(|(value, hit)| {
                    self.metrics.record_cache_lookup(hit);
                    (value, hit)
                })
        } else {
            self.compute(group_id, currency, requested)
                .await
                .map(|value| (Arc::new(value), false))
        };

        let (value, cache_hit) = result.map_err(|e| {
            error!(
                "Suggestion computation failed for group {} {}: {}",
                group_id, currency, e
            );
            e
        })?;

        Ok(SuggestionSet {
            group_id: group_id.clone(),
            currency,
            transactions: value.transactions.clone(),
            requested_algorithm: requested,
            algorithm: value.algorithm,
            generated_at: value.generated_at,
            cache_hit,
        })
    }

    /// Record a pending settlement
    pub async fn create_settlement(&self, request: NewSettlement) -> Result<Settlement> {
        self.lifecycle.create(request).await
    }

    /// Complete a pending settlement; repeated calls are no-ops
    pub async fn complete_settlement(
        &self,
        id: SettlementId,
        metadata: CompletionMetadata,
    ) -> Result<CompletionOutcome> {
        self.lifecycle.complete(id, metadata).await
    }

    /// Cancel a pending settlement
    pub async fn cancel_settlement(
        &self,
        id: SettlementId,
        reason: impl Into<String>,
    ) -> Result<Settlement> {
        self.lifecycle.cancel(id, reason).await
    }

    /// Fetch a settlement
    pub async fn get_settlement(&self, id: SettlementId) -> Result<Settlement> {
        self.lifecycle.get(id).await
    }

    /// Settlements of (group, currency), oldest first
    pub async fn list_settlements(
        &self,
        group_id: &GroupId,
        currency: Currency,
        status: Option<SettlementStatus>,
    ) -> Result<Vec<Settlement>> {
        self.lifecycle.list(group_id, currency, status).await
    }

    /// Run every algorithm over the current balances
    pub async fn compare_algorithms(
        &self,
        group_id: &GroupId,
        currency: Currency,
    ) -> Result<ComparisonReport> {
        let balances = self.balances(group_id, currency).await?;
        let options = StrategyOptions {
            friend_weights: self.ledger.friend_weights(group_id).await?,
            friend_threshold: self.config.suggestions.friend_weight_threshold,
        };

        Ok(AlgorithmComparator::new(options).compare(&balances))
    }

    /// Drop cached suggestions after a ledger mutation of (group, currency)
    pub fn notify_ledger_mutation(&self, group_id: &GroupId, currency: Currency) -> usize {
        let dropped = self.cache.invalidate(group_id, currency);
        self.metrics.record_invalidations(dropped);
        dropped
    }

    /// Cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Engine metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Engine configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn fingerprint(&self, group_id: &GroupId, currency: Currency) -> Result<LedgerFingerprint> {
        Ok(LedgerFingerprint {
            ledger_version: self.ledger.version(group_id, currency).await?,
            settlement_revision: self.store.revision(group_id, currency).await?,
        })
    }

    async fn compute(
        &self,
        group_id: &GroupId,
        currency: Currency,
        requested: AlgorithmKind,
    ) -> Result<CachedSuggestions> {
        let balances = self.balances(group_id, currency).await?;

        let friend_weights = match requested {
            AlgorithmKind::FriendPreference => self.ledger.friend_weights(group_id).await?,
            _ => Vec::new(),
        };
        let options = StrategyOptions {
            friend_weights,
            friend_threshold: self.config.suggestions.friend_weight_threshold,
        };

        let start = Instant::now();
        let (transactions, used) =
            settle_with_fallback(requested.strategy().as_ref(), &balances, &options, &self.metrics)?;
        self.metrics
            .record_suggestions(used.as_str(), start.elapsed().as_secs_f64());

        info!(
            "Computed {} suggestions for group {} {} with {}",
            transactions.len(),
            group_id,
            currency,
            used
        );

        Ok(CachedSuggestions {
            transactions,
            algorithm: used,
            generated_at: Utc::now(),
        })
    }
}

/// Run `strategy`, retrying with greedy if it exceeds its iteration bound
fn settle_with_fallback(
    strategy: &dyn SettlementStrategy,
    balances: &Balances,
    options: &StrategyOptions,
    metrics: &Metrics,
) -> Result<(Vec<SettlementSuggestion>, AlgorithmKind)> {
    match strategy.settle(balances, options) {
        Ok(transactions) => Ok((transactions, strategy.kind())),
        Err(Error::ComputationTimeout { algorithm, bound }) => {
            warn!(
                "{} exceeded iteration bound {}, falling back to greedy",
                algorithm, bound
            );
            metrics.record_fallback();
            let transactions = Greedy.settle(balances, options)?;
            Ok((transactions, AlgorithmKind::Greedy))
        }
        Err(e) => Err(e),
    }
}

impl fmt::Debug for SettlementEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettlementEngine")
            .field("config", &self.config)
            .field("cache", &self.cache.stats())
            .finish()
    }
}

impl Drop for SettlementEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}
