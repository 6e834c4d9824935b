//! Settlement lifecycle
//!
//! ```text
//! pending ──complete──▶ completed
//!    │
//!    └────cancel──────▶ cancelled
//! ```
//!
//! Both terminal states are final. Every transition is a compare-and-swap on
//! the stored status: read the record, check the transition, write only if the
//! status is still `pending`. A lost race re-reads and re-checks, up to
//! `max_cas_retries` attempts, after which the caller gets
//! `ConcurrentModification`.
//!
//! Completing an already completed settlement is a no-op reported as
//! [`CompletionOutcome::AlreadyCompleted`], so payment callbacks can be
//! delivered more than once.

use crate::cache::SuggestionCache;
use crate::config::LifecycleConfig;
use crate::metrics::Metrics;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use ledger_core::{
    CasOutcome, CompletionMetadata, Currency, GroupId, LedgerSource, MinorUnits, Settlement,
    SettlementId, SettlementStatus, SettlementStore, UserId,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Request to record a settlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSettlement {
    /// Group
    pub group_id: GroupId,
    /// Member paying
    pub payer_id: UserId,
    /// Member receiving
    pub receiver_id: UserId,
    /// Amount in minor units
    pub amount: MinorUnits,
    /// ISO 4217 style code, validated on create
    pub currency: String,
    /// Member recording the settlement
    pub created_by: UserId,
    /// Free-form notes
    pub notes: Option<String>,
}

/// Result of `complete`
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// This call completed the settlement
    Completed(Settlement),
    /// The settlement was already completed; nothing changed
    AlreadyCompleted(Settlement),
}

impl CompletionOutcome {
    /// Settlement as stored after the call
    pub fn settlement(&self) -> &Settlement {
        match self {
            CompletionOutcome::Completed(s) | CompletionOutcome::AlreadyCompleted(s) => s,
        }
    }

    /// Check if this call performed the transition
    pub fn is_new(&self) -> bool {
        matches!(self, CompletionOutcome::Completed(_))
    }
}

/// Payment processor hook, told about every new settlement
#[async_trait]
pub trait PaymentNotifier: Send + Sync {
    /// Called after a settlement is persisted as pending
    async fn settlement_created(&self, settlement: &Settlement) -> Result<()>;
}

/// Notifier that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl PaymentNotifier for LoggingNotifier {
    async fn settlement_created(&self, settlement: &Settlement) -> Result<()> {
        info!(
            "Settlement {} created: {} -> {} {} {}",
            settlement.id,
            settlement.payer_id,
            settlement.receiver_id,
            settlement.amount,
            settlement.currency
        );
        Ok(())
    }
}

/// Creates settlements and drives their state machine
pub struct SettlementLifecycle {
    store: Arc<dyn SettlementStore>,
    ledger: Arc<dyn LedgerSource>,
    notifier: Arc<dyn PaymentNotifier>,
    cache: Option<Arc<SuggestionCache>>,
    metrics: Option<Metrics>,
    config: LifecycleConfig,
}

impl SettlementLifecycle {
    /// Create lifecycle
    pub fn new(
        store: Arc<dyn SettlementStore>,
        ledger: Arc<dyn LedgerSource>,
        notifier: Arc<dyn PaymentNotifier>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            notifier,
            cache: None,
            metrics: None,
            config,
        }
    }

    /// Invalidate `cache` whenever a settlement completes
    pub fn with_cache(mut self, cache: Arc<SuggestionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Record transitions in `metrics`
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate and persist a pending settlement
    pub async fn create(&self, request: NewSettlement) -> Result<Settlement> {
        let currency = Currency::parse(&request.currency)?;

        if request.payer_id == request.receiver_id {
            return Err(Error::InvalidSettlement(
                "payer and receiver must differ".to_string(),
            ));
        }

        if request.amount <= 0 {
            return Err(Error::InvalidSettlement(format!(
                "amount must be positive, got {}",
                request.amount
            )));
        }

        if let Some(notes) = &request.notes {
            if notes.chars().count() > self.config.max_notes_length {
                return Err(Error::InvalidSettlement(format!(
                    "notes exceed {} characters",
                    self.config.max_notes_length
                )));
            }
        }

        let members = self.ledger.members(&request.group_id).await?;
        for party in [&request.payer_id, &request.receiver_id] {
            if !members.contains(party) {
                return Err(Error::InvalidSettlement(format!(
                    "{} is not a member of group {}",
                    party, request.group_id
                )));
            }
        }

        let settlement = Settlement::pending(
            request.group_id,
            request.payer_id,
            request.receiver_id,
            request.amount,
            currency,
            request.created_by,
            request.notes,
        );
        self.store.insert(settlement.clone()).await?;

        info!(
            "Created settlement {} in group {} ({} {})",
            settlement.id, settlement.group_id, settlement.amount, settlement.currency
        );
        self.record("create", "created");

        if let Err(e) = self.notifier.settlement_created(&settlement).await {
            warn!(
                "Payment notifier failed for settlement {}: {}",
                settlement.id, e
            );
        }

        Ok(settlement)
    }

    /// Mark a pending settlement completed
    pub async fn complete(
        &self,
        id: SettlementId,
        metadata: CompletionMetadata,
    ) -> Result<CompletionOutcome> {
        let max_attempts = self.config.max_cas_retries;

        for attempt in 1..=max_attempts {
            let current = self.load(id).await?;
            match current.status {
                SettlementStatus::Pending => {}
                SettlementStatus::Completed => {
                    debug!("Settlement {} already completed", id);
                    self.record("complete", "already_completed");
                    return Ok(CompletionOutcome::AlreadyCompleted(current));
                }
                SettlementStatus::Cancelled => {
                    self.record("complete", "rejected");
                    return Err(Error::InvalidTransition {
                        id,
                        from: current.status,
                        to: SettlementStatus::Completed,
                    });
                }
            }

            let updated = current.completed(metadata.clone(), Utc::now());
            match self
                .store
                .compare_and_swap(SettlementStatus::Pending, updated.clone())
                .await?
            {
                CasOutcome::Swapped => {
                    if let Some(cache) = &self.cache {
                        let dropped = cache.invalidate(&updated.group_id, updated.currency);
                        if let Some(metrics) = &self.metrics {
                            metrics.record_invalidations(dropped);
                        }
                    }
                    info!(
                        "Completed settlement {} ({} -> {} {} {})",
                        id, updated.payer_id, updated.receiver_id, updated.amount, updated.currency
                    );
                    self.record("complete", "completed");
                    return Ok(CompletionOutcome::Completed(updated));
                }
                CasOutcome::Conflict { current } => {
                    self.conflict(id, attempt, max_attempts, current);
                }
            }
        }

        self.record("complete", "conflict");
        Err(Error::ConcurrentModification {
            id,
            attempts: max_attempts,
        })
    }

    /// Cancel a pending settlement
    pub async fn cancel(&self, id: SettlementId, reason: impl Into<String>) -> Result<Settlement> {
        let reason = reason.into();
        let max_attempts = self.config.max_cas_retries;

        for attempt in 1..=max_attempts {
            let current = self.load(id).await?;
            if current.status != SettlementStatus::Pending {
                self.record("cancel", "rejected");
                return Err(Error::InvalidTransition {
                    id,
                    from: current.status,
                    to: SettlementStatus::Cancelled,
                });
            }

            let updated = current.cancelled(reason.clone(), Utc::now());
            match self
                .store
                .compare_and_swap(SettlementStatus::Pending, updated.clone())
                .await?
            {
                CasOutcome::Swapped => {
                    info!("Cancelled settlement {}: {}", id, reason);
                    self.record("cancel", "cancelled");
                    return Ok(updated);
                }
                CasOutcome::Conflict { current } => {
                    self.conflict(id, attempt, max_attempts, current);
                }
            }
        }

        self.record("cancel", "conflict");
        Err(Error::ConcurrentModification {
            id,
            attempts: max_attempts,
        })
    }

    /// Fetch a settlement
    pub async fn get(&self, id: SettlementId) -> Result<Settlement> {
        self.load(id).await
    }

    /// Settlements of a group in one currency, oldest first
    pub async fn list(
        &self,
        group_id: &GroupId,
        currency: Currency,
        status: Option<SettlementStatus>,
    ) -> Result<Vec<Settlement>> {
        Ok(self.store.list(group_id, currency, status).await?)
    }

    async fn load(&self, id: SettlementId) -> Result<Settlement> {
        self.store
            .get(id)
            .await?
            .ok_or(Error::SettlementNotFound(id))
    }

    fn conflict(&self, id: SettlementId, attempt: u32, max: u32, current: SettlementStatus) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cas_conflict();
        }
        warn!(
            "CAS conflict on settlement {} (attempt {}/{}, stored status {})",
            id, attempt, max, current
        );
    }

    fn record(&self, transition: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_transition(transition, outcome);
        }
    }
}

impl fmt::Debug for SettlementLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettlementLifecycle")
            .field("config", &self.config)
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{MemoryLedger, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingNotifier(AtomicUsize);

    #[async_trait]
    impl PaymentNotifier for CountingNotifier {
        async fn settlement_created(&self, _settlement: &Settlement) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(Error::Other("processor offline".to_string()))
        }
    }

    fn setup() -> (SettlementLifecycle, Arc<MemoryStore>) {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.add_group(
            GroupId::new("g1"),
            [UserId::new("alice"), UserId::new("bob")],
        );
        let store = Arc::new(MemoryStore::new());
        let lifecycle = SettlementLifecycle::new(
            store.clone(),
            ledger,
            Arc::new(LoggingNotifier),
            LifecycleConfig::default(),
        );
        (lifecycle, store)
    }

    fn request() -> NewSettlement {
        NewSettlement {
            group_id: GroupId::new("g1"),
            payer_id: UserId::new("alice"),
            receiver_id: UserId::new("bob"),
            amount: 1500,
            currency: "USD".to_string(),
            created_by: UserId::new("alice"),
            notes: Some("dinner".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_pending() {
        let (lifecycle, store) = setup();

        let settlement = lifecycle.create(request()).await.unwrap();

        assert_eq!(settlement.status, SettlementStatus::Pending);
        assert_eq!(settlement.currency, Currency::USD);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let (lifecycle, _) = setup();

        let mut same_party = request();
        same_party.receiver_id = UserId::new("alice");
        assert!(matches!(
            lifecycle.create(same_party).await,
            Err(Error::InvalidSettlement(_))
        ));

        let mut zero = request();
        zero.amount = 0;
        assert!(matches!(
            lifecycle.create(zero).await,
            Err(Error::InvalidSettlement(_))
        ));

        let mut bad_currency = request();
        bad_currency.currency = "usd".to_string();
        assert!(matches!(
            lifecycle.create(bad_currency).await,
            Err(Error::Ledger(ledger_core::Error::InvalidCurrency(_)))
        ));

        let mut outsider = request();
        outsider.receiver_id = UserId::new("mallory");
        assert!(matches!(
            lifecycle.create(outsider).await,
            Err(Error::InvalidSettlement(_))
        ));

        let mut long_notes = request();
        long_notes.notes = Some("x".repeat(501));
        assert!(matches!(
            lifecycle.create(long_notes).await,
            Err(Error::InvalidSettlement(_))
        ));

        let mut unknown_group = request();
        unknown_group.group_id = GroupId::new("nope");
        assert!(matches!(
            lifecycle.create(unknown_group).await,
            Err(Error::Ledger(ledger_core::Error::GroupNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_notifier_failure_not_propagated() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.add_group(
            GroupId::new("g1"),
            [UserId::new("alice"), UserId::new("bob")],
        );
        let notifier = Arc::new(CountingNotifier(AtomicUsize::new(0)));
        let lifecycle = SettlementLifecycle::new(
            Arc::new(MemoryStore::new()),
            ledger,
            notifier.clone(),
            LifecycleConfig::default(),
        );

        assert!(lifecycle.create(request()).await.is_ok());
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_complete_is_idempotent() {
        let (lifecycle, _) = setup();
        let settlement = lifecycle.create(request()).await.unwrap();

        let first = lifecycle
            .complete(settlement.id, CompletionMetadata::default())
            .await
            .unwrap();
        let second = lifecycle
            .complete(settlement.id, CompletionMetadata::default())
            .await
            .unwrap();

        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.settlement(), second.settlement());
        assert!(second.settlement().completed_at.is_some());
    }

    #[tokio::test]
    async fn test_cancel_after_complete_rejected() {
        let (lifecycle, _) = setup();
        let settlement = lifecycle.create(request()).await.unwrap();
        lifecycle
            .complete(settlement.id, CompletionMetadata::default())
            .await
            .unwrap();

        let err = lifecycle.cancel(settlement.id, "changed mind").await.unwrap_err();

        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: SettlementStatus::Completed,
                to: SettlementStatus::Cancelled,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_complete_after_cancel_rejected() {
        let (lifecycle, _) = setup();
        let settlement = lifecycle.create(request()).await.unwrap();

        let cancelled = lifecycle.cancel(settlement.id, "duplicate").await.unwrap();
        assert_eq!(cancelled.status, SettlementStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("duplicate"));

        assert!(matches!(
            lifecycle
                .complete(settlement.id, CompletionMetadata::default())
                .await,
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            lifecycle.cancel(settlement.id, "again").await,
            Err(Error::InvalidTransition { .. })
        ));
    }

    /// Store that loses the first `conflicts` CAS races, then delegates
    struct ContendedStore {
        inner: MemoryStore,
        conflicts: AtomicUsize,
    }

    #[async_trait]
    impl SettlementStore for ContendedStore {
        async fn insert(&self, settlement: Settlement) -> ledger_core::Result<()> {
            self.inner.insert(settlement).await
        }

        async fn get(&self, id: SettlementId) -> ledger_core::Result<Option<Settlement>> {
            self.inner.get(id).await
        }

        async fn compare_and_swap(
            &self,
            expected: SettlementStatus,
            updated: Settlement,
        ) -> ledger_core::Result<CasOutcome> {
            let lost = self
                .conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lost {
                return Ok(CasOutcome::Conflict {
                    current: SettlementStatus::Pending,
                });
            }
            self.inner.compare_and_swap(expected, updated).await
        }

        async fn list(
            &self,
            group_id: &GroupId,
            currency: Currency,
            status: Option<SettlementStatus>,
        ) -> ledger_core::Result<Vec<Settlement>> {
            self.inner.list(group_id, currency, status).await
        }

        async fn revision(&self, group_id: &GroupId, currency: Currency) -> ledger_core::Result<u64> {
            self.inner.revision(group_id, currency).await
        }
    }

    fn contended(conflicts: usize) -> (SettlementLifecycle, Metrics) {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.add_group(
            GroupId::new("g1"),
            [UserId::new("alice"), UserId::new("bob")],
        );
        let store = Arc::new(ContendedStore {
            inner: MemoryStore::new(),
            conflicts: AtomicUsize::new(conflicts),
        });
        let metrics = Metrics::new().unwrap();
        let lifecycle = SettlementLifecycle::new(
            store,
            ledger,
            Arc::new(LoggingNotifier),
            LifecycleConfig::default(),
        )
        .with_metrics(metrics.clone());
        (lifecycle, metrics)
    }

    #[tokio::test]
    async fn test_complete_retries_after_conflict() {
        let (lifecycle, metrics) = contended(2);
        let settlement = lifecycle.create(request()).await.unwrap();

        let outcome = lifecycle
            .complete(settlement.id, CompletionMetadata::default())
            .await
            .unwrap();

        assert!(outcome.is_new());
        assert_eq!(outcome.settlement().status, SettlementStatus::Completed);
        assert_eq!(metrics.cas_conflicts.get(), 2);
        assert_eq!(
            metrics
                .transitions_total
                .with_label_values(&["complete", "completed"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_complete_gives_up_after_max_retries() {
        let (lifecycle, metrics) = contended(3);
        let settlement = lifecycle.create(request()).await.unwrap();

        let err = lifecycle
            .complete(settlement.id, CompletionMetadata::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ConcurrentModification { attempts: 3, .. }
        ));
        assert_eq!(metrics.cas_conflicts.get(), 3);
        assert_eq!(
            metrics
                .transitions_total
                .with_label_values(&["complete", "conflict"])
                .get(),
            1
        );
        // Nothing was written
        assert_eq!(
            lifecycle.get(settlement.id).await.unwrap().status,
            SettlementStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_cancel_gives_up_after_max_retries() {
        let (lifecycle, metrics) = contended(5);
        let settlement = lifecycle.create(request()).await.unwrap();

        let err = lifecycle.cancel(settlement.id, "typo").await.unwrap_err();

        assert!(matches!(
            err,
            Error::ConcurrentModification { attempts: 3, .. }
        ));
        assert_eq!(metrics.cas_conflicts.get(), 3);

        // The next call loses the remaining two races and lands on its third attempt
        let cancelled = lifecycle.cancel(settlement.id, "typo").await.unwrap();
        assert_eq!(cancelled.status, SettlementStatus::Cancelled);
        assert_eq!(metrics.cas_conflicts.get(), 5);
    }

    #[tokio::test]
    async fn test_unknown_settlement() {
        let (lifecycle, _) = setup();

        assert!(matches!(
            lifecycle.get(SettlementId::new()).await,
            Err(Error::SettlementNotFound(_))
        ));
    }
}
