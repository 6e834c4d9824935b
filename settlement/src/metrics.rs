//! Metrics collection for observability
//!
//! Prometheus collectors for the settlement engine. Every collector lives on
//! a registry owned by the [`Metrics`] instance; nothing is registered
//! globally, so several engines can coexist in one process.
//!
//! # Metrics
//!
//! - `settlement_suggestions_total{algorithm}` - Suggestion sets computed
//! - `settlement_algorithm_duration_seconds{algorithm}` - Algorithm latency
//! - `settlement_algorithm_fallbacks_total` - Fallbacks to greedy
//! - `settlement_cache_hits_total` / `_misses_total` / `_invalidations_total`
//! - `settlement_transitions_total{transition,outcome}` - Lifecycle writes
//! - `settlement_cas_conflicts_total` - Lost compare-and-swap races

use crate::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::fmt;
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Suggestion sets computed, by algorithm
    pub suggestions_total: IntCounterVec,

    /// Algorithm latency, by algorithm
    pub algorithm_duration: HistogramVec,

    /// Fallbacks after `ComputationTimeout`
    pub fallbacks_total: IntCounter,

    /// Cache hits
    pub cache_hits: IntCounter,

    /// Cache misses
    pub cache_misses: IntCounter,

    /// Cache invalidations
    pub cache_invalidations: IntCounter,

    /// Lifecycle transitions, by transition and outcome
    pub transitions_total: IntCounterVec,

    /// Lost compare-and-swap races
    pub cas_conflicts: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let suggestions_total = IntCounterVec::new(
            Opts::new(
                "settlement_suggestions_total",
                "Total number of suggestion sets computed",
            ),
            &["algorithm"],
        )?;
        registry.register(Box::new(suggestions_total.clone()))?;

        let algorithm_duration = HistogramVec::new(
            HistogramOpts::new(
                "settlement_algorithm_duration_seconds",
                "Histogram of algorithm latencies",
            )
            .buckets(vec![
                0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.010, 0.050, 0.100,
            ]),
            &["algorithm"],
        )?;
        registry.register(Box::new(algorithm_duration.clone()))?;

        let fallbacks_total = IntCounter::new(
            "settlement_algorithm_fallbacks_total",
            "Total number of fallbacks to greedy",
        )?;
        registry.register(Box::new(fallbacks_total.clone()))?;

        let cache_hits = IntCounter::new("settlement_cache_hits_total", "Suggestion cache hits")?;
        registry.register(Box::new(cache_hits.clone()))?;

        let cache_misses =
            IntCounter::new("settlement_cache_misses_total", "Suggestion cache misses")?;
        registry.register(Box::new(cache_misses.clone()))?;

        let cache_invalidations = IntCounter::new(
            "settlement_cache_invalidations_total",
            "Suggestion cache entries invalidated",
        )?;
        registry.register(Box::new(cache_invalidations.clone()))?;

        let transitions_total = IntCounterVec::new(
            Opts::new(
                "settlement_transitions_total",
                "Total number of lifecycle transitions",
            ),
            &["transition", "outcome"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        let cas_conflicts = IntCounter::new(
            "settlement_cas_conflicts_total",
            "Total number of lost compare-and-swap races",
        )?;
        registry.register(Box::new(cas_conflicts.clone()))?;

        Ok(Self {
            suggestions_total,
            algorithm_duration,
            fallbacks_total,
            cache_hits,
            cache_misses,
            cache_invalidations,
            transitions_total,
            cas_conflicts,
            registry,
        })
    }

    /// Record a computed suggestion set
    pub fn record_suggestions(&self, algorithm: &str, duration_seconds: f64) {
        self.suggestions_total.with_label_values(&[algorithm]).inc();
        self.algorithm_duration
            .with_label_values(&[algorithm])
            .observe(duration_seconds);
    }

    /// Record a fallback to greedy
    pub fn record_fallback(&self) {
        self.fallbacks_total.inc();
    }

    /// Record a cache lookup
    pub fn record_cache_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.inc();
        } else {
            self.cache_misses.inc();
        }
    }

    /// Record invalidated cache entries
    pub fn record_invalidations(&self, count: usize) {
        self.cache_invalidations.inc_by(count as u64);
    }

    /// Record a lifecycle transition
    pub fn record_transition(&self, transition: &str, outcome: &str) {
        self.transitions_total
            .with_label_values(&[transition, outcome])
            .inc();
    }

    /// Record a lost CAS race
    pub fn record_cas_conflict(&self) {
        self.cas_conflicts.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the text exposition format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::Error::Metrics(e.to_string()))
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("collectors", &self.registry.gather().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_independent_registries() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();

        first.record_fallback();

        assert_eq!(first.fallbacks_total.get(), 1);
        assert_eq!(second.fallbacks_total.get(), 0);
    }

    #[test]
    fn test_render_contains_recorded_series() {
        let metrics = Metrics::new().unwrap();
        metrics.record_suggestions("greedy", 0.0001);
        metrics.record_cache_lookup(true);
        metrics.record_transition("complete", "completed");

        let text = metrics.render().unwrap();

        assert!(text.contains("settlement_suggestions_total{algorithm=\"greedy\"} 1"));
        assert!(text.contains("settlement_cache_hits_total 1"));
        assert!(text.contains("outcome=\"completed\""));
    }
}
