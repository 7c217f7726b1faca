//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `token_ledger_commits_total` - Units of work committed
//! - `token_ledger_rollbacks_total` - Units of work discarded on error
//! - `token_ledger_commit_duration_seconds` - Lock-to-commit latency
//! - `token_ledger_insufficient_balance_total` - Debits refused for lack of funds

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Committed units of work
    pub commits_total: IntCounter,

    /// Rolled back units of work
    pub rollbacks_total: IntCounter,

    /// Commit duration histogram
    pub commit_duration: Histogram,

    /// Debits refused for insufficient balance
    pub insufficient_balance_total: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector on a private registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let commits_total = IntCounter::new(
            "token_ledger_commits_total",
            "Units of work committed",
        )?;
        registry.register(Box::new(commits_total.clone()))?;

        let rollbacks_total = IntCounter::new(
            "token_ledger_rollbacks_total",
            "Units of work discarded on error",
        )?;
        registry.register(Box::new(rollbacks_total.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "token_ledger_commit_duration_seconds",
                "Lock-to-commit latency",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        let insufficient_balance_total = IntCounter::new(
            "token_ledger_insufficient_balance_total",
            "Debits refused for insufficient balance",
        )?;
        registry.register(Box::new(insufficient_balance_total.clone()))?;

        Ok(Self {
            commits_total,
            rollbacks_total,
            commit_duration,
            insufficient_balance_total,
            registry,
        })
    }

    /// Record a committed unit of work
    pub fn record_commit(&self, duration_seconds: f64) {
        self.commits_total.inc();
        self.commit_duration.observe(duration_seconds);
    }

    /// Record a discarded unit of work
    pub fn record_rollback(&self) {
        self.rollbacks_total.inc();
    }

    /// Record a refused debit
    pub fn record_insufficient_balance(&self) {
        self.insufficient_balance_total.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation_is_repeatable() {
        // Private registries: two collectors must not clash
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        assert_eq!(first.commits_total.get(), 0);
        assert_eq!(second.rollbacks_total.get(), 0);
    }

    #[test]
    fn test_record_commit_and_rollback() {
        let metrics = Metrics::new().unwrap();
        metrics.record_commit(0.002);
        metrics.record_commit(0.004);
        metrics.record_rollback();

        assert_eq!(metrics.commits_total.get(), 2);
        assert_eq!(metrics.rollbacks_total.get(), 1);
        assert_eq!(metrics.commit_duration.get_sample_count(), 2);
    }

    #[test]
    fn test_registry_gathers_all_families() {
        let metrics = Metrics::new().unwrap();
        metrics.record_insufficient_balance();
        let families = metrics.registry().gather();
        assert_eq!(families.len(), 4);
    }
}
