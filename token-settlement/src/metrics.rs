//! Settlement metrics
//!
//! - `token_settlement_purchases_initiated_total`
//! - `token_settlement_purchases_credited_total`
//! - `token_settlement_duplicate_notifications_total`
//! - `token_settlement_rejected_signatures_total`
//! - `token_settlement_tips_total` / `token_settlement_tipped_tokens_total`
//! - `token_settlement_cashouts_total`
//! - `token_settlement_cashout_compensations_total`

use prometheus::{IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Payment intents issued
    pub purchases_initiated: IntCounter,

    /// Purchases credited after a successful payment
    pub purchases_credited: IntCounter,

    /// Notifications for already-completed purchases
    pub duplicate_notifications: IntCounter,

    /// Notifications refused at signature verification
    pub rejected_signatures: IntCounter,

    /// Tips committed
    pub tips: IntCounter,

    /// Tokens moved by tips
    pub tipped_tokens: IntCounter,

    /// Cashouts requested
    pub cashouts: IntCounter,

    /// Failed or cancelled cashouts refunded
    pub cashout_compensations: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector on a private registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());
        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        Ok(Self {
            purchases_initiated: counter(
                "token_settlement_purchases_initiated_total",
                "Payment intents issued",
            )?,
            purchases_credited: counter(
                "token_settlement_purchases_credited_total",
                "Purchases credited",
            )?,
            duplicate_notifications: counter(
                "token_settlement_duplicate_notifications_total",
                "Notifications for already-completed purchases",
            )?,
            rejected_signatures: counter(
                "token_settlement_rejected_signatures_total",
                "Notifications with invalid signatures",
            )?,
            tips: counter("token_settlement_tips_total", "Tips committed")?,
            tipped_tokens: counter(
                "token_settlement_tipped_tokens_total",
                "Tokens moved by tips",
            )?,
            cashouts: counter("token_settlement_cashouts_total", "Cashouts requested")?,
            cashout_compensations: counter(
                "token_settlement_cashout_compensations_total",
                "Cashouts refunded after failure or cancellation",
            )?,
            registry,
        })
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
