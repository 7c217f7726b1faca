//! Payment notification reconciler
//!
//! Consumes signed processor notifications, which may arrive late, twice, or
//! concurrently, and drives each purchase to exactly one terminal outcome.

use crate::{
    engine::{CreditOutcome, SettlementEngine},
    types::ReconcileOutcome,
    webhook::{self, NotificationKind, WebhookVerifier},
    Result, SettlementError,
};
use std::sync::Arc;
use token_ledger::TransactionStatus;

/// Reconciler
#[derive(Debug, Clone)]
pub struct Reconciler {
    engine: Arc<SettlementEngine>,
    verifier: WebhookVerifier,
}

impl Reconciler {
    /// Reconciler using the engine's webhook settings
    pub fn new(engine: Arc<SettlementEngine>) -> Self {
        let verifier = WebhookVerifier::new(&engine.config().webhook);
        Self { engine, verifier }
    }

    /// Signature verifier
    pub fn verifier(&self) -> &WebhookVerifier {
        &self.verifier
    }

    /// Verify and apply one notification
    ///
    /// Nothing is read or written before the signature checks out. Blocks on
    /// the ledger; async callers run it on the blocking pool.
    pub fn reconcile(&self, payload: &[u8], signature_header: &str) -> Result<ReconcileOutcome> {
        if let Err(err) = self.verifier.verify(payload, signature_header) {
            self.engine.metrics().rejected_signatures.inc();
            tracing::warn!(error = %err, "Rejected payment notification");
            return Err(err);
        }

        let notification = webhook::parse_notification(payload)?;
        tracing::debug!(
            event_id = %notification.event_id,
            kind = ?notification.kind,
            "Payment notification verified"
        );

        let close_as = match notification.kind {
            NotificationKind::Succeeded => None,
            NotificationKind::Failed => Some(TransactionStatus::Failed),
            NotificationKind::Canceled => Some(TransactionStatus::Cancelled),
            NotificationKind::Other(event_type) => {
                tracing::debug!(event_type = %event_type, "Ignoring notification");
                return Ok(ReconcileOutcome::Ignored { event_type });
            }
        };

        let reference = notification.external_reference.ok_or_else(|| {
            SettlementError::MalformedNotification("missing payment intent id".to_string())
        })?;

        let Some(status) = close_as else {
            let metadata = notification.metadata.ok_or_else(|| {
                SettlementError::MalformedNotification(format!(
                    "{} without purchase metadata",
                    reference
                ))
            })?;
            return match self
                .engine
                .credit_purchase(&reference, metadata.user_id, metadata.tokens)?
            {
                CreditOutcome::Credited(tx) => Ok(ReconcileOutcome::Credited {
                    transaction_id: tx.id,
                    user_id: tx.user_id,
                    tokens: tx.amount,
                }),
                CreditOutcome::AlreadyCompleted(tx) => Ok(ReconcileOutcome::AlreadyCompleted {
                    transaction_id: tx.id,
                }),
            };
        };

        let tx = self
            .engine
            .close_purchase(&reference, status, notification.metadata)?;
        Ok(if status == TransactionStatus::Failed {
            ReconcileOutcome::MarkedFailed {
                transaction_id: tx.id,
            }
        } else {
            ReconcileOutcome::MarkedCancelled {
                transaction_id: tx.id,
            }
        })
    }
}
