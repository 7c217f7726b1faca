//! In-memory payment gateway

use super::{IntentRequest, PaymentGateway, PaymentIntent};
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// In-memory processor for tests and local runs
#[derive(Debug, Default, Clone)]
pub struct MockPaymentGateway {
    intents: Arc<RwLock<HashMap<String, IntentRequest>>>,
    failing: Arc<AtomicBool>,
}

impl MockPaymentGateway {
    /// Gateway that issues intents until told to fail
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `create_intent` fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Request behind an issued intent
    pub async fn intent(&self, external_reference: &str) -> Option<IntentRequest> {
        self.intents.read().await.get(external_reference).cloned()
    }

    /// Intents issued so far
    pub async fn intent_count(&self) -> usize {
        self.intents.read().await.len()
    }

    /// Notification payload the processor would send for an issued intent
    pub async fn notification(&self, external_reference: &str, event_type: &str) -> Option<String> {
        let request = self.intent(external_reference).await?;
        let event = serde_json::json!({
            "id": format!("evt_{}", Uuid::new_v4().simple()),
            "type": event_type,
            "data": {
                "object": {
                    "id": external_reference,
                    "amount": request.amount_cents,
                    "currency": request.currency,
                    "metadata": request.metadata(),
                }
            }
        });
        Some(event.to_string())
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent> {
        if self.failing.load(Ordering::SeqCst) {
            warn!(user_id = %request.user_id, "Mock gateway: simulated intent failure");
            return Err(SettlementError::PaymentIntentFailed(
                "Simulated processor failure".to_string(),
            ));
        }

        let external_reference = format!("pi_{}", Uuid::new_v4().simple());
        let client_secret = format!("{}_secret_{}", external_reference, Uuid::new_v4().simple());

        self.intents
            .write()
            .await
            .insert(external_reference.clone(), request.clone());

        info!(
            reference = %external_reference,
            amount_cents = request.amount_cents,
            "Mock gateway: intent created"
        );

        Ok(PaymentIntent {
            external_reference,
            client_secret,
            created_at: Utc::now(),
        })
    }
}
