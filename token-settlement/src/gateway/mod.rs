//! Payment processor boundary
//!
//! The processor issues payment intents for token purchases and later calls
//! back with a signed notification (see [`crate::webhook`]).

pub mod mock;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use token_ledger::UserId;

/// Metadata key carrying the buyer
pub const METADATA_USER_ID: &str = "user_id";

/// Metadata key carrying the tokens to credit
pub const METADATA_TOKENS: &str = "tokens_to_award";

/// Request for a new payment intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRequest {
    /// Charge in the currency's minor unit
    pub amount_cents: i64,
    /// ISO currency code, lowercase
    pub currency: String,
    /// Buyer
    pub user_id: UserId,
    /// Tokens credited once paid
    pub tokens: i64,
}

impl IntentRequest {
    /// Metadata attached to the intent and echoed back in notifications
    pub fn metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (METADATA_USER_ID.to_string(), self.user_id.to_string()),
            (METADATA_TOKENS.to_string(), self.tokens.to_string()),
        ])
    }
}

/// Intent issued by the processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Processor id; becomes the purchase's external reference
    pub external_reference: String,
    /// Handle the client uses to complete payment
    pub client_secret: String,
    /// Issue time
    pub created_at: DateTime<Utc>,
}

/// Payment processor client
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment intent; fails with `PaymentIntentFailed`
    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent>;
}
