//! Token Settlement Engine
//!
//! Moves tokens between users on top of [`token_ledger`]: purchases paid
//! through an external processor, tips to content creators, and creator
//! cashouts at a performance-dependent rate.
//!
//! # Architecture

#![forbid(unsafe_code)]
//!
//! 1. **Purchase**: Request a payment intent, record a pending purchase
//! 2. **Reconciliation**: Verify the processor's signed notification, credit once
//! 3. **Tip**: Debit tipper and credit creator in one unit of work
//! 4. **Cashout**: Debit now at the current payout rate, confirm or refund later
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use token_settlement::{
//!     content::InMemoryDirectory, gateway::mock::MockPaymentGateway, Config, SettlementEngine,
//! };
//! use token_ledger::UserId;
//!
//! #[tokio::main]
//! async fn main() -> token_settlement::Result<()> {
//!     let config = Config::from_env()?;
//!     let engine = SettlementEngine::open(
//!         config,
//!         Arc::new(MockPaymentGateway::new()),
//!         Arc::new(InMemoryDirectory::new()),
//!     )?;
//!
//!     let intent = engine
//!         .create_purchase_intent(UserId::new(1), rust_decimal::Decimal::from(5))
//!         .await?;
//!     println!("Pay {} to receive {} tokens", intent.payment_handle, intent.tokens);
//!
//!     Ok(())
//! }
//! ```

#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod payout;
pub mod gateway;
pub mod content;
pub mod webhook;
pub mod reconciler;
pub mod error;
pub mod config;
pub mod metrics;
pub mod engine;

// Re-exports
pub use config::Config;
pub use engine::{CreditOutcome, SettlementEngine};
pub use error::{Result, SettlementError};
pub use payout::PayoutPolicy;
pub use reconciler::Reconciler;
pub use types::*;
