//! Token Ledger
//!
//! Balance store and append-only transaction ledger for a per-user token
//! economy, persisted in RocksDB.
//!
//! # Architecture
//!
//! - **Unit of Work**: Every mutation is staged, then committed as one `WriteBatch`
//! - **Per-user Locks**: Read-modify-write of a balance happens under its owner's lock
//! - **Ordered Acquisition**: Multi-user operations lock in ascending user id
//! - **Append-only Rows**: Only a row's status changes, along a fixed state machine

#![forbid(unsafe_code)]
//!
//! # Invariants
//!
//! - Balance = Σ amount over applied rows (completed rows, plus cashout debits)
//! - Balance never negative
//! - Lifetime earned/spent counters never decrease
//! - External references unique across all rows

#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod storage;
pub mod balance;
pub mod journal;
pub mod locks;
pub mod unit;
pub mod ledger;
pub mod error;
pub mod config;
pub mod metrics;

// Re-exports
pub use balance::BalanceStore;
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use journal::TransactionJournal;
pub use ledger::{ConservationReport, TokenLedger};
pub use types::{
    Balance, BalanceDelta, ContentId, NewTransaction, Transaction, TransactionId,
    TransactionStatus, TransactionType, UserId,
};
pub use unit::UnitOfWork;
