//! Main ledger orchestration layer
//!
//! This module ties together storage, locks and units of work into a
//! high-level API. Every balance-affecting operation runs through
//! [`TokenLedger::transact`].
//!
//! # Example
//!
//! ```no_run
//! use token_ledger::{BalanceDelta, BalanceStore, Config, TokenLedger, UserId};
//!
//! fn main() -> token_ledger::Result<()> {
//!     let ledger = TokenLedger::open(&Config::default())?;
//!     let user = UserId::new(7);
//!
//!     let balance = ledger.transact(&[user], |uow| {
//!         uow.apply_delta(user, 10, BalanceDelta::NONE)
//!     })?;
//!     assert_eq!(balance.balance, 10);
//!
//!     Ok(())
//! }
//! ```

use crate::{
    balance::BalanceStore,
    error::Error,
    locks::LockManager,
    metrics::Metrics,
    storage::Storage,
    types::{Balance, Transaction, TransactionId, TransactionType, UserId},
    unit::UnitOfWork,
    Config, Result,
};
use std::time::Instant;

/// Main ledger interface
#[derive(Debug)]
pub struct TokenLedger {
    /// RocksDB storage
    storage: Storage,

    /// Per-user balance locks
    locks: LockManager,

    /// Prometheus collectors
    metrics: Metrics,
}

impl TokenLedger {
    /// Open ledger with configuration
    pub fn open(config: &Config) -> Result<Self> {
        let storage = Storage::open(config)?;
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            data_dir = ?config.data_dir,
            "Ledger opened"
        );

        Ok(Self {
            storage,
            locks: LockManager::new(),
            metrics,
        })
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Run `f` as one atomic unit while holding the locks of `users`
    ///
    /// Locks are taken in ascending user-id order. If `f` returns an error,
    /// or the commit fails, nothing staged by `f` is written.
    pub fn transact<R, E>(
        &self,
        users: &[UserId],
        f: impl FnOnce(&mut UnitOfWork<'_>) -> std::result::Result<R, E>,
    ) -> std::result::Result<R, E>
    where
        E: From<Error>,
    {
        self.locks.with_locked(users, |locked| {
            let started = Instant::now();
            let mut uow = UnitOfWork::new(&self.storage, &self.metrics, locked);

            let value = match f(&mut uow) {
                Ok(value) => value,
                Err(err) => {
                    self.metrics.record_rollback();
                    tracing::debug!(users = ?locked, "Unit of work rolled back");
                    return Err(err);
                }
            };

            if let Err(err) = self.storage.commit(&uow.into_changes()) {
                self.metrics.record_rollback();
                return Err(err.into());
            }

            self.metrics.record_commit(started.elapsed().as_secs_f64());
            Ok(value)
        })
    }

    /// Current balance; creates a zeroed row on first access
    pub fn balance(&self, user_id: UserId) -> Result<Balance> {
        if let Some(balance) = self.storage.get_balance(user_id)? {
            return Ok(balance);
        }
        self.transact(&[user_id], |uow| uow.get(user_id))
    }

    /// Transaction by id
    pub fn transaction(&self, id: TransactionId) -> Result<Transaction> {
        self.storage
            .get_transaction(id)?
            .ok_or(Error::TransactionNotFound(id))
    }

    /// Unique lookup by external reference
    pub fn find_by_external_reference(&self, reference: &str) -> Result<Option<Transaction>> {
        match self.storage.transaction_id_by_external_reference(reference)? {
            Some(id) => self.storage.get_transaction(id),
            None => Ok(None),
        }
    }

    /// A user's transactions, newest first
    pub fn list_transactions(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        self.storage.user_transactions(user_id, limit, offset)
    }

    /// Users that have a balance row
    pub fn known_users(&self) -> Result<Vec<UserId>> {
        self.storage.balance_user_ids()
    }

    /// Recompute a user's balance from their rows and compare
    ///
    /// Holds the user's lock so the balance and the rows are read consistently.
    pub fn verify_conservation(&self, user_id: UserId) -> Result<ConservationReport> {
        self.locks.with_locked(&[user_id], |_| {
            let balance = self
                .storage
                .get_balance(user_id)?
                .unwrap_or_else(|| Balance::zeroed(user_id));
            let rows = self.storage.user_transactions(user_id, usize::MAX, 0)?;
            ConservationReport::compute(balance, &rows)
        })
    }
}

/// Result of recomputing one user's balance from the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConservationReport {
    /// Stored aggregate
    pub balance: Balance,
    /// Σ amount over applied rows
    pub applied_sum: i64,
    /// Σ completed incoming tips
    pub expected_earned: i64,
    /// Σ completed outgoing tips and cashouts
    pub expected_spent: i64,
    /// Tokens awaiting purchase confirmation
    pub pending_purchase_tokens: i64,
    /// Rows inspected
    pub transaction_count: usize,
}

impl ConservationReport {
    fn compute(balance: Balance, rows: &[Transaction]) -> Result<Self> {
        let user_id = balance.user_id;
        let overflow =
            || Error::InvariantViolation(format!("token sum overflows for user {}", user_id));
        let add = |total: i64, amount: i64| total.checked_add(amount).ok_or_else(overflow);
        let sub = |total: i64, amount: i64| total.checked_sub(amount).ok_or_else(overflow);

        let mut report = Self {
            balance,
            applied_sum: 0,
            expected_earned: 0,
            expected_spent: 0,
            pending_purchase_tokens: 0,
            transaction_count: rows.len(),
        };

        for tx in rows {
            if tx.is_applied() {
                report.applied_sum = add(report.applied_sum, tx.amount)?;
            }
            match tx.tx_type {
                TransactionType::Tip if tx.is_applied() => {
                    if tx.amount > 0 {
                        report.expected_earned = add(report.expected_earned, tx.amount)?;
                    } else {
                        report.expected_spent = sub(report.expected_spent, tx.amount)?;
                    }
                }
                TransactionType::Cashout => {
                    report.expected_spent = sub(report.expected_spent, tx.amount)?;
                }
                TransactionType::Purchase if !tx.status.is_terminal() => {
                    report.pending_purchase_tokens =
                        add(report.pending_purchase_tokens, tx.amount)?;
                }
                _ => {}
            }
        }

        Ok(report)
    }

    /// All invariants hold
    pub fn holds(&self) -> bool {
        self.balance.balance >= 0
            && self.balance.balance == self.applied_sum
            && self.balance.total_earned == self.expected_earned
            && self.balance.total_spent == self.expected_spent
    }
}
