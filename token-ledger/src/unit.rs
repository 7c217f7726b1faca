//! Unit of work
//!
//! A [`UnitOfWork`] stages balance and transaction writes in memory while the
//! owning users' locks are held. Reads see the staged state first. Nothing is
//! visible to anyone else until the unit is committed as one RocksDB
//! `WriteBatch`; dropping it discards every staged write.

use crate::{
    balance::{self, BalanceStore},
    error::{Error, Result},
    journal::{self, TransactionJournal},
    metrics::Metrics,
    storage::{ChangeSet, Storage},
    types::{
        Balance, BalanceDelta, NewTransaction, Transaction, TransactionId, TransactionStatus,
        UserId,
    },
};
use chrono::Utc;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Staged writes for one atomic operation
#[derive(Debug)]
pub struct UnitOfWork<'a> {
    storage: &'a Storage,
    metrics: &'a Metrics,
    locked: &'a [UserId],
    balances: BTreeMap<UserId, Balance>,
    inserted: Vec<Transaction>,
    updated: BTreeMap<TransactionId, Transaction>,
}

impl<'a> UnitOfWork<'a> {
    pub(crate) fn new(storage: &'a Storage, metrics: &'a Metrics, locked: &'a [UserId]) -> Self {
        Self {
            storage,
            metrics,
            locked,
            balances: BTreeMap::new(),
            inserted: Vec::new(),
            updated: BTreeMap::new(),
        }
    }

    /// Users whose locks this unit holds
    pub fn locked_users(&self) -> &[UserId] {
        self.locked
    }

    fn ensure_locked(&self, user_id: UserId) -> Result<()> {
        if self.locked.binary_search(&user_id).is_ok() {
            Ok(())
        } else {
            Err(Error::InvariantViolation(format!(
                "User {} mutated without holding its lock",
                user_id
            )))
        }
    }

    fn load_balance(&self, user_id: UserId) -> Result<Balance> {
        if let Some(staged) = self.balances.get(&user_id) {
            return Ok(staged.clone());
        }
        Ok(self
            .storage
            .get_balance(user_id)?
            .unwrap_or_else(|| Balance::zeroed(user_id)))
    }

    fn load_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        if let Some(tx) = self.inserted.iter().find(|tx| tx.id == id) {
            return Ok(Some(tx.clone()));
        }
        if let Some(tx) = self.updated.get(&id) {
            return Ok(Some(tx.clone()));
        }
        self.storage.get_transaction(id)
    }

    /// Whether anything has been staged
    pub fn is_empty(&self) -> bool {
        self.balances.is_empty() && self.inserted.is_empty() && self.updated.is_empty()
    }

    pub(crate) fn into_changes(self) -> ChangeSet {
        ChangeSet {
            balances: self.balances.into_values().collect(),
            inserted: self.inserted,
            updated: self.updated.into_values().collect(),
        }
    }
}

impl BalanceStore for UnitOfWork<'_> {
    fn get(&mut self, user_id: UserId) -> Result<Balance> {
        let balance = self.load_balance(user_id)?;
        // First sighting: persist the zeroed row if we hold the lock for it
        if !self.balances.contains_key(&user_id)
            && self.locked.binary_search(&user_id).is_ok()
            && self.storage.get_balance(user_id)?.is_none()
        {
            self.balances.insert(user_id, balance.clone());
        }
        Ok(balance)
    }

    fn apply_delta(
        &mut self,
        user_id: UserId,
        amount: i64,
        delta: BalanceDelta,
    ) -> Result<Balance> {
        self.ensure_locked(user_id)?;
        let current = self.load_balance(user_id)?;
        let next = balance::apply_delta(&current, amount, delta).map_err(|err| {
            if matches!(err, Error::InsufficientBalance { .. }) {
                self.metrics.record_insufficient_balance();
            }
            err
        })?;
        self.balances.insert(user_id, next.clone());
        Ok(next)
    }
}

impl TransactionJournal for UnitOfWork<'_> {
    fn append(&mut self, new_tx: NewTransaction) -> Result<Transaction> {
        self.ensure_locked(new_tx.user_id)?;
        journal::validate_new_transaction(&new_tx)?;

        if let Some(reference) = &new_tx.external_reference {
            let staged = self
                .inserted
                .iter()
                .any(|tx| tx.external_reference.as_deref() == Some(reference.as_str()));
            if staged
                || self
                    .storage
                    .transaction_id_by_external_reference(reference)?
                    .is_some()
            {
                return Err(Error::DuplicateExternalReference(reference.clone()));
            }
        }

        let now = Utc::now();
        let tx = Transaction {
            id: Uuid::now_v7(),
            user_id: new_tx.user_id,
            tx_type: new_tx.tx_type,
            amount: new_tx.amount,
            external_reference: new_tx.external_reference,
            counterparty_id: new_tx.counterparty_id,
            chapter_reference: new_tx.chapter_reference,
            status: new_tx.status,
            created_at: now,
            updated_at: now,
        };

        self.inserted.push(tx.clone());
        Ok(tx)
    }

    fn transition(&mut self, id: TransactionId, to: TransactionStatus) -> Result<Transaction> {
        let mut tx = self
            .load_transaction(id)?
            .ok_or(Error::TransactionNotFound(id))?;
        self.ensure_locked(tx.user_id)?;

        if !tx.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                id,
                from: tx.status,
                to,
            });
        }

        tx.status = to;
        tx.updated_at = Utc::now();

        if let Some(staged) = self.inserted.iter_mut().find(|staged| staged.id == id) {
            *staged = tx.clone();
        } else {
            self.updated.insert(id, tx.clone());
        }

        Ok(tx)
    }

    fn transaction(&mut self, id: TransactionId) -> Result<Transaction> {
        self.load_transaction(id)?
            .ok_or(Error::TransactionNotFound(id))
    }

    fn find_by_external_reference(&mut self, reference: &str) -> Result<Option<Transaction>> {
        if let Some(tx) = self
            .inserted
            .iter()
            .find(|tx| tx.external_reference.as_deref() == Some(reference))
        {
            return Ok(Some(tx.clone()));
        }
        match self.storage.transaction_id_by_external_reference(reference)? {
            Some(id) => self.load_transaction(id),
            None => Ok(None),
        }
    }
}
