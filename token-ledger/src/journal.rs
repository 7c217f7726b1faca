//! Transaction Ledger contract
//!
//! Rows are append-only; the status field is the only thing that changes,
//! and only along `pending -> {completed, failed, cancelled}`.

use crate::{
    error::{Error, Result},
    types::{NewTransaction, Transaction, TransactionId, TransactionStatus, TransactionType},
};

/// Transactional access to the ledger rows
pub trait TransactionJournal {
    /// Append a row; assigns id and timestamps
    fn append(&mut self, tx: NewTransaction) -> Result<Transaction>;

    /// Move a pending row to a terminal status
    fn transition(&mut self, id: TransactionId, to: TransactionStatus) -> Result<Transaction>;

    /// Row by id
    fn transaction(&mut self, id: TransactionId) -> Result<Transaction>;

    /// Unique lookup by processor reference
    fn find_by_external_reference(&mut self, reference: &str) -> Result<Option<Transaction>>;
}

/// Shape checks applied before a row is staged
pub fn validate_new_transaction(tx: &NewTransaction) -> Result<()> {
    if tx.amount == 0 {
        return Err(Error::InvalidTransaction("Amount must be non-zero".to_string()));
    }

    if !matches!(
        tx.status,
        TransactionStatus::Pending | TransactionStatus::Completed
    ) {
        return Err(Error::InvalidTransaction(format!(
            "Transactions start pending or completed, not {}",
            tx.status
        )));
    }

    if let Some(reference) = &tx.external_reference {
        if reference.trim().is_empty() {
            return Err(Error::InvalidTransaction(
                "External reference must not be blank".to_string(),
            ));
        }
    }

    match tx.tx_type {
        TransactionType::Purchase => {
            if tx.external_reference.is_none() {
                return Err(Error::InvalidTransaction(
                    "Purchase requires an external reference".to_string(),
                ));
            }
            if tx.amount < 0 {
                return Err(Error::InvalidTransaction("Purchase must credit".to_string()));
            }
        }
        TransactionType::Cashout => {
            if tx.amount > 0 {
                return Err(Error::InvalidTransaction("Cashout must debit".to_string()));
            }
        }
        TransactionType::Refund => {
            if tx.amount < 0 {
                return Err(Error::InvalidTransaction("Refund must credit".to_string()));
            }
        }
        TransactionType::Tip => {
            if tx.counterparty_id.is_none() {
                return Err(Error::InvalidTransaction(
                    "Tip requires a counterparty".to_string(),
                ));
            }
        }
    }

    Ok(())
}
