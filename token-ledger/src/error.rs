//! Error types for the ledger

use crate::types::{TransactionId, TransactionStatus, UserId};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad error classes, used by callers to decide how to report a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, rejected before any mutation
    Validation,
    /// Request conflicts with current state; may succeed later
    Conflict,
    /// External collaborator failed or was not trusted
    External,
    /// Defect signal: the operation was aborted and rolled back
    Integrity,
    /// Storage or infrastructure failure
    Internal,
}

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Balance would go negative
    #[error("Insufficient balance for user {user_id}: required {required}, available {available}")]
    InsufficientBalance {
        /// Account
        user_id: UserId,
        /// Tokens requested
        required: i64,
        /// Tokens held
        available: i64,
    },

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Status change not allowed by the state machine
    #[error("Invalid transition for transaction {id}: {from} -> {to}")]
    InvalidTransition {
        /// Transaction
        id: TransactionId,
        /// Current status
        from: TransactionStatus,
        /// Requested status
        to: TransactionStatus,
    },

    /// External reference already recorded
    #[error("Duplicate external reference: {0}")]
    DuplicateExternalReference(String),

    /// Malformed transaction
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Invariant violation (negative balance, unlocked mutation, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidTransaction(_) => ErrorKind::Validation,
            Error::InsufficientBalance { .. } | Error::DuplicateExternalReference(_) => {
                ErrorKind::Conflict
            }
            Error::TransactionNotFound(_)
            | Error::InvalidTransition { .. }
            | Error::InvariantViolation(_) => ErrorKind::Integrity,
            Error::Storage(_) | Error::Serialization(_) | Error::Config(_) | Error::Io(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::InsufficientBalance {
            user_id: UserId::new(1),
            required: 10,
            available: 3,
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("required 10, available 3"));

        let err = Error::InvariantViolation("negative balance".to_string());
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }
}
