//! Error types for settlement engine

use rust_decimal::Decimal;
use thiserror::Error;
use token_ledger::{ErrorKind, TransactionId, TransactionStatus, UserId};

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, SettlementError>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum SettlementError {
    /// Amount is zero, negative, or converts to zero tokens
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Tipper is the creator of the content
    #[error("Cannot tip your own content")]
    SelfTipNotAllowed,

    /// Cashout below the configured minimum
    #[error("Cashout below minimum: requested {requested}, minimum {minimum}")]
    BelowMinimum {
        /// Configured minimum
        minimum: i64,
        /// Requested tokens
        requested: i64,
    },

    /// Not enough tokens
    #[error("Insufficient balance for user {user_id}: required {required}, available {available}")]
    InsufficientBalance {
        /// Debited user
        user_id: UserId,
        /// Tokens needed
        required: i64,
        /// Tokens held
        available: i64,
    },

    /// Tip target missing, unpublished, private, or without a creator
    #[error("Tip target not found: {0}")]
    TargetNotFound(u64),

    /// Duplicate external reference
    #[error("Duplicate external reference: {0}")]
    DuplicateExternalReference(String),

    /// Payment processor could not issue an intent
    #[error("Payment intent failed: {0}")]
    PaymentIntentFailed(String),

    /// Notification signature missing, stale, or wrong
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Notification payload could not be understood
    #[error("Malformed notification: {0}")]
    MalformedNotification(String),

    /// No pending purchase for the reference
    #[error("Unknown or terminated transaction: {0}")]
    UnknownOrTerminatedTransaction(String),

    /// Notification metadata disagrees with the stored purchase
    #[error("Notification mismatch for {reference}: {detail}")]
    NotificationMismatch {
        /// External reference
        reference: String,
        /// What disagreed
        detail: String,
    },

    /// Transaction is not a cashout
    #[error("Transaction {0} is not a cashout")]
    NotCashout(TransactionId),

    /// Cashout already reached a terminal status
    #[error("Cashout {id} already settled as {status}")]
    AlreadySettled {
        /// Cashout transaction
        id: TransactionId,
        /// Terminal status
        status: TransactionStatus,
    },

    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(token_ledger::Error),

    /// Blocking ledger task panicked or was cancelled
    #[error("Ledger worker failed: {0}")]
    Worker(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SettlementError {
    /// Error category
    pub fn kind(&self) -> ErrorKind {
        match self {
            SettlementError::InvalidAmount(_)
            | SettlementError::SelfTipNotAllowed
            | SettlementError::BelowMinimum { .. }
            | SettlementError::TargetNotFound(_)
            | SettlementError::MalformedNotification(_)
            | SettlementError::NotCashout(_) => ErrorKind::Validation,
            SettlementError::InsufficientBalance { .. }
            | SettlementError::DuplicateExternalReference(_)
            | SettlementError::AlreadySettled { .. } => ErrorKind::Conflict,
            SettlementError::PaymentIntentFailed(_) | SettlementError::InvalidSignature(_) => {
                ErrorKind::External
            }
            SettlementError::UnknownOrTerminatedTransaction(_)
            | SettlementError::NotificationMismatch { .. } => ErrorKind::Integrity,
            SettlementError::Ledger(err) => err.kind(),
            SettlementError::Worker(_) | SettlementError::Config(_) | SettlementError::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Integrity defects are logged before being returned
    pub(crate) fn logged(self) -> Self {
        if self.kind() == ErrorKind::Integrity {
            tracing::error!(error = %self, "Integrity violation");
        }
        self
    }
}

impl From<token_ledger::Error> for SettlementError {
    fn from(err: token_ledger::Error) -> Self {
        match err {
            token_ledger::Error::InsufficientBalance {
                user_id,
                required,
                available,
            } => SettlementError::InsufficientBalance {
                user_id,
                required,
                available,
            },
            token_ledger::Error::DuplicateExternalReference(reference) => {
                SettlementError::DuplicateExternalReference(reference)
            }
            other => SettlementError::Ledger(other),
        }
    }
}

pub(crate) fn invalid_amount(amount: impl Into<Decimal>) -> SettlementError {
    SettlementError::InvalidAmount(format!("{} must be positive", amount.into()))
}
