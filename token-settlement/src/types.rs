//! Settlement request and receipt types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use token_ledger::{Balance, Transaction, TransactionId, TransactionStatus, UserId};

/// Result of starting a token purchase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseIntent {
    /// Tokens credited once payment succeeds
    pub tokens: i64,
    /// Client-facing payment handle
    pub payment_handle: String,
    /// Processor reference stored on the pending purchase
    pub external_reference: String,
    /// Pending purchase row
    pub transaction_id: TransactionId,
}

/// Result of a tip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipReceipt {
    /// Tipper balance after the tip
    pub new_balance: i64,
    /// Creator who received the tokens
    pub recipient_id: UserId,
    /// Creator display name
    pub recipient_name: String,
    /// Tipper's debit row
    pub debit_transaction_id: TransactionId,
    /// Creator's credit row
    pub credit_transaction_id: TransactionId,
}

/// Result of a cashout request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashoutReceipt {
    /// Pending cashout row
    pub transaction_id: TransactionId,
    /// Tokens debited
    pub tokens: i64,
    /// Amount owed to the creator
    pub payout_usd: Decimal,
    /// Rate applied
    pub rate: Decimal,
    /// Always pending until confirmed
    pub status: TransactionStatus,
    /// Balance after the debit
    pub new_balance: i64,
}

/// Confirmation outcome from the payout collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutOutcome {
    /// Funds delivered
    Paid,
    /// Transfer failed; tokens are returned
    Failed,
    /// Transfer withdrawn; tokens are returned
    Cancelled,
}

impl PayoutOutcome {
    /// Cashout status this outcome settles to
    pub fn status(self) -> TransactionStatus {
        match self {
            PayoutOutcome::Paid => TransactionStatus::Completed,
            PayoutOutcome::Failed => TransactionStatus::Failed,
            PayoutOutcome::Cancelled => TransactionStatus::Cancelled,
        }
    }
}

/// Result of confirming a cashout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashoutSettlement {
    /// Cashout row in its terminal status
    pub cashout: Transaction,
    /// Compensating refund row, when tokens were returned
    pub refund_transaction_id: Option<TransactionId>,
    /// Creator balance afterwards
    pub new_balance: i64,
}

/// Public view of a balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceView {
    /// Tokens held
    pub balance: i64,
    /// Lifetime tokens received as tips
    pub total_earned: i64,
    /// Lifetime tokens tipped or cashed out
    pub total_spent: i64,
}

impl From<Balance> for BalanceView {
    fn from(balance: Balance) -> Self {
        Self {
            balance: balance.balance,
            total_earned: balance.total_earned,
            total_spent: balance.total_spent,
        }
    }
}

/// What a payment notification did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Pending purchase credited
    Credited {
        /// Purchase row
        transaction_id: TransactionId,
        /// Buyer
        user_id: UserId,
        /// Tokens credited
        tokens: i64,
    },
    /// Duplicate notification for a completed purchase
    AlreadyCompleted {
        /// Purchase row
        transaction_id: TransactionId,
    },
    /// Purchase marked failed
    MarkedFailed {
        /// Purchase row
        transaction_id: TransactionId,
    },
    /// Purchase marked cancelled
    MarkedCancelled {
        /// Purchase row
        transaction_id: TransactionId,
    },
    /// Event type not handled
    Ignored {
        /// Event type received
        event_type: String,
    },
}
