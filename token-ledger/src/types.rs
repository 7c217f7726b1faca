//! Core types for the token ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (integer token units, never floats)
//! - Time-ordered identifiers (UUIDv7) so per-user history sorts by id

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Transaction identifier (UUIDv7 for time-ordering)
pub type TransactionId = Uuid;

/// User (account) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(u64);

impl UserId {
    /// Create new user ID
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw value
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Big-endian key bytes (sorts numerically in RocksDB)
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Content (chapter) identifier, used as tip context
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentId(u64);

impl ContentId {
    /// Create new content ID
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw value
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of ledger movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TransactionType {
    /// Tokens bought with real money
    Purchase = 1,
    /// Tokens moved from a reader to a creator
    Tip = 2,
    /// Tokens leaving circulation for a payout
    Cashout = 3,
    /// Compensating credit
    Refund = 4,
}

impl TransactionType {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Purchase => "purchase",
            TransactionType::Tip => "tip",
            TransactionType::Cashout => "cashout",
            TransactionType::Refund => "refund",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction status
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TransactionStatus {
    /// Awaiting external confirmation
    Pending = 1,
    /// Final, effect applied
    Completed = 2,
    /// Final, rejected by the external side
    Failed = 3,
    /// Final, withdrawn
    Cancelled = 4,
}

impl TransactionStatus {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    /// Check if status is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// State machine: `pending -> {completed, failed, cancelled}`
    pub fn can_transition_to(&self, to: TransactionStatus) -> bool {
        matches!(self, TransactionStatus::Pending) && to.is_terminal()
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger row: one signed token movement for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique ID (UUIDv7)
    pub id: TransactionId,

    /// Account affected
    pub user_id: UserId,

    /// Kind of movement
    pub tx_type: TransactionType,

    /// Signed token amount (positive = credit, negative = debit)
    pub amount: i64,

    /// Payment processor reference (required for purchases)
    pub external_reference: Option<String>,

    /// Other side of a tip
    pub counterparty_id: Option<UserId>,

    /// Content that was tipped
    pub chapter_reference: Option<ContentId>,

    /// Current status
    pub status: TransactionStatus,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Whether this row's amount is reflected in the owner's balance.
    ///
    /// Cashout debits are taken at creation, so they count in every status;
    /// a failed or cancelled cashout is offset by a separate refund row.
    pub fn is_applied(&self) -> bool {
        match self.tx_type {
            TransactionType::Cashout => true,
            _ => self.status == TransactionStatus::Completed,
        }
    }
}

/// Transaction to be appended (id and timestamps assigned by the ledger)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    /// Account affected
    pub user_id: UserId,
    /// Kind of movement
    pub tx_type: TransactionType,
    /// Signed token amount
    pub amount: i64,
    /// Payment processor reference
    pub external_reference: Option<String>,
    /// Other side of a tip
    pub counterparty_id: Option<UserId>,
    /// Content that was tipped
    pub chapter_reference: Option<ContentId>,
    /// Initial status (`Pending` or `Completed`)
    pub status: TransactionStatus,
}

impl NewTransaction {
    /// Pending purchase awaiting processor confirmation
    pub fn purchase(user_id: UserId, tokens: i64, external_reference: impl Into<String>) -> Self {
        Self {
            user_id,
            tx_type: TransactionType::Purchase,
            amount: tokens,
            external_reference: Some(external_reference.into()),
            counterparty_id: None,
            chapter_reference: None,
            status: TransactionStatus::Pending,
        }
    }

    /// Completed tip row; `amount` is negative for the tipper, positive for the creator
    pub fn tip(user_id: UserId, amount: i64, counterparty: UserId, content: ContentId) -> Self {
        Self {
            user_id,
            tx_type: TransactionType::Tip,
            amount,
            external_reference: None,
            counterparty_id: Some(counterparty),
            chapter_reference: Some(content),
            status: TransactionStatus::Completed,
        }
    }

    /// Pending cashout debit
    pub fn cashout(user_id: UserId, tokens: i64) -> Self {
        Self {
            user_id,
            tx_type: TransactionType::Cashout,
            amount: -tokens,
            external_reference: None,
            counterparty_id: None,
            chapter_reference: None,
            status: TransactionStatus::Pending,
        }
    }

    /// Completed compensating credit
    pub fn refund(user_id: UserId, tokens: i64) -> Self {
        Self {
            user_id,
            tx_type: TransactionType::Refund,
            amount: tokens,
            external_reference: None,
            counterparty_id: None,
            chapter_reference: None,
            status: TransactionStatus::Completed,
        }
    }
}

/// Per-user balance aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Owner
    pub user_id: UserId,

    /// Spendable tokens (never negative)
    pub balance: i64,

    /// Lifetime tokens received as tips
    pub total_earned: i64,

    /// Lifetime tokens tipped away or cashed out
    pub total_spent: i64,

    /// Last mutation
    pub last_updated: DateTime<Utc>,
}

impl Balance {
    /// Zeroed balance for a user seen for the first time
    pub fn zeroed(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: 0,
            total_earned: 0,
            total_spent: 0,
            last_updated: Utc::now(),
        }
    }
}

/// Counter adjustments that accompany a balance change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceDelta {
    /// Added to `total_earned`
    pub earned: i64,
    /// Added to `total_spent`
    pub spent: i64,
}

impl BalanceDelta {
    /// No counter change
    pub const NONE: BalanceDelta = BalanceDelta { earned: 0, spent: 0 };

    /// Increase `total_earned`
    pub fn earned(amount: i64) -> Self {
        Self { earned: amount, spent: 0 }
    }

    /// Increase `total_spent`
    pub fn spent(amount: i64) -> Self {
        Self { earned: 0, spent: amount }
    }
}
