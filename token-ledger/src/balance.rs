//! Balance Store
//!
//! The only way to change a [`Balance`] is [`BalanceStore::apply_delta`], which
//! refuses anything that would take the balance below zero or move a lifetime
//! counter backwards.

use crate::{
    error::{Error, Result},
    types::{Balance, BalanceDelta, UserId},
};
use chrono::Utc;

/// Transactional access to per-user balances
pub trait BalanceStore {
    /// Current balance; a user seen for the first time gets a zeroed row
    fn get(&mut self, user_id: UserId) -> Result<Balance>;

    /// Add `amount` (signed) to the balance and bump the lifetime counters
    ///
    /// Fails with [`Error::InsufficientBalance`] if the result would be negative.
    fn apply_delta(&mut self, user_id: UserId, amount: i64, delta: BalanceDelta)
        -> Result<Balance>;
}

/// Compute the balance after a delta, without touching storage
pub fn apply_delta(balance: &Balance, amount: i64, delta: BalanceDelta) -> Result<Balance> {
    if delta.earned < 0 || delta.spent < 0 {
        return Err(Error::InvariantViolation(format!(
            "Lifetime counters are monotonic (earned {}, spent {})",
            delta.earned, delta.spent
        )));
    }

    let new_balance = balance
        .balance
        .checked_add(amount)
        .ok_or_else(|| Error::InvariantViolation("Balance overflow".to_string()))?;

    if new_balance < 0 {
        return Err(Error::InsufficientBalance {
            user_id: balance.user_id,
            required: -amount,
            available: balance.balance,
        });
    }

    let total_earned = balance
        .total_earned
        .checked_add(delta.earned)
        .ok_or_else(|| Error::InvariantViolation("total_earned overflow".to_string()))?;
    let total_spent = balance
        .total_spent
        .checked_add(delta.spent)
        .ok_or_else(|| Error::InvariantViolation("total_spent overflow".to_string()))?;

    Ok(Balance {
        user_id: balance.user_id,
        balance: new_balance,
        total_earned,
        total_spent,
        last_updated: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance_of(tokens: i64) -> Balance {
        let mut balance = Balance::zeroed(UserId::new(1));
        balance.balance = tokens;
        balance
    }

    #[test]
    fn test_debit_and_credit() {
        let debited = apply_delta(&balance_of(100), -30, BalanceDelta::spent(30)).unwrap();
        assert_eq!(debited.balance, 70);
        assert_eq!(debited.total_spent, 30);
        assert_eq!(debited.total_earned, 0);

        let credited = apply_delta(&debited, 30, BalanceDelta::earned(30)).unwrap();
        assert_eq!(credited.balance, 100);
        assert_eq!(credited.total_earned, 30);
    }

    #[test]
    fn test_debit_to_exactly_zero_allowed() {
        let result = apply_delta(&balance_of(10), -10, BalanceDelta::NONE).unwrap();
        assert_eq!(result.balance, 0);
    }

    #[test]
    fn test_overdraft_rejected() {
        let err = apply_delta(&balance_of(10), -11, BalanceDelta::spent(11)).unwrap_err();
        match err {
            Error::InsufficientBalance {
                required,
                available,
                ..
            } => {
                assert_eq!(required, 11);
                assert_eq!(available, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_negative_counter_delta_rejected() {
        let result = apply_delta(
            &balance_of(10),
            5,
            BalanceDelta {
                earned: -5,
                spent: 0,
            },
        );
        assert!(matches!(result, Err(Error::InvariantViolation(_))));
    }

    #[test]
    fn test_overflow_rejected() {
        let result = apply_delta(&balance_of(i64::MAX), 1, BalanceDelta::NONE);
        assert!(matches!(result, Err(Error::InvariantViolation(_))));
    }
}
