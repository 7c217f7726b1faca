//! Creator payout rates and token/USD conversion
//!
//! All money math uses exact decimals. Rates are fractions of the purchase
//! price a creator receives per token cashed out.

use crate::{Result, SettlementError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Payout rate thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayoutPolicy {
    /// Rate every creator starts at
    pub base_rate: Decimal,

    /// Bonus once lifetime earnings exceed `earnings_threshold`
    pub earnings_bonus: Decimal,

    /// Lifetime tokens earned needed for the earnings bonus (exclusive)
    pub earnings_threshold: i64,

    /// Bonus once followers exceed `follower_threshold`
    pub follower_bonus: Decimal,

    /// Followers needed for the follower bonus (exclusive)
    pub follower_threshold: u64,

    /// Upper bound on the rate
    pub max_rate: Decimal,
}

impl Default for PayoutPolicy {
    fn default() -> Self {
        Self {
            base_rate: dec!(0.60),
            earnings_bonus: dec!(0.10),
            earnings_threshold: 1000,
            follower_bonus: dec!(0.10),
            follower_threshold: 100,
            max_rate: dec!(0.90),
        }
    }
}

impl PayoutPolicy {
    /// Payout rate for a creator
    pub fn rate(&self, total_earned: i64, follower_count: u64) -> Decimal {
        let mut rate = self.base_rate;
        if total_earned > self.earnings_threshold {
            rate += self.earnings_bonus;
        }
        if follower_count > self.follower_threshold {
            rate += self.follower_bonus;
        }
        rate.min(self.max_rate)
    }

    /// Check bounds
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(SettlementError::Config(msg.to_string()));

        if self.base_rate.is_sign_negative()
            || self.earnings_bonus.is_sign_negative()
            || self.follower_bonus.is_sign_negative()
        {
            return invalid("payout rates must not be negative");
        }
        if self.max_rate < self.base_rate {
            return invalid("max_rate must be at least base_rate");
        }
        if self.max_rate > Decimal::ONE {
            return invalid("max_rate must not exceed 1");
        }
        Ok(())
    }
}

/// USD paid out for `tokens` at `rate`
pub fn payout_usd(tokens: i64, rate: Decimal, tokens_per_dollar: u32) -> Decimal {
    Decimal::from(tokens) * rate / Decimal::from(tokens_per_dollar)
}

/// USD a user pays for `tokens`
pub fn usd_value(tokens: i64, tokens_per_dollar: u32) -> Decimal {
    Decimal::from(tokens) / Decimal::from(tokens_per_dollar)
}

/// Whole tokens bought by `usd`, rounded down
pub fn tokens_for_usd(usd: Decimal, tokens_per_dollar: u32) -> Result<i64> {
    usd.checked_mul(Decimal::from(tokens_per_dollar))
        .and_then(|tokens| tokens.floor().to_i64())
        .ok_or_else(|| SettlementError::InvalidAmount(format!("{} is out of range", usd)))
}

/// Processor amount in cents, truncated
pub fn usd_to_cents(usd: Decimal) -> Result<i64> {
    usd.checked_mul(dec!(100))
        .and_then(|cents| cents.trunc().to_i64())
        .ok_or_else(|| SettlementError::InvalidAmount(format!("{} is out of range", usd)))
}
