//! Property-based tests for payout rates and conversions

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use token_settlement::payout::{self, PayoutPolicy};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Property: rate stays within [base, max]
    #[test]
    fn prop_rate_bounded(earned in 0i64..10_000_000, followers in 0u64..10_000_000) {
        let rate = PayoutPolicy::default().rate(earned, followers);
        prop_assert!(rate >= dec!(0.60));
        prop_assert!(rate <= dec!(0.90));
    }

    /// Property: more earnings or more followers never lower the rate
    #[test]
    fn prop_rate_monotonic(
        earned in 0i64..5000,
        more_earned in 0i64..5000,
        followers in 0u64..500,
        more_followers in 0u64..500,
    ) {
        let policy = PayoutPolicy::default();
        let base = policy.rate(earned, followers);
        prop_assert!(policy.rate(earned + more_earned, followers) >= base);
        prop_assert!(policy.rate(earned, followers + more_followers) >= base);
    }

    /// Property: payout never exceeds what the tokens cost
    #[test]
    fn prop_payout_below_purchase_value(tokens in 1i64..1_000_000, earned in 0i64..5000, followers in 0u64..500) {
        let rate = PayoutPolicy::default().rate(earned, followers);
        let paid_out = payout::payout_usd(tokens, rate, 10);
        prop_assert!(paid_out < payout::usd_value(tokens, 10));
        prop_assert!(paid_out > Decimal::ZERO);
    }

    /// Property: buying with whole cents yields floor(usd * 10) tokens
    #[test]
    fn prop_tokens_round_down(cents in 1i64..10_000_000) {
        let usd = Decimal::new(cents, 2);
        let tokens = payout::tokens_for_usd(usd, 10).unwrap();
        prop_assert_eq!(tokens, cents / 10);
        prop_assert!(payout::usd_value(tokens, 10) <= usd);
        prop_assert_eq!(payout::usd_to_cents(usd).unwrap(), cents);
    }
}
