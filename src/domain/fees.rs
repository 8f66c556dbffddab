//! Fee schedule
//!
//! Tiered fees over a transaction amount, in FCFA:
//! flat 100 below 5,000, flat 200 up to 20,000, 1% above that.

use rust_decimal::Decimal;

const FLAT_FEE_LOW: i64 = 100;
const FLAT_FEE_MID: i64 = 200;
const LOW_TIER_CEILING: i64 = 5_000;
const MID_TIER_CEILING: i64 = 20_000;

/// Calculate the fee for a transaction amount.
pub fn calculate(amount: Decimal) -> Decimal {
    if amount < Decimal::from(LOW_TIER_CEILING) {
        Decimal::from(FLAT_FEE_LOW)
    } else if amount <= Decimal::from(MID_TIER_CEILING) {
        Decimal::from(FLAT_FEE_MID)
    } else {
        // 1% for amounts above 20,000
        amount / Decimal::from(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_flat_fee_below_low_ceiling() {
        assert_eq!(calculate(dec!(500)), dec!(100));
        assert_eq!(calculate(dec!(4999)), dec!(100));
    }

    #[test]
    fn test_flat_fee_mid_tier() {
        assert_eq!(calculate(dec!(5000)), dec!(200));
        assert_eq!(calculate(dec!(10000)), dec!(200));
        assert_eq!(calculate(dec!(20000)), dec!(200));
    }

    #[test]
    fn test_percentage_above_mid_ceiling() {
        assert_eq!(calculate(dec!(20001)), dec!(200.01));
        assert_eq!(calculate(dec!(100000)), dec!(1000));
        assert_eq!(calculate(dec!(500000)), dec!(5000));
    }
}
