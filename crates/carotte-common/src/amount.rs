//! Currency amounts
//!
//! User-facing amounts are decimal euros. The card stores a 16-bit unsigned
//! count of cents, so every conversion goes through [`to_minor_units`], which
//! rounds half away from zero at two decimal places and refuses anything the
//! card cannot represent.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Reasons an amount cannot be sent to the card.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    /// Input text is not a decimal number.
    #[error("amount is not a number: {0:?}")]
    NotNumeric(String),

    /// Zero or negative; the protocol only moves value in one direction per command.
    #[error("amount must be strictly positive")]
    NotPositive,

    /// Larger than the card's 16-bit cent counter.
    #[error("amount exceeds the card limit of {max} cents")]
    TooLarge {
        /// Largest representable amount in cents.
        max: u16,
    },
}

/// Parse a user-typed amount. Accepts `,` as decimal separator.
pub fn parse_amount(text: &str) -> Result<Decimal, AmountError> {
    let normalized = text.trim().replace(',', ".");
    if normalized.is_empty() {
        return Err(AmountError::NotNumeric(text.to_string()));
    }
    Decimal::from_str(&normalized).map_err(|_| AmountError::NotNumeric(text.to_string()))
}

/// Euros to a whole number of cents, rounding half away from zero at 2
/// decimal places. Shared by the card and the ledger.
pub fn round_to_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        * Decimal::ONE_HUNDRED
}

/// Convert euros to card cents.
pub fn to_minor_units(amount: Decimal) -> Result<u16, AmountError> {
    let cents = round_to_cents(amount);

    if cents <= Decimal::ZERO {
        return Err(AmountError::NotPositive);
    }

    cents
        .to_u16()
        .ok_or(AmountError::TooLarge { max: u16::MAX })
}

/// Cents back to euros with a fixed scale of 2.
pub fn from_minor_units(cents: u16) -> Decimal {
    Decimal::new(i64::from(cents), 2)
}

/// Format cents as `"12.34"`.
pub fn format_cents(cents: u16) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_to_cents_keeps_sign() {
        assert_eq!(round_to_cents(dec!(3.505)), dec!(351));
        assert_eq!(round_to_cents(dec!(-0.005)), dec!(-1));
        assert_eq!(round_to_cents(dec!(1000000)), dec!(100000000));
    }

    #[test]
    fn test_rounds_half_away_from_zero() {
        assert_eq!(to_minor_units(dec!(5.00)), Ok(500));
        assert_eq!(to_minor_units(dec!(0.005)), Ok(1));
        assert_eq!(to_minor_units(dec!(1.234)), Ok(123));
        assert_eq!(to_minor_units(dec!(1.235)), Ok(124));
    }

    #[test]
    fn test_rejects_non_positive() {
        assert_eq!(to_minor_units(dec!(0)), Err(AmountError::NotPositive));
        assert_eq!(to_minor_units(dec!(-3.50)), Err(AmountError::NotPositive));
        // rounds to zero cents
        assert_eq!(to_minor_units(dec!(0.004)), Err(AmountError::NotPositive));
    }

    #[test]
    fn test_rejects_amounts_above_card_limit() {
        assert_eq!(to_minor_units(dec!(655.35)), Ok(u16::MAX));
        assert_eq!(
            to_minor_units(dec!(655.36)),
            Err(AmountError::TooLarge { max: u16::MAX })
        );
    }

    #[test]
    fn test_parse_amount_accepts_comma() {
        assert_eq!(parse_amount("3,50"), Ok(dec!(3.50)));
        assert_eq!(parse_amount(" 12.5 "), Ok(dec!(12.5)));
        assert!(matches!(parse_amount("abc"), Err(AmountError::NotNumeric(_))));
        assert!(matches!(parse_amount(""), Err(AmountError::NotNumeric(_))));
    }

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(1250), "12.50");
        assert_eq!(from_minor_units(350), dec!(3.50));
    }

    proptest! {
        #[test]
        fn prop_cents_survive_conversion(cents in 1u16..=u16::MAX) {
            prop_assert_eq!(to_minor_units(from_minor_units(cents)), Ok(cents));
        }

        #[test]
        fn prop_negative_amounts_always_rejected(raw in i64::MIN / 4..=0i64, scale in 0u32..6) {
            let amount = Decimal::new(raw, scale);
            prop_assert_eq!(to_minor_units(amount), Err(AmountError::NotPositive));
        }
    }
}
