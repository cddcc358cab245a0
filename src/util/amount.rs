use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

use alloy_primitives::U256;

use crate::types::TokenAmount;

/// A price-like numeric value in human-readable currency format.
/// Accepts strings like `"0.01"`, `"$10.50"`, `"1,000"`, or raw numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct MoneyAmount(pub Decimal);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AmountParseError {
    #[error("invalid number format")]
    InvalidFormat,
    #[error("amount must be between {} and {}", bounds::MIN_STR, bounds::MAX_STR)]
    OutOfRange,
    #[error("negative value is not allowed")]
    Negative,
    #[error("amount has {amount} fractional digits, token supports {token}")]
    PrecisionLoss { amount: u32, token: u32 },
}

mod bounds {
    use super::*;
    use once_cell::sync::Lazy;

    pub const MIN_STR: &str = "0.000000000000000001";
    pub const MAX_STR: &str = "999999999999";

    pub static MIN: Lazy<Decimal> = Lazy::new(|| Decimal::from_str(MIN_STR).expect("valid decimal"));
    pub static MAX: Lazy<Decimal> = Lazy::new(|| Decimal::from_str(MAX_STR).expect("valid decimal"));
}

impl MoneyAmount {
    pub fn parse(input: &str) -> Result<Self, AmountParseError> {
        // Strip currency symbols and thousands separators.
        let cleaned = Regex::new(r"[^\d\.\-]+")
            .expect("valid amount regex")
            .replace_all(input, "")
            .to_string();

        let parsed = Decimal::from_str(&cleaned).map_err(|_| AmountParseError::InvalidFormat)?;

        if parsed.is_sign_negative() {
            return Err(AmountParseError::Negative);
        }
        if parsed < *bounds::MIN || parsed > *bounds::MAX {
            return Err(AmountParseError::OutOfRange);
        }
        Ok(MoneyAmount(parsed))
    }

    /// Digits after the decimal point in the original input.
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// Absolute mantissa as an unsigned integer. The mantissa of `12.34` is `1234`.
    pub fn mantissa(&self) -> u128 {
        self.0.mantissa().unsigned_abs()
    }

    /// Scale this amount to a token's smallest unit.
    ///
    /// `"0.01"` with 6 decimals becomes `10_000`. More fractional digits than the
    /// token carries is an error, not a silent rounding.
    pub fn as_token_amount(&self, decimals: u32) -> Result<TokenAmount, AmountParseError> {
        let scale = self.scale();
        if scale > decimals {
            return Err(AmountParseError::PrecisionLoss {
                amount: scale,
                token: decimals,
            });
        }
        let multiplier = U256::from(10).pow(U256::from(decimals - scale));
        let value = U256::from(self.mantissa()) * multiplier;
        Ok(TokenAmount(value))
    }
}

impl FromStr for MoneyAmount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl TryFrom<&str> for MoneyAmount {
    type Error = AmountParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        MoneyAmount::from_str(value)
    }
}

impl From<u128> for MoneyAmount {
    fn from(value: u128) -> Self {
        MoneyAmount(Decimal::from(value))
    }
}

impl TryFrom<f64> for MoneyAmount {
    type Error = AmountParseError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        let decimal = Decimal::from_f64(value).ok_or(AmountParseError::OutOfRange)?;
        if decimal.is_sign_negative() {
            return Err(AmountParseError::Negative);
        }
        if decimal < *bounds::MIN || decimal > *bounds::MAX {
            return Err(AmountParseError::OutOfRange);
        }
        Ok(MoneyAmount(decimal))
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cent_at_six_decimals() {
        let amount = MoneyAmount::parse("0.01").unwrap();
        assert_eq!(
            amount.as_token_amount(6).unwrap(),
            TokenAmount::from(10_000u64)
        );
    }

    #[test]
    fn whole_unit_at_six_decimals() {
        let amount = MoneyAmount::parse("1").unwrap();
        assert_eq!(
            amount.as_token_amount(6).unwrap(),
            TokenAmount::from(1_000_000u64)
        );
    }

    #[test]
    fn excess_precision_is_rejected() {
        let amount = MoneyAmount::parse("0.0000001").unwrap();
        assert_eq!(
            amount.as_token_amount(6),
            Err(AmountParseError::PrecisionLoss {
                amount: 7,
                token: 6
            })
        );
    }

    #[test]
    fn currency_symbols_are_stripped() {
        let amount = MoneyAmount::parse("$10.50").unwrap();
        assert_eq!(
            amount.as_token_amount(6).unwrap(),
            TokenAmount::from(10_500_000u64)
        );
    }

    #[test]
    fn negative_is_rejected() {
        assert_eq!(MoneyAmount::parse("-1"), Err(AmountParseError::Negative));
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(
            MoneyAmount::parse("not a number"),
            Err(AmountParseError::InvalidFormat)
        );
    }
}
