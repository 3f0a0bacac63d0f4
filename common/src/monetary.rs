//! Monetary amounts for BatchSettle.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Result, SettleError};

/// Conventional number of fractional digits for display and rounding.
pub const MONETARY_SCALE: u32 = 2;

/// A fixed-point monetary amount.
///
/// Arithmetic keeps the full precision of the underlying decimal; the
/// conventional two-digit scale is only applied by [`Amount::round`] and
/// when formatting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(Decimal);

impl Amount {
    /// The zero amount.
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    /// Create an amount from a decimal value.
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Parse an amount from its decimal string form.
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(SettleError::invalid("amount", "Amount must not be empty"));
        }
        Decimal::from_str_exact(trimmed)
            .map(Self)
            .map_err(|e| SettleError::invalid("amount", format!("Malformed amount '{value}': {e}")))
    }

    /// Get the underlying decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Check if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Check if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Reject negative amounts with an `InvalidArgument` naming `field`.
    pub fn ensure_non_negative(self, field: &str) -> Result<Self> {
        if self.is_negative() {
            return Err(SettleError::invalid(
                field,
                format!("{field} must not be negative, got {self}"),
            ));
        }
        Ok(self)
    }

    /// Round to the conventional monetary scale (banker's rounding).
    pub fn round(&self) -> Self {
        Self(self.0.round_dp(MONETARY_SCALE))
    }

    /// Checked addition; `None` when the result leaves the decimal range.
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Checked subtraction; `None` when the result leaves the decimal range.
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// Checked sum; `None` when any partial sum leaves the decimal range.
    pub fn checked_sum<I: IntoIterator<Item = Amount>>(amounts: I) -> Option<Amount> {
        amounts.into_iter().try_fold(Amount::ZERO, Amount::checked_add)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut value = self.0;
        if value.scale() < MONETARY_SCALE {
            value.rescale(MONETARY_SCALE);
        }
        write!(f, "{value}")
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl FromStr for Amount {
    type Err = SettleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_and_display() {
        let amount = Amount::parse("25.5").unwrap();
        assert_eq!(amount.value(), dec!(25.5));
        assert_eq!(amount.to_string(), "25.50");

        assert_eq!(Amount::parse("10").unwrap().to_string(), "10.00");
        assert_eq!(Amount::parse("0.125").unwrap().to_string(), "0.125");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            Amount::parse(""),
            Err(SettleError::InvalidArgument { .. })
        ));
        assert!(matches!(
            Amount::parse("ten"),
            Err(SettleError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_negative_detection() {
        assert!(Amount::new(dec!(-0.01)).is_negative());
        assert!(!Amount::new(dec!(-0)).is_negative());
        assert!(!Amount::ZERO.is_negative());
        assert!(Amount::new(dec!(-1)).ensure_non_negative("amount").is_err());
        assert!(Amount::new(dec!(1)).ensure_non_negative("amount").is_ok());
    }

    #[test]
    fn test_accumulation_keeps_precision() {
        let parts = vec![Amount::new(dec!(0.001)); 1000];
        let total = Amount::checked_sum(parts).unwrap();
        assert_eq!(total.value(), dec!(1.000));
        assert_eq!(Amount::new(dec!(0.005)).round().value(), dec!(0.00));
        assert_eq!(Amount::new(dec!(0.015)).round().value(), dec!(0.02));
    }

    #[test]
    fn test_checked_add_overflow() {
        assert!(Amount::new(Decimal::MAX).checked_add(Amount::new(dec!(1))).is_none());
    }

    #[test]
    fn test_checked_sum_overflow() {
        let max = Amount::new(Decimal::MAX);
        assert_eq!(Amount::checked_sum([max]), Some(max));
        assert_eq!(Amount::checked_sum([max, max]), None);
        assert_eq!(Amount::checked_sum(Vec::new()), Some(Amount::ZERO));
    }
}
