//! Amount type for transaction values
//!
//! Internally stores amounts in whole cents to avoid floating-point drift.
//! On the wire an amount is a plain decimal number (`12.5`), which is what
//! exported files and older on-disk formats contain. Amounts are never
//! negative: direction is carried by the transaction kind.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// A non-negative monetary amount stored as cents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(u64);

impl Amount {
    /// Create an amount from cents
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Create a zero amount
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Get the amount in cents
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Check if the amount is zero
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Convert from a decimal value, rounding to the nearest cent
    ///
    /// Negative values are accepted and stored by magnitude, as older data
    /// encoded expenses with a minus sign.
    pub fn from_decimal(value: f64) -> Result<Self, AmountParseError> {
        if !value.is_finite() {
            return Err(AmountParseError::InvalidFormat(value.to_string()));
        }
        let cents = (value.abs() * 100.0).round();
        if cents > u64::MAX as f64 {
            return Err(AmountParseError::OutOfRange(value.to_string()));
        }
        Ok(Self(cents as u64))
    }

    /// The amount as a decimal value
    pub fn to_decimal(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Parse an amount from a string
    ///
    /// Accepts formats: "10.50", "$10.50", "10", "10.5", "-10.50"
    pub fn parse(s: &str) -> Result<Self, AmountParseError> {
        let s = s.trim();
        let s = s.strip_prefix('-').unwrap_or(s);
        let s = s.strip_prefix('$').unwrap_or(s).replace(',', "");

        let invalid = || AmountParseError::InvalidFormat(s.to_string());
        let digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());

        let cents = if let Some((whole, fraction)) = s.split_once('.') {
            if !digits(whole) || !digits(fraction) || (whole.is_empty() && fraction.is_empty()) {
                return Err(invalid());
            }
            let whole: u64 = if whole.is_empty() {
                0
            } else {
                whole
                    .parse()
                    .map_err(|_| AmountParseError::OutOfRange(s.to_string()))?
            };

            // Pad or truncate cents to 2 digits
            let cents: String = fraction.chars().take(2).collect();
            let fraction: u64 = match cents.len() {
                0 => 0,
                1 => cents.parse::<u64>().map_err(|_| invalid())? * 10,
                _ => cents.parse().map_err(|_| invalid())?,
            };

            whole
                .checked_mul(100)
                .and_then(|c| c.checked_add(fraction))
                .ok_or_else(|| AmountParseError::OutOfRange(s.to_string()))?
        } else {
            if s.is_empty() || !digits(&s) {
                return Err(invalid());
            }
            s.parse::<u64>()
                .map_err(|_| AmountParseError::OutOfRange(s.to_string()))?
                .checked_mul(100)
                .ok_or_else(|| AmountParseError::OutOfRange(s.to_string()))?
        };

        Ok(Self(cents))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Self(iter.map(|a| a.0).sum())
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_decimal())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a decimal amount as a number or string")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
                Amount::from_decimal(v).map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
                Amount::from_decimal(v as f64).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                Amount::from_decimal(v as f64).map_err(E::custom)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                Amount::parse(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

/// Error type for amount parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmountParseError {
    InvalidFormat(String),
    OutOfRange(String),
}

impl fmt::Display for AmountParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmountParseError::InvalidFormat(s) => write!(f, "Invalid amount format: {}", s),
            AmountParseError::OutOfRange(s) => write!(f, "Amount out of range: {}", s),
        }
    }
}

impl std::error::Error for AmountParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Amount::from_cents(1050)), "10.50");
        assert_eq!(format!("{}", Amount::from_cents(0)), "0.00");
        assert_eq!(format!("{}", Amount::from_cents(5)), "0.05");
    }

    #[test]
    fn test_parse() {
        assert_eq!(Amount::parse("10.50").unwrap().cents(), 1050);
        assert_eq!(Amount::parse("$10.50").unwrap().cents(), 1050);
        assert_eq!(Amount::parse("-10.50").unwrap().cents(), 1050);
        assert_eq!(Amount::parse("10").unwrap().cents(), 1000);
        assert_eq!(Amount::parse("10.5").unwrap().cents(), 1050);
        assert_eq!(Amount::parse("0.05").unwrap().cents(), 5);
        assert_eq!(Amount::parse("1,250.00").unwrap().cents(), 125000);
        assert!(Amount::parse("ten").is_err());
    }

    #[test]
    fn test_parse_rejects_non_digits() {
        assert!(matches!(
            Amount::parse("1.5€"),
            Err(AmountParseError::InvalidFormat(_))
        ));
        assert!(matches!(
            Amount::parse("1.€5"),
            Err(AmountParseError::InvalidFormat(_))
        ));
        assert!(Amount::parse("1.+5").is_err());
        assert!(Amount::parse("+5").is_err());
        assert!(Amount::parse(".").is_err());
        assert!(Amount::parse("").is_err());

        // Extra fraction digits are truncated, not rounded
        assert_eq!(Amount::parse("1.999").unwrap().cents(), 199);
        assert_eq!(Amount::parse("5.").unwrap().cents(), 500);
        assert_eq!(Amount::parse(".5").unwrap().cents(), 50);
    }

    #[test]
    fn test_string_amount_with_symbol_is_rejected() {
        let result: Result<Amount, _> = serde_json::from_str("\"1.5€\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_decimal_rounds() {
        assert_eq!(Amount::from_decimal(0.1 + 0.2).unwrap().cents(), 30);
        assert_eq!(Amount::from_decimal(-12.34).unwrap().cents(), 1234);
        assert!(Amount::from_decimal(f64::NAN).is_err());
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&Amount::from_cents(1050)).unwrap();
        assert_eq!(json, "10.5");

        let from_number: Amount = serde_json::from_str("10.5").unwrap();
        let from_integer: Amount = serde_json::from_str("10").unwrap();
        let from_string: Amount = serde_json::from_str("\"10.50\"").unwrap();
        assert_eq!(from_number.cents(), 1050);
        assert_eq!(from_integer.cents(), 1000);
        assert_eq!(from_string.cents(), 1050);
    }

    #[test]
    fn test_sum() {
        let total: Amount = [100, 200, 300].into_iter().map(Amount::from_cents).sum();
        assert_eq!(total.cents(), 600);
    }
}
