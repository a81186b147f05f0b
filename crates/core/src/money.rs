use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Exclusive upper bound for a plausible receipt total.
pub const MAX_AMOUNT: i64 = 10_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("Not a number: '{0}'")]
    Invalid(String),
    #[error("Amount {0} outside the accepted range (0, 10000000)")]
    OutOfRange(i64),
}

/// A receipt total in whole currency units, always inside `(0, MAX_AMOUNT)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    pub fn new(value: i64) -> Result<Self, AmountError> {
        if value > 0 && value < MAX_AMOUNT {
            Ok(Amount(value))
        } else {
            Err(AmountError::OutOfRange(value))
        }
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = AmountError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> i64 {
        amount.0
    }
}

/// Parses digit groups such as `1,234`, `1234` or `1,234.50`.
/// Grouping separators are stripped and a fractional part is rounded away.
impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ',' | ' ' | '\''))
            .collect();
        if clean.is_empty() || !clean.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(AmountError::Invalid(s.to_string()));
        }
        let dec = Decimal::from_str(&clean).map_err(|_| AmountError::Invalid(s.to_string()))?;
        let whole = dec
            .round()
            .to_i64()
            .ok_or_else(|| AmountError::Invalid(s.to_string()))?;
        Amount::new(whole)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.0.to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, c) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(c);
        }
        write!(f, "¥{grouped}")
    }
}
