//! Value objects for the order domain.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A non-negative decimal amount kept in its original string form.
///
/// Amounts travel between services as decimal strings (`"100.00"`), so the
/// string is preserved verbatim and only validated. [`Amount::minor_units`]
/// gives an integer view for comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(String);

impl Amount {
    /// Parses a decimal string of the form `digits[.digits]`.
    pub fn parse(input: impl Into<String>) -> Result<Self, ValidationError> {
        let input = input.into();
        let trimmed = input.trim();

        let (whole, fraction) = match trimmed.split_once('.') {
            Some((w, f)) => (w, Some(f)),
            None => (trimmed, None),
        };

        let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if !digits(whole) || fraction.is_some_and(|f| !digits(f)) {
            return Err(ValidationError::InvalidAmount(input));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Returns the amount as written.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the amount in hundredths (cents), truncating extra decimals.
    ///
    /// Returns `None` if the value does not fit in an `i64`.
    pub fn minor_units(&self) -> Option<i64> {
        let (whole, fraction) = self.0.split_once('.').unwrap_or((&self.0, ""));
        let whole: i64 = whole.parse().ok()?;
        let cents = fraction
            .bytes()
            .chain(std::iter::repeat(b'0'))
            .take(2)
            .fold(0i64, |acc, b| acc * 10 + i64::from(b - b'0'));
        whole.checked_mul(100)?.checked_add(cents)
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0.bytes().all(|b| b == b'0' || b == b'.')
    }
}

impl TryFrom<String> for Amount {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for Amount {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
