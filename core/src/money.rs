//! Money amounts in minor units.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An amount in the currency's minor unit (cents) with an ISO 4217 code.
///
/// Amounts are integers to avoid floating point drift when prorating refunds.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Amount in minor units.
    pub cents: i64,
    /// Lower-case ISO 4217 currency code, as the payment provider reports it.
    pub currency: String,
}

impl Money {
    /// Create an amount from minor units.
    #[must_use]
    pub fn new(cents: i64, currency: impl Into<String>) -> Self {
        Self {
            cents,
            currency: currency.into().to_ascii_lowercase(),
        }
    }

    /// Zero in the same currency.
    #[must_use]
    pub fn zero_like(&self) -> Self {
        Self {
            cents: 0,
            currency: self.currency.clone(),
        }
    }

    /// Whether the amount is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.cents == 0
    }

    /// `percent` of this amount, rounded down to the minor unit.
    #[must_use]
    pub fn percent(&self, percent: u8) -> Self {
        let percent = i64::from(percent.min(100));
        Self {
            cents: self.cents * percent / 100,
            currency: self.currency.clone(),
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02} {}",
            self.cents / 100,
            (self.cents % 100).abs(),
            self.currency.to_ascii_uppercase()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_rounds_down_and_caps() {
        let paid = Money::new(9_999, "USD");
        assert_eq!(paid.percent(50).cents, 4_999);
        assert_eq!(paid.percent(150).cents, 9_999);
        assert_eq!(paid.currency, "usd");
    }

    #[test]
    fn display_uses_major_units() {
        assert_eq!(Money::new(12_345, "eur").to_string(), "123.45 EUR");
    }
}
