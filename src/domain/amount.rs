//! Amount type
//!
//! Domain primitive for monetary amounts expressed in minor currency units
//! (cents, øre, ören). Amounts are validated at construction time, so an
//! `Amount` in hand is always positive and below the ledger ceiling.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Currency;

/// Maximum allowed amount in minor units (1 trillion major units)
const MAX_MINOR_UNITS: u64 = 100_000_000_000_000;

/// Amount represents a validated monetary value in minor units.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - Maximum value is 10^14 minor units
///
/// # Example
/// ```
/// use sepa_ledger::domain::Amount;
///
/// let amount = Amount::new(25_000).unwrap();
/// assert_eq!(amount.minor_units(), 25_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Amount(u64);

/// Errors that can occur when creating an Amount
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must be positive (got {0})")]
    NotPositive(u64),

    #[error("Amount exceeds maximum allowed value ({MAX_MINOR_UNITS})")]
    Overflow,
}

impl Amount {
    /// Create a new Amount with validation.
    ///
    /// # Errors
    /// - `AmountError::NotPositive` if value is zero
    /// - `AmountError::Overflow` if value exceeds the ledger ceiling
    pub fn new(minor_units: u64) -> Result<Self, AmountError> {
        if minor_units == 0 {
            return Err(AmountError::NotPositive(minor_units));
        }

        if minor_units > MAX_MINOR_UNITS {
            return Err(AmountError::Overflow);
        }

        Ok(Self(minor_units))
    }

    /// Get the value in minor units
    pub fn minor_units(&self) -> u64 {
        self.0
    }

    /// Convert to major units for display (e.g. 25000 EUR cents -> 250.00)
    pub fn to_major(&self, currency: Currency) -> Decimal {
        Decimal::new(self.0 as i64, currency.minor_unit_scale())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u64> for Amount {
    type Error = AmountError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for u64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for u128 {
    fn from(amount: Amount) -> Self {
        amount.0 as u128
    }
}
