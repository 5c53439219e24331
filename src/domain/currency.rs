//! Currency type
//!
//! Currencies known to the ledger. Each currency maps to its own ledger
//! number (ISO 4217 numeric code) so that transfers can never cross
//! currencies inside the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Currencies accepted by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Eur,
    Nok,
    Sek,
    Dkk,
    Usd,
    Gbp,
}

/// Errors that can occur when parsing a currency code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CurrencyError {
    #[error("Unknown currency code: {0}")]
    Unknown(String),
}

impl Currency {
    /// Currencies eligible for SEPA transfers, in provisioning order
    pub const SEPA: [Currency; 4] = [Currency::Eur, Currency::Nok, Currency::Sek, Currency::Dkk];

    /// ISO 4217 alphabetic code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Eur => "EUR",
            Currency::Nok => "NOK",
            Currency::Sek => "SEK",
            Currency::Dkk => "DKK",
            Currency::Usd => "USD",
            Currency::Gbp => "GBP",
        }
    }

    /// Ledger number used by the engine (ISO 4217 numeric code)
    pub fn ledger_code(&self) -> u32 {
        match self {
            Currency::Eur => 978,
            Currency::Nok => 578,
            Currency::Sek => 752,
            Currency::Dkk => 208,
            Currency::Usd => 840,
            Currency::Gbp => 826,
        }
    }

    /// Reverse of [`Currency::ledger_code`]
    pub fn from_ledger_code(code: u32) -> Option<Self> {
        Self::all().into_iter().find(|c| c.ledger_code() == code)
    }

    /// Number of decimal places in the minor unit
    pub fn minor_unit_scale(&self) -> u32 {
        2
    }

    /// Whether this currency can be moved through the SEPA flow
    pub fn is_sepa(&self) -> bool {
        Self::SEPA.contains(self)
    }

    fn all() -> [Currency; 6] {
        [
            Currency::Eur,
            Currency::Nok,
            Currency::Sek,
            Currency::Dkk,
            Currency::Usd,
            Currency::Gbp,
        ]
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        Self::all()
            .into_iter()
            .find(|c| c.code() == code)
            .ok_or(CurrencyError::Unknown(s.to_string()))
    }
}
