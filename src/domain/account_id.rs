//! Account identifiers
//!
//! Customer accounts are addressed by their numeric ledger id; system
//! accounts by a symbolic key that the directory resolves to a ledger id.
//! The two textual spaces are disjoint: symbolic keys always start with a
//! letter prefix, customer ids are digits only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::currency::Currency;

/// Prefixes that mark a symbolic system account key
pub const SYSTEM_KEY_PREFIXES: [&str; 2] = ["SYSTEM-", "SEPA-"];

/// Errors that can occur when parsing an account identifier
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountKeyError {
    #[error("Empty account identifier")]
    Empty,

    #[error("Malformed system account key: {0}")]
    MalformedKey(String),

    #[error("Customer account id out of range: {0}")]
    OutOfRange(String),

    #[error("Not an account identifier: {0}")]
    Unrecognized(String),
}

/// True for strings in the symbolic system-account space
pub fn is_system_account(identifier: &str) -> bool {
    SYSTEM_KEY_PREFIXES
        .iter()
        .any(|prefix| identifier.starts_with(prefix))
}

/// True for strings in the numeric customer-account space
pub fn is_customer_account(identifier: &str) -> bool {
    !identifier.is_empty() && identifier.bytes().all(|b| b.is_ascii_digit())
}

/// The three SEPA system account types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SepaAccountType {
    OutgoingSuspense,
    IncomingSuspense,
    Settlement,
}

impl SepaAccountType {
    pub const ALL: [SepaAccountType; 3] = [
        SepaAccountType::OutgoingSuspense,
        SepaAccountType::IncomingSuspense,
        SepaAccountType::Settlement,
    ];

    /// Directory category, e.g. `SEPA_OUTGOING_SUSPENSE`
    pub fn category(&self) -> &'static str {
        match self {
            SepaAccountType::OutgoingSuspense => "SEPA_OUTGOING_SUSPENSE",
            SepaAccountType::IncomingSuspense => "SEPA_INCOMING_SUSPENSE",
            SepaAccountType::Settlement => "SEPA_SETTLEMENT",
        }
    }

    /// Segment used inside the symbolic key
    fn key_segment(&self) -> &'static str {
        match self {
            SepaAccountType::OutgoingSuspense => "OUT-SUSPENSE",
            SepaAccountType::IncomingSuspense => "IN-SUSPENSE",
            SepaAccountType::Settlement => "SETTLEMENT",
        }
    }

    /// Account code stored on the ledger account
    pub fn ledger_code(&self) -> u16 {
        match self {
            SepaAccountType::OutgoingSuspense => 3001,
            SepaAccountType::IncomingSuspense => 3002,
            SepaAccountType::Settlement => 3003,
        }
    }

    /// Human description persisted in the directory
    pub fn describe(&self, currency: Currency) -> String {
        match self {
            SepaAccountType::OutgoingSuspense => {
                format!("SEPA outgoing transfer suspense account for {}", currency)
            }
            SepaAccountType::IncomingSuspense => {
                format!("SEPA incoming transfer suspense account for {}", currency)
            }
            SepaAccountType::Settlement => format!("SEPA settlement account for {}", currency),
        }
    }
}

/// Symbolic key of a system account
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SystemAccountKey {
    /// `SEPA-{OUT|IN}-SUSPENSE-{CURRENCY}` or `SEPA-SETTLEMENT-{CURRENCY}`
    Sepa {
        account_type: SepaAccountType,
        currency: Currency,
    },
    /// `SYSTEM-{TYPE}-{CURRENCY}`
    General {
        account_type: String,
        currency: Currency,
    },
}

impl SystemAccountKey {
    pub fn sepa(account_type: SepaAccountType, currency: Currency) -> Self {
        Self::Sepa {
            account_type,
            currency,
        }
    }

    pub fn general(account_type: &str, currency: Currency) -> Result<Self, AccountKeyError> {
        let account_type = account_type.to_ascii_uppercase();
        if !is_general_type(&account_type) {
            return Err(AccountKeyError::MalformedKey(account_type));
        }
        Ok(Self::General {
            account_type,
            currency,
        })
    }

    pub fn currency(&self) -> Currency {
        match self {
            Self::Sepa { currency, .. } | Self::General { currency, .. } => *currency,
        }
    }

    /// Directory category of this key
    pub fn category(&self) -> String {
        match self {
            Self::Sepa { account_type, .. } => account_type.category().to_string(),
            Self::General { account_type, .. } => format!("SYSTEM_{}", account_type),
        }
    }

    /// All 12 SEPA keys (3 types x 4 currencies)
    pub fn all_sepa() -> Vec<SystemAccountKey> {
        SepaAccountType::ALL
            .iter()
            .flat_map(|t| Currency::SEPA.iter().map(move |c| Self::sepa(*t, *c)))
            .collect()
    }
}

fn is_general_type(account_type: &str) -> bool {
    !account_type.is_empty()
        && account_type
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}

impl fmt::Display for SystemAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sepa {
                account_type,
                currency,
            } => write!(f, "SEPA-{}-{}", account_type.key_segment(), currency),
            Self::General {
                account_type,
                currency,
            } => write!(f, "SYSTEM-{}-{}", account_type, currency),
        }
    }
}

impl FromStr for SystemAccountKey {
    type Err = AccountKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || AccountKeyError::MalformedKey(s.to_string());

        let (body, currency) = s.rsplit_once('-').ok_or_else(malformed)?;
        let currency: Currency = currency.parse().map_err(|_| malformed())?;

        if let Some(segment) = body.strip_prefix("SEPA-") {
            let account_type = SepaAccountType::ALL
                .into_iter()
                .find(|t| t.key_segment() == segment)
                .ok_or_else(malformed)?;
            return Ok(Self::sepa(account_type, currency));
        }

        if let Some(account_type) = body.strip_prefix("SYSTEM-") {
            if !is_general_type(account_type) {
                return Err(malformed());
            }
            return Ok(Self::General {
                account_type: account_type.to_string(),
                currency,
            });
        }

        Err(malformed())
    }
}

/// Either a customer account (numeric ledger id) or a system account (symbolic key)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccountIdentifier {
    Customer(u128),
    System(SystemAccountKey),
}

impl fmt::Display for AccountIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Customer(id) => write!(f, "{}", id),
            Self::System(key) => write!(f, "{}", key),
        }
    }
}

impl FromStr for AccountIdentifier {
    type Err = AccountKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(AccountKeyError::Empty);
        }
        if is_system_account(s) {
            return s.parse().map(Self::System);
        }
        if is_customer_account(s) {
            return s
                .parse::<u128>()
                .map(Self::Customer)
                .map_err(|_| AccountKeyError::OutOfRange(s.to_string()));
        }
        Err(AccountKeyError::Unrecognized(s.to_string()))
    }
}
