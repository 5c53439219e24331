//! IBAN and BIC validation
//!
//! IBANs are checked against the ISO 13616 registry length for their country
//! and the mod-97 checksum. SEPA membership is a separate check because a
//! structurally valid IBAN (e.g. a Brazilian one) may still be outside the
//! payment scheme.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// IBAN length per country (ISO 13616 registry)
const IBAN_LENGTHS: &[(&str, usize)] = &[
    ("AD", 24), ("AE", 23), ("AL", 28), ("AT", 20), ("AZ", 28), ("BA", 20),
    ("BE", 16), ("BG", 22), ("BH", 22), ("BR", 29), ("CH", 21), ("CR", 22),
    ("CY", 28), ("CZ", 24), ("DE", 22), ("DK", 18), ("DO", 28), ("EE", 20),
    ("EG", 29), ("ES", 24), ("FI", 18), ("FO", 18), ("FR", 27), ("GB", 22),
    ("GE", 22), ("GI", 23), ("GL", 18), ("GR", 27), ("GT", 28), ("HR", 21),
    ("HU", 28), ("IE", 22), ("IL", 23), ("IS", 26), ("IT", 27), ("JO", 30),
    ("KW", 30), ("KZ", 20), ("LB", 28), ("LI", 21), ("LT", 20), ("LU", 20),
    ("LV", 21), ("MC", 27), ("MD", 24), ("ME", 22), ("MK", 19), ("MR", 27),
    ("MT", 31), ("MU", 30), ("NL", 18), ("NO", 15), ("PK", 24), ("PL", 28),
    ("PS", 29), ("PT", 25), ("QA", 29), ("RO", 24), ("RS", 22), ("SA", 24),
    ("SE", 24), ("SI", 19), ("SK", 24), ("SM", 27), ("TN", 24), ("TR", 26),
    ("UA", 29), ("VA", 22), ("VG", 24), ("XK", 20),
];

/// Countries participating in the SEPA scheme
const SEPA_COUNTRIES: &[&str] = &[
    "AD", "AT", "BE", "BG", "CH", "CY", "CZ", "DE", "DK", "EE", "ES", "FI",
    "FR", "GB", "GI", "GR", "HR", "HU", "IE", "IS", "IT", "LI", "LT", "LU",
    "LV", "MC", "MT", "NL", "NO", "PL", "PT", "RO", "SE", "SI", "SK", "SM",
    "VA",
];

/// Errors that can occur when validating an IBAN or BIC
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IbanError {
    #[error("IBAN is empty")]
    Empty,

    #[error("IBAN contains invalid characters")]
    InvalidCharacters,

    #[error("Unknown IBAN country: {0}")]
    UnknownCountry(String),

    #[error("Invalid IBAN length for {country}: expected {expected}, got {actual}")]
    InvalidLength {
        country: String,
        expected: usize,
        actual: usize,
    },

    #[error("IBAN checksum mismatch")]
    ChecksumMismatch,

    #[error("Country {0} is not part of SEPA")]
    NotSepaCountry(String),

    #[error("Invalid BIC format: {0}")]
    InvalidBic(String),
}

/// Strip whitespace and uppercase (electronic format)
pub fn normalize_iban(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Print format: groups of four characters separated by spaces
pub fn format_iban(input: &str) -> String {
    let normalized = normalize_iban(input);
    normalized
        .as_bytes()
        .chunks(4)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Two-letter country prefix of an IBAN, if present
pub fn iban_country(input: &str) -> Option<String> {
    let normalized = normalize_iban(input);
    let country = normalized.get(0..2)?;
    if country.bytes().all(|b| b.is_ascii_uppercase()) {
        Some(country.to_string())
    } else {
        None
    }
}

/// Registry length for a country's IBANs
pub fn expected_length(country: &str) -> Option<usize> {
    IBAN_LENGTHS
        .iter()
        .find(|(code, _)| *code == country)
        .map(|(_, len)| *len)
}

/// Whether the country participates in SEPA
pub fn is_sepa_country(country: &str) -> bool {
    SEPA_COUNTRIES.contains(&country)
}

/// Validate structure, registry length, and mod-97 checksum
pub fn validate_iban(input: &str) -> Result<(), IbanError> {
    let iban = normalize_iban(input);
    if iban.is_empty() {
        return Err(IbanError::Empty);
    }
    if !iban.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
        return Err(IbanError::InvalidCharacters);
    }

    let country = iban_country(&iban).ok_or(IbanError::InvalidCharacters)?;
    let expected = expected_length(&country).ok_or_else(|| IbanError::UnknownCountry(country.clone()))?;
    if iban.len() != expected {
        return Err(IbanError::InvalidLength {
            country,
            expected,
            actual: iban.len(),
        });
    }

    if !iban.as_bytes()[2..4].iter().all(u8::is_ascii_digit) {
        return Err(IbanError::InvalidCharacters);
    }

    if mod97(&iban) != 1 {
        return Err(IbanError::ChecksumMismatch);
    }

    Ok(())
}

/// Convenience predicate over [`validate_iban`]
pub fn is_valid_iban(input: &str) -> bool {
    validate_iban(input).is_ok()
}

/// Validate a BIC against `[A-Z]{6}[A-Z0-9]{2}([A-Z0-9]{3})?`
pub fn validate_bic(input: &str) -> Result<(), IbanError> {
    let bic = input.trim();
    let bytes = bic.as_bytes();
    let well_formed = (bytes.len() == 8 || bytes.len() == 11)
        && bytes[..6].iter().all(u8::is_ascii_uppercase)
        && bytes[6..]
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());

    if well_formed {
        Ok(())
    } else {
        Err(IbanError::InvalidBic(input.to_string()))
    }
}

/// ISO 7064 mod 97-10 over the rearranged IBAN
fn mod97(iban: &str) -> u32 {
    let (head, tail) = iban.split_at(4);
    tail.bytes().chain(head.bytes()).fold(0u32, |rem, b| {
        if b.is_ascii_digit() {
            (rem * 10 + u32::from(b - b'0')) % 97
        } else {
            (rem * 100 + u32::from(b - b'A') + 10) % 97
        }
    })
}

/// A validated IBAN in electronic format
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Iban(String);

impl Iban {
    /// Normalize and validate
    pub fn parse(input: &str) -> Result<Self, IbanError> {
        validate_iban(input)?;
        Ok(Self(normalize_iban(input)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn country(&self) -> &str {
        &self.0[0..2]
    }

    pub fn is_sepa(&self) -> bool {
        is_sepa_country(self.country())
    }

    /// Print format with spaces
    pub fn formatted(&self) -> String {
        format_iban(&self.0)
    }
}

impl fmt::Display for Iban {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Iban {
    type Err = IbanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Iban::parse(s)
    }
}

impl TryFrom<String> for Iban {
    type Error = IbanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Iban::parse(&value)
    }
}

impl From<Iban> for String {
    fn from(iban: Iban) -> Self {
        iban.0
    }
}
