//! SEPA transfer request and result types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::serde_ids::{u128_string, u128_string_vec};
use crate::domain::{validate_bic, Amount, Currency, Iban, IbanError};

use super::error::SepaError;

/// Max length of SEPA unstructured remittance information
pub const MAX_DESCRIPTION_LEN: usize = 140;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Outgoing,
    Incoming,
}

impl TransferDirection {
    /// Segment used in SEPA transaction ids
    pub fn tag(&self) -> &'static str {
        match self {
            TransferDirection::Outgoing => "OUT",
            TransferDirection::Incoming => "IN",
        }
    }
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::Outgoing => f.write_str("outgoing"),
            TransferDirection::Incoming => f.write_str("incoming"),
        }
    }
}

/// Urgency tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Urgency {
    #[default]
    Standard,
    Express,
    Instant,
}

impl FromStr for Urgency {
    type Err = SepaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STANDARD" => Ok(Urgency::Standard),
            "EXPRESS" => Ok(Urgency::Express),
            "INSTANT" => Ok(Urgency::Instant),
            _ => Err(SepaError::InvalidUrgency(s.to_string())),
        }
    }
}

/// Counterparty bank details
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterpartyBank {
    pub iban: String,
    #[serde(default)]
    pub bic: Option<String>,
    #[serde(default)]
    pub bank_name: Option<String>,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

/// Raw transfer request as received from a caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SepaTransferRequest {
    /// Customer ledger account
    #[serde(with = "u128_string")]
    pub account_id: u128,
    /// Minor units
    pub amount: u64,
    pub currency: String,
    /// Optional; when present it must match the endpoint used
    #[serde(default)]
    pub direction: Option<TransferDirection>,
    pub bank_info: CounterpartyBank,
    #[serde(default)]
    pub urgency: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Incoming transfers may carry the originator's transaction id
    #[serde(default)]
    pub sepa_transaction_id: Option<String>,
}

/// A request that passed every pre-ledger check
#[derive(Debug, Clone)]
pub struct ValidatedTransfer {
    pub account_id: u128,
    pub amount: Amount,
    pub currency: Currency,
    pub direction: TransferDirection,
    pub iban: Iban,
    pub bic: Option<String>,
    pub bank_name: Option<String>,
    pub recipient_name: Option<String>,
    pub urgency: Urgency,
    pub description: Option<String>,
    pub sepa_transaction_id: Option<String>,
}

impl SepaTransferRequest {
    /// Check currency, amount, IBAN, BIC and urgency. Pure; no I/O.
    pub fn validate(&self, direction: TransferDirection) -> Result<ValidatedTransfer, SepaError> {
        if let Some(requested) = self.direction {
            if requested != direction {
                return Err(SepaError::InvalidRequest(format!(
                    "{} request sent to the {} flow",
                    requested, direction
                )));
            }
        }

        let currency = self
            .currency
            .parse::<Currency>()
            .ok()
            .filter(Currency::is_sepa)
            .ok_or_else(|| SepaError::CurrencyNotSupported(self.currency.trim().to_uppercase()))?;

        let amount = Amount::new(self.amount)?;

        if self.account_id == 0 {
            return Err(SepaError::InvalidRequest("accountId must be non-zero".to_string()));
        }

        let iban = Iban::parse(&self.bank_info.iban).map_err(SepaError::InvalidIban)?;
        if !iban.is_sepa() {
            return Err(SepaError::InvalidIban(IbanError::NotSepaCountry(
                iban.country().to_string(),
            )));
        }

        let bic = match self.bank_info.bic.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(bic) => {
                validate_bic(bic).map_err(|_| SepaError::InvalidBic(bic.to_string()))?;
                Some(bic.to_string())
            }
        };

        let urgency = match self.urgency.as_deref() {
            None => Urgency::default(),
            Some(u) => u.parse()?,
        };

        if let Some(description) = &self.description {
            if description.chars().count() > MAX_DESCRIPTION_LEN {
                return Err(SepaError::InvalidRequest(format!(
                    "description exceeds {} characters",
                    MAX_DESCRIPTION_LEN
                )));
            }
        }

        let sepa_transaction_id = match self.sepa_transaction_id.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(id) => Some(id.to_string()),
        };

        Ok(ValidatedTransfer {
            account_id: self.account_id,
            amount,
            currency,
            direction,
            iban,
            bic,
            bank_name: self.bank_info.bank_name.clone(),
            recipient_name: self.bank_info.recipient_name.clone(),
            urgency,
            description: self.description.clone(),
            sepa_transaction_id,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Completed,
    Pending,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStage {
    Suspense,
    Settlement,
    External,
}

/// Outcome of a completed orchestration run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SepaTransferResult {
    /// One id per posted hop, in hop order
    #[serde(with = "u128_string_vec")]
    pub transfer_ids: Vec<u128>,
    pub sepa_transaction_id: String,
    pub status: TransferStatus,
    pub stage: TransferStage,
    pub direction: TransferDirection,
    pub amount: Amount,
    pub currency: Currency,
    pub urgency: Urgency,
    pub completed_at: DateTime<Utc>,
}
