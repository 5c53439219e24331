//! SEPA errors
//!
//! Validation and not-found errors are raised before any ledger call.
//! `StrandedInSuspense` is the one error that means money already moved:
//! the first hop posted, the second did not, and the funds rest in a
//! suspense account until someone follows up.

use crate::directory::DirectoryError;
use crate::domain::{Amount, AmountError, IbanError};
use crate::ledger::LedgerError;

#[derive(Debug, thiserror::Error)]
pub enum SepaError {
    // Validation (400)
    #[error("Currency not supported for SEPA transfers: {0}")]
    CurrencyNotSupported(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    #[error("Invalid IBAN: {0}")]
    InvalidIban(IbanError),

    #[error("Invalid BIC: {0}")]
    InvalidBic(String),

    #[error("Invalid urgency: {0}")]
    InvalidUrgency(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Not found (404)
    #[error("SEPA account not found: {0}")]
    AccountNotFound(String),

    // Ledger failures
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(
        "Funds stranded in {suspense_account} for {sepa_transaction_id} \
         (first hop {first_hop_transfer_id}, amount {amount}): {source}"
    )]
    StrandedInSuspense {
        sepa_transaction_id: String,
        suspense_account: String,
        first_hop_transfer_id: u128,
        amount: Amount,
        source: LedgerError,
    },

    #[error("Directory error: {0}")]
    Directory(DirectoryError),
}

impl From<DirectoryError> for SepaError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::NotFound(key) => SepaError::AccountNotFound(key),
            other => SepaError::Directory(other),
        }
    }
}

impl SepaError {
    /// Rejected before touching the ledger
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SepaError::CurrencyNotSupported(_)
                | SepaError::InvalidAmount(_)
                | SepaError::InvalidIban(_)
                | SepaError::InvalidBic(_)
                | SepaError::InvalidUrgency(_)
                | SepaError::InvalidRequest(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SepaError::AccountNotFound(_) | SepaError::Ledger(LedgerError::AccountNotFound(_))
        )
    }

    pub fn is_stranded(&self) -> bool {
        matches!(self, SepaError::StrandedInSuspense { .. })
    }
}
