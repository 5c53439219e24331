//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::directory::DirectoryError;
use crate::ledger::LedgerError;
use crate::sepa::SepaError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error(transparent)]
    Sepa(#[from] SepaError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    // Server errors (5xx)
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

type Mapped = (StatusCode, &'static str, Option<String>);

fn map_ledger(e: &LedgerError) -> Mapped {
    match e {
        LedgerError::AccountNotFound(id) => {
            (StatusCode::NOT_FOUND, "account_not_found", Some(id.to_string()))
        }
        LedgerError::InsufficientFunds { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_funds", Some(e.to_string()))
        }
        LedgerError::Connection(_) | LedgerError::Timeout | LedgerError::RetriesExhausted { .. } => {
            tracing::error!(error = %e, "Ledger unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, "ledger_unavailable", None)
        }
        LedgerError::LedgerMismatch
        | LedgerError::AccountExistsWithDifferentFields(_)
        | LedgerError::TransferExistsWithDifferentFields(_)
        | LedgerError::Rejected(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "ledger_rejected", Some(e.to_string()))
        }
    }
}

fn map_sepa(e: &SepaError) -> Mapped {
    match e {
        SepaError::CurrencyNotSupported(currency) => {
            (StatusCode::BAD_REQUEST, "currency_not_supported", Some(currency.clone()))
        }
        SepaError::InvalidAmount(inner) => {
            (StatusCode::BAD_REQUEST, "invalid_amount", Some(inner.to_string()))
        }
        SepaError::InvalidIban(inner) => {
            (StatusCode::BAD_REQUEST, "invalid_iban", Some(inner.to_string()))
        }
        SepaError::InvalidBic(bic) => (StatusCode::BAD_REQUEST, "invalid_bic", Some(bic.clone())),
        SepaError::InvalidUrgency(urgency) => {
            (StatusCode::BAD_REQUEST, "invalid_urgency", Some(urgency.clone()))
        }
        SepaError::InvalidRequest(msg) => {
            (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
        }
        SepaError::AccountNotFound(key) => {
            (StatusCode::NOT_FOUND, "sepa_account_not_found", Some(key.clone()))
        }
        SepaError::Ledger(inner) => map_ledger(inner),
        SepaError::StrandedInSuspense {
            sepa_transaction_id,
            ..
        } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "stranded_in_suspense",
            Some(sepa_transaction_id.clone()),
        ),
        SepaError::Directory(inner) => {
            tracing::error!(error = %inner, "Directory error");
            (StatusCode::INTERNAL_SERVER_ERROR, "directory_error", None)
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }

            // 404 Not Found
            AppError::AccountNotFound(id) => {
                (StatusCode::NOT_FOUND, "account_not_found", Some(id.clone()))
            }

            AppError::Sepa(e) => map_sepa(e),
            AppError::Ledger(e) => map_ledger(e),

            // 500 Internal Server Error
            AppError::Directory(e) => {
                tracing::error!("Directory error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "directory_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Amount, AmountError};

    fn status_of(e: AppError) -> StatusCode {
        e.into_response().status()
    }

    #[test]
    fn test_validation_maps_to_400() {
        assert_eq!(
            status_of(SepaError::CurrencyNotSupported("USD".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(SepaError::InvalidAmount(AmountError::NotPositive(0)).into()),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_not_found_maps_to_404() {
        assert_eq!(
            status_of(SepaError::AccountNotFound("SEPA-SETTLEMENT-EUR".into()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(LedgerError::AccountNotFound(7).into()),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_ledger_failures() {
        assert_eq!(
            status_of(
                LedgerError::InsufficientFunds {
                    account_id: 1,
                    required: 2,
                    available: 1
                }
                .into()
            ),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(
                LedgerError::RetriesExhausted {
                    attempts: 3,
                    last_error: "reset".into()
                }
                .into()
            ),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_stranded_maps_to_500() {
        let err = SepaError::StrandedInSuspense {
            sepa_transaction_id: "SEPA_IN_EUR_1_abc".into(),
            suspense_account: "SEPA-IN-SUSPENSE-EUR".into(),
            first_hop_transfer_id: 1,
            amount: Amount::new(10).unwrap(),
            source: LedgerError::AccountNotFound(9),
        };
        assert_eq!(status_of(err.into()), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
