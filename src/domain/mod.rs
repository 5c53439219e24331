//! Domain module
//!
//! Core domain types: amounts, currencies, account identifiers, IBANs and
//! ledger change events.

pub mod account_id;
pub mod amount;
pub mod currency;
pub mod events;
pub mod iban;
pub mod serde_ids;

pub use account_id::{
    is_customer_account, is_system_account, AccountIdentifier, AccountKeyError, SepaAccountType,
    SystemAccountKey,
};
pub use amount::{Amount, AmountError};
pub use currency::{Currency, CurrencyError};
pub use events::{AccountSnapshot, CdcEvent, CdcEventType, TransferRecord};
pub use iban::{format_iban, normalize_iban, validate_bic, validate_iban, Iban, IbanError};
