//! SEPA settlement pipeline
//!
//! Account provisioning and the two-hop transfer orchestration over the
//! suspense and settlement system accounts.

pub mod error;
pub mod orchestrator;
pub mod provisioner;
pub mod request;

pub use error::SepaError;
pub use orchestrator::{
    generate_sepa_transaction_id, SepaTransferOrchestrator, SuspenseAccountBalance,
    SuspenseBalances,
};
pub use provisioner::{
    ConfiguredAccount, ProvisionedAccount, ProvisioningFailure, ProvisioningReport,
    SepaAccountProvisioner, ValidationReport, SEPA_ACCOUNT_COUNT,
};
pub use request::{
    CounterpartyBank, SepaTransferRequest, SepaTransferResult, TransferDirection, TransferStage,
    TransferStatus, Urgency, ValidatedTransfer,
};
