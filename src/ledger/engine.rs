//! Ledger engine contract
//!
//! The double-entry engine owns balances and transfer atomicity. This module
//! describes the calls the rest of the crate makes against it and the error
//! taxonomy the gateway uses to decide what is worth retrying.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Accounting class of a ledger account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

/// Balance constraints enforced by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFlags {
    pub debits_must_not_exceed_credits: bool,
    pub credits_must_not_exceed_debits: bool,
}

impl AccountFlags {
    pub fn bits(&self) -> u16 {
        let mut bits = 0;
        if self.debits_must_not_exceed_credits {
            bits |= 1 << 1;
        }
        if self.credits_must_not_exceed_debits {
            bits |= 1 << 2;
        }
        bits
    }
}

/// Account creation request (id is chosen by the client)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSpec {
    pub id: u128,
    pub kind: AccountKind,
    /// Ledger number (currency)
    pub ledger: u32,
    pub code: u16,
    /// Owner reference (customer id for customer accounts, 0 for system accounts)
    pub user_data: u128,
    pub flags: AccountFlags,
}

/// Transfer type tags carried in the transfer `code` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Internal,
    SepaOutgoingToSuspense,
    SepaOutgoingToSettlement,
    SepaIncomingToSuspense,
    SepaIncomingToCustomer,
}

impl TransferKind {
    pub fn code(&self) -> u16 {
        match self {
            TransferKind::Internal => 1000,
            TransferKind::SepaOutgoingToSuspense => 2001,
            TransferKind::SepaOutgoingToSettlement => 2002,
            TransferKind::SepaIncomingToSuspense => 2101,
            TransferKind::SepaIncomingToCustomer => 2102,
        }
    }
}

/// Transfer creation request (id is chosen by the client)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSpec {
    pub id: u128,
    pub debit_account_id: u128,
    pub credit_account_id: u128,
    pub amount: u128,
    pub ledger: u32,
    pub code: u16,
    /// Free-text description; kept alongside the transfer, not by the engine's balances
    pub memo: String,
}

/// Engine response to a create call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// An identical object with this id already exists
    Exists,
}

/// Posted and pending totals for one account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub debits_pending: u128,
    pub debits_posted: u128,
    pub credits_pending: u128,
    pub credits_posted: u128,
}

impl AccountBalance {
    /// Credit-normal balance (credits minus debits), as for liability accounts
    pub fn net_credit(&self) -> i128 {
        self.credits_posted as i128 - self.debits_posted as i128
    }
}

/// Errors returned by the ledger engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    // Transient (retryable)
    #[error("Ledger connection failed: {0}")]
    Connection(String),

    #[error("Ledger request timed out")]
    Timeout,

    // Business-rule rejections (never retried)
    #[error("Ledger account not found: {0}")]
    AccountNotFound(u128),

    #[error("Insufficient funds in account {account_id}: required {required}, available {available}")]
    InsufficientFunds {
        account_id: u128,
        required: u128,
        available: u128,
    },

    #[error("Accounts are on different ledgers")]
    LedgerMismatch,

    #[error("Account {0} exists with different fields")]
    AccountExistsWithDifferentFields(u128),

    #[error("Transfer {0} exists with different fields")]
    TransferExistsWithDifferentFields(u128),

    #[error("Transfer rejected: {0}")]
    Rejected(String),

    // Raised by the gateway once the retry budget is spent
    #[error("Ledger unavailable after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl LedgerError {
    /// Retry predicate: only connection-class faults are transient
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Connection(_) | LedgerError::Timeout)
    }

    /// Business-rule rejection from the engine
    pub fn is_rejection(&self) -> bool {
        !self.is_transient() && !matches!(self, LedgerError::RetriesExhausted { .. })
    }
}

/// Client interface of the external double-entry engine
#[async_trait]
pub trait LedgerEngine: Send + Sync {
    async fn create_account(&self, account: AccountSpec) -> Result<CreateOutcome, LedgerError>;

    async fn create_transfer(&self, transfer: TransferSpec) -> Result<CreateOutcome, LedgerError>;

    async fn account_balance(&self, account_id: u128) -> Result<AccountBalance, LedgerError>;

    /// Re-establish the client session after a connection fault
    async fn reconnect(&self) -> Result<(), LedgerError> {
        Ok(())
    }
}
