//! Customer accounts
//!
//! Opens customer ledger accounts with ids drawn from the shared generator,
//! skipping any id already registered for a system account.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::directory::SystemAccountDirectory;
use crate::domain::serde_ids::{i128_string, u128_string};
use crate::domain::Currency;
use crate::ledger::{AccountBalance, AccountFlags, AccountKind, AccountSpec, LedgerError, LedgerGateway};

/// Account code for customer deposit accounts
pub const CUSTOMER_ACCOUNT_CODE: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerAccount {
    #[serde(with = "u128_string")]
    pub account_id: u128,
    #[serde(with = "u128_string")]
    pub customer_ref: u128,
    pub currency: Currency,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerBalance {
    #[serde(with = "u128_string")]
    pub account_id: u128,
    #[serde(with = "u128_string")]
    pub debits_posted: u128,
    #[serde(with = "u128_string")]
    pub credits_posted: u128,
    #[serde(with = "u128_string")]
    pub debits_pending: u128,
    #[serde(with = "u128_string")]
    pub credits_pending: u128,
    #[serde(with = "i128_string")]
    pub balance: i128,
}

impl CustomerBalance {
    fn from_ledger(account_id: u128, balance: AccountBalance) -> Self {
        Self {
            account_id,
            debits_posted: balance.debits_posted,
            credits_posted: balance.credits_posted,
            debits_pending: balance.debits_pending,
            credits_pending: balance.credits_pending,
            balance: balance.net_credit(),
        }
    }
}

#[derive(Clone)]
pub struct CustomerAccountService {
    gateway: LedgerGateway,
    directory: Arc<SystemAccountDirectory>,
}

impl CustomerAccountService {
    pub fn new(gateway: LedgerGateway, directory: Arc<SystemAccountDirectory>) -> Self {
        Self { gateway, directory }
    }

    /// Open a liability account that can never be overdrawn
    pub async fn open(&self, customer_ref: u128, currency: Currency) -> Result<CustomerAccount, LedgerError> {
        let account_id = self.directory.allocate_customer_id(self.gateway.ids());

        self.gateway
            .create_account(AccountSpec {
                id: account_id,
                kind: AccountKind::Liability,
                ledger: currency.ledger_code(),
                code: CUSTOMER_ACCOUNT_CODE,
                user_data: customer_ref,
                flags: AccountFlags {
                    debits_must_not_exceed_credits: true,
                    ..Default::default()
                },
            })
            .await?;

        tracing::info!(
            account_id = %account_id,
            customer_ref = %customer_ref,
            currency = %currency,
            "Customer account opened"
        );

        Ok(CustomerAccount {
            account_id,
            customer_ref,
            currency,
        })
    }

    pub async fn balance(&self, account_id: u128) -> Result<CustomerBalance, LedgerError> {
        let balance = self.gateway.account_balance(account_id).await?;
        Ok(CustomerBalance::from_ledger(account_id, balance))
    }
}
