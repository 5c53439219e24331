//! SEPA Suspense Account Provisioner
//!
//! Guarantees the 12 SEPA system accounts (3 types x 4 currencies) exist in
//! the ledger and the directory. Re-runs are idempotent: a key already in
//! the directory is counted as a success without a ledger call.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::directory::SystemAccountDirectory;
use crate::domain::serde_ids::u128_string;
use crate::domain::{Currency, SepaAccountType, SystemAccountKey};
use crate::ledger::{AccountKind, AccountSpec, CreateOutcome, LedgerError, LedgerGateway};

use super::error::SepaError;

/// Number of SEPA system accounts
pub const SEPA_ACCOUNT_COUNT: usize = SepaAccountType::ALL.len() * Currency::SEPA.len();

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedAccount {
    pub key: String,
    #[serde(with = "u128_string")]
    pub ledger_id: u128,
    pub category: String,
    pub currency: Currency,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningFailure {
    pub key: String,
    pub error: String,
}

/// Outcome of a provisioning run; failures never abort the batch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningReport {
    pub created: Vec<ProvisionedAccount>,
    pub existing: Vec<ProvisionedAccount>,
    pub errors: Vec<ProvisioningFailure>,
    pub total_accounts: usize,
    pub success_count: usize,
}

impl ProvisioningReport {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty() && self.success_count == self.total_accounts
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfiguredAccount {
    pub key: String,
    #[serde(with = "u128_string")]
    pub ledger_id: u128,
}

/// Read-only startup health check
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub missing: Vec<String>,
    pub configured: Vec<ConfiguredAccount>,
}

enum Provisioned {
    Created(ProvisionedAccount),
    Existing(ProvisionedAccount),
}

pub struct SepaAccountProvisioner {
    gateway: LedgerGateway,
    directory: Arc<SystemAccountDirectory>,
    /// One provisioning run at a time
    run_lock: Mutex<()>,
}

impl SepaAccountProvisioner {
    pub fn new(gateway: LedgerGateway, directory: Arc<SystemAccountDirectory>) -> Self {
        Self {
            gateway,
            directory,
            run_lock: Mutex::new(()),
        }
    }

    /// Ensure all SEPA accounts exist, collecting per-account failures
    pub async fn provision_all(&self) -> ProvisioningReport {
        let _guard = self.run_lock.lock().await;

        let mut report = ProvisioningReport {
            created: Vec::new(),
            existing: Vec::new(),
            errors: Vec::new(),
            total_accounts: SEPA_ACCOUNT_COUNT,
            success_count: 0,
        };

        for account_type in SepaAccountType::ALL {
            for currency in Currency::SEPA {
                let key = SystemAccountKey::sepa(account_type, currency);
                match self.provision_one(&key, account_type, currency).await {
                    Ok(Provisioned::Created(account)) => {
                        report.success_count += 1;
                        report.created.push(account);
                    }
                    Ok(Provisioned::Existing(account)) => {
                        report.success_count += 1;
                        report.existing.push(account);
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Failed to provision SEPA account");
                        report.errors.push(ProvisioningFailure {
                            key: key.to_string(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        tracing::info!(
            created = report.created.len(),
            existing = report.existing.len(),
            failed = report.errors.len(),
            total = report.total_accounts,
            "SEPA account provisioning finished"
        );

        report
    }

    /// Re-create registered SEPA accounts the ledger does not know, under
    /// their registered ids. Keys absent from the directory are left to
    /// `provision_all`.
    pub async fn restore_missing(&self) -> ProvisioningReport {
        let _guard = self.run_lock.lock().await;

        let mut report = ProvisioningReport {
            created: Vec::new(),
            existing: Vec::new(),
            errors: Vec::new(),
            total_accounts: SEPA_ACCOUNT_COUNT,
            success_count: 0,
        };

        for account_type in SepaAccountType::ALL {
            for currency in Currency::SEPA {
                let key = SystemAccountKey::sepa(account_type, currency);
                match self.restore_one(&key, account_type, currency).await {
                    Ok(Some(Provisioned::Created(account))) => {
                        report.success_count += 1;
                        report.created.push(account);
                    }
                    Ok(Some(Provisioned::Existing(account))) => {
                        report.success_count += 1;
                        report.existing.push(account);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Failed to restore SEPA account");
                        report.errors.push(ProvisioningFailure {
                            key: key.to_string(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        if !report.created.is_empty() {
            tracing::warn!(
                restored = report.created.len(),
                "Registered SEPA accounts were missing from the ledger and have been re-created"
            );
        }

        report
    }

    async fn restore_one(
        &self,
        key: &SystemAccountKey,
        account_type: SepaAccountType,
        currency: Currency,
    ) -> Result<Option<Provisioned>, SepaError> {
        let Some(entry) = self.directory.lookup(key).await? else {
            return Ok(None);
        };
        let account = ProvisionedAccount {
            key: key.to_string(),
            ledger_id: entry.ledger_id,
            category: entry.category,
            currency: entry.currency,
            description: entry.description,
        };

        match self.gateway.account_balance(entry.ledger_id).await {
            Ok(_) => return Ok(Some(Provisioned::Existing(account))),
            Err(LedgerError::AccountNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        self.gateway
            .create_account(sepa_account_spec(entry.ledger_id, account_type, currency))
            .await?;
        tracing::info!(key = %key, ledger_id = %entry.ledger_id, "SEPA account restored in ledger");

        Ok(Some(Provisioned::Created(account)))
    }

    async fn provision_one(
        &self,
        key: &SystemAccountKey,
        account_type: SepaAccountType,
        currency: Currency,
    ) -> Result<Provisioned, SepaError> {
        if let Some(entry) = self.directory.lookup(key).await? {
            return Ok(Provisioned::Existing(ProvisionedAccount {
                key: key.to_string(),
                ledger_id: entry.ledger_id,
                category: entry.category,
                currency: entry.currency,
                description: entry.description,
            }));
        }

        let ledger_id = self.gateway.ids().generate();
        // A concurrent creator's `Exists` is still a success
        let outcome = self
            .gateway
            .create_account(sepa_account_spec(ledger_id, account_type, currency))
            .await?;
        if outcome == CreateOutcome::Exists {
            tracing::debug!(key = %key, ledger_id = %ledger_id, "SEPA account already existed in ledger");
        }

        let description = account_type.describe(currency);
        let entry = self.directory.register(key, ledger_id, &description).await?;

        tracing::info!(key = %key, ledger_id = %ledger_id, "SEPA account created");

        Ok(Provisioned::Created(ProvisionedAccount {
            key: key.to_string(),
            ledger_id: entry.ledger_id,
            category: entry.category,
            currency: entry.currency,
            description: entry.description,
        }))
    }

    /// Check every SEPA account resolves and answers a balance lookup
    pub async fn validate_all(&self) -> ValidationReport {
        let mut missing = Vec::new();
        let mut configured = Vec::new();

        for key in SystemAccountKey::all_sepa() {
            let ledger_id = match self.directory.resolve(&key).await {
                Ok(id) => id,
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "SEPA account not in directory");
                    missing.push(key.to_string());
                    continue;
                }
            };

            match self.gateway.account_balance(ledger_id).await {
                Ok(_) => configured.push(ConfiguredAccount {
                    key: key.to_string(),
                    ledger_id,
                }),
                Err(e) => {
                    tracing::debug!(key = %key, ledger_id = %ledger_id, error = %e, "SEPA account not in ledger");
                    missing.push(key.to_string());
                }
            }
        }

        let valid = missing.is_empty();
        if valid {
            tracing::info!(accounts = configured.len(), "SEPA accounts validated");
        } else {
            tracing::warn!(missing = ?missing, "SEPA accounts missing");
        }

        ValidationReport {
            valid,
            missing,
            configured,
        }
    }
}

fn sepa_account_spec(id: u128, account_type: SepaAccountType, currency: Currency) -> AccountSpec {
    AccountSpec {
        id,
        kind: AccountKind::Liability,
        ledger: currency.ledger_code(),
        code: account_type.ledger_code(),
        user_data: 0,
        flags: Default::default(),
    }
}
