//! SEPA Transfer Orchestrator
//!
//! Two-hop settlement through system accounts:
//!
//! ```text
//! outgoing: customer -> outgoing suspense -> settlement      (stage: settlement)
//! incoming: settlement -> incoming suspense -> customer      (stage: external)
//! ```
//!
//! Hop 2 starts only after hop 1 returned. A hop 1 failure leaves nothing
//! behind. A hop 2 failure leaves the funds in the suspense account and is
//! reported as `SepaError::StrandedInSuspense`; there is no automatic
//! reconciliation.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;

use crate::directory::SystemAccountDirectory;
use crate::domain::serde_ids::{i128_string, u128_string};
use crate::domain::{Amount, Currency, SepaAccountType, SystemAccountKey};
use crate::ledger::{LedgerGateway, TransferKind, TransferOrder};

use super::error::SepaError;
use super::request::{
    SepaTransferRequest, SepaTransferResult, TransferDirection, TransferStage, TransferStatus,
    ValidatedTransfer,
};

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `SEPA_{OUT|IN}_{CURRENCY}_{unix millis}_{9 base36 chars}`
pub fn generate_sepa_transaction_id(direction: TransferDirection, currency: Currency) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("SEPA_{}_{}_{}_{}", direction.tag(), currency, millis, suffix)
}

/// Balance of one SEPA system account
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspenseAccountBalance {
    pub key: String,
    #[serde(with = "u128_string")]
    pub ledger_id: u128,
    #[serde(with = "u128_string")]
    pub debits: u128,
    #[serde(with = "u128_string")]
    pub credits: u128,
    /// Credits minus debits
    #[serde(with = "i128_string")]
    pub balance: i128,
}

/// Monitoring view of a currency's suspense and settlement accounts
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspenseBalances {
    pub currency: Currency,
    pub outgoing_suspense: SuspenseAccountBalance,
    pub incoming_suspense: SuspenseAccountBalance,
    pub settlement: SuspenseAccountBalance,
    pub checked_at: DateTime<Utc>,
}

impl SuspenseBalances {
    /// Funds resting mid-transit in either suspense account
    pub fn in_transit(&self) -> i128 {
        self.outgoing_suspense.balance + self.incoming_suspense.balance
    }
}

#[derive(Clone)]
pub struct SepaTransferOrchestrator {
    gateway: LedgerGateway,
    directory: Arc<SystemAccountDirectory>,
}

impl SepaTransferOrchestrator {
    pub fn new(gateway: LedgerGateway, directory: Arc<SystemAccountDirectory>) -> Self {
        Self { gateway, directory }
    }

    /// Route by the request's `direction` field
    pub async fn process_transfer(&self, request: &SepaTransferRequest) -> Result<SepaTransferResult, SepaError> {
        match request.direction {
            Some(TransferDirection::Outgoing) => self.process_outgoing(request).await,
            Some(TransferDirection::Incoming) => self.process_incoming(request).await,
            None => Err(SepaError::InvalidRequest("direction is required".to_string())),
        }
    }

    /// Customer -> outgoing suspense -> settlement
    pub async fn process_outgoing(&self, request: &SepaTransferRequest) -> Result<SepaTransferResult, SepaError> {
        let transfer = request.validate(TransferDirection::Outgoing)?;
        let currency = transfer.currency;

        // Both system accounts must resolve before money moves
        let suspense_key = SystemAccountKey::sepa(SepaAccountType::OutgoingSuspense, currency);
        let suspense = self.directory.resolve(&suspense_key).await?;
        let settlement = self
            .directory
            .resolve(&SystemAccountKey::sepa(SepaAccountType::Settlement, currency))
            .await?;
        self.ensure_customer_account(&transfer)?;

        let first = self
            .gateway
            .transfer(TransferOrder {
                debit_account_id: transfer.account_id,
                credit_account_id: suspense,
                amount: transfer.amount,
                currency,
                kind: TransferKind::SepaOutgoingToSuspense,
                memo: format!("SEPA outgoing to {}", transfer.iban),
            })
            .await?;

        let sepa_transaction_id = generate_sepa_transaction_id(TransferDirection::Outgoing, currency);
        tracing::info!(
            sepa_transaction_id = %sepa_transaction_id,
            transfer_id = %first,
            account_id = %transfer.account_id,
            amount = %transfer.amount,
            currency = %currency,
            urgency = ?transfer.urgency,
            "SEPA outgoing: funds moved to suspense"
        );

        let second = self
            .gateway
            .transfer(TransferOrder {
                debit_account_id: suspense,
                credit_account_id: settlement,
                amount: transfer.amount,
                currency,
                kind: TransferKind::SepaOutgoingToSettlement,
                memo: format!("SEPA {}", sepa_transaction_id),
            })
            .await
            .map_err(|e| stranded(&sepa_transaction_id, &suspense_key, first, transfer.amount, e))?;

        tracing::info!(
            sepa_transaction_id = %sepa_transaction_id,
            transfer_id = %second,
            "SEPA outgoing: funds moved to settlement"
        );

        Ok(completed(
            &transfer,
            vec![first, second],
            sepa_transaction_id,
            TransferStage::Settlement,
        ))
    }

    /// Settlement -> incoming suspense -> customer
    pub async fn process_incoming(&self, request: &SepaTransferRequest) -> Result<SepaTransferResult, SepaError> {
        let transfer = request.validate(TransferDirection::Incoming)?;
        let currency = transfer.currency;

        let settlement = self
            .directory
            .resolve(&SystemAccountKey::sepa(SepaAccountType::Settlement, currency))
            .await?;
        let suspense_key = SystemAccountKey::sepa(SepaAccountType::IncomingSuspense, currency);
        let suspense = self.directory.resolve(&suspense_key).await?;
        self.ensure_customer_account(&transfer)?;

        let sepa_transaction_id = transfer
            .sepa_transaction_id
            .clone()
            .unwrap_or_else(|| generate_sepa_transaction_id(TransferDirection::Incoming, currency));

        let first = self
            .gateway
            .transfer(TransferOrder {
                debit_account_id: settlement,
                credit_account_id: suspense,
                amount: transfer.amount,
                currency,
                kind: TransferKind::SepaIncomingToSuspense,
                memo: format!("SEPA {} from {}", sepa_transaction_id, transfer.iban),
            })
            .await?;

        tracing::info!(
            sepa_transaction_id = %sepa_transaction_id,
            transfer_id = %first,
            amount = %transfer.amount,
            currency = %currency,
            "SEPA incoming: funds received into suspense"
        );

        let second = self
            .gateway
            .transfer(TransferOrder {
                debit_account_id: suspense,
                credit_account_id: transfer.account_id,
                amount: transfer.amount,
                currency,
                kind: TransferKind::SepaIncomingToCustomer,
                memo: format!("SEPA incoming from {}", transfer.iban),
            })
            .await
            .map_err(|e| stranded(&sepa_transaction_id, &suspense_key, first, transfer.amount, e))?;

        tracing::info!(
            sepa_transaction_id = %sepa_transaction_id,
            transfer_id = %second,
            account_id = %transfer.account_id,
            "SEPA incoming: customer credited"
        );

        Ok(completed(
            &transfer,
            vec![first, second],
            sepa_transaction_id,
            TransferStage::External,
        ))
    }

    /// Balances of the three SEPA system accounts of one currency
    pub async fn get_suspense_balances(&self, currency: &str) -> Result<SuspenseBalances, SepaError> {
        let currency = currency
            .parse::<Currency>()
            .ok()
            .filter(Currency::is_sepa)
            .ok_or_else(|| SepaError::CurrencyNotSupported(currency.trim().to_uppercase()))?;

        Ok(SuspenseBalances {
            currency,
            outgoing_suspense: self
                .account_balance(SepaAccountType::OutgoingSuspense, currency)
                .await?,
            incoming_suspense: self
                .account_balance(SepaAccountType::IncomingSuspense, currency)
                .await?,
            settlement: self
                .account_balance(SepaAccountType::Settlement, currency)
                .await?,
            checked_at: Utc::now(),
        })
    }

    /// The customer leg must never be a registered system account
    fn ensure_customer_account(&self, transfer: &ValidatedTransfer) -> Result<(), SepaError> {
        match self.directory.key_for_ledger_id(transfer.account_id) {
            Some(key) => {
                tracing::warn!(
                    account_id = %transfer.account_id,
                    system_account = %key,
                    "SEPA transfer rejected: account is a system account"
                );
                Err(SepaError::InvalidRequest(format!(
                    "account {} is a system account",
                    transfer.account_id
                )))
            }
            None => Ok(()),
        }
    }

    async fn account_balance(
        &self,
        account_type: SepaAccountType,
        currency: Currency,
    ) -> Result<SuspenseAccountBalance, SepaError> {
        let key = SystemAccountKey::sepa(account_type, currency);
        let ledger_id = self.directory.resolve(&key).await?;
        let balance = self.gateway.account_balance(ledger_id).await?;

        Ok(SuspenseAccountBalance {
            key: key.to_string(),
            ledger_id,
            debits: balance.debits_posted,
            credits: balance.credits_posted,
            balance: balance.net_credit(),
        })
    }
}

fn stranded(
    sepa_transaction_id: &str,
    suspense_key: &SystemAccountKey,
    first_hop_transfer_id: u128,
    amount: Amount,
    source: crate::ledger::LedgerError,
) -> SepaError {
    tracing::error!(
        sepa_transaction_id = %sepa_transaction_id,
        suspense_account = %suspense_key,
        first_hop_transfer_id = %first_hop_transfer_id,
        amount = %amount,
        error = %source,
        "SEPA second hop failed, funds stranded in suspense"
    );
    SepaError::StrandedInSuspense {
        sepa_transaction_id: sepa_transaction_id.to_string(),
        suspense_account: suspense_key.to_string(),
        first_hop_transfer_id,
        amount,
        source,
    }
}

fn completed(
    transfer: &ValidatedTransfer,
    transfer_ids: Vec<u128>,
    sepa_transaction_id: String,
    stage: TransferStage,
) -> SepaTransferResult {
    SepaTransferResult {
        transfer_ids,
        sepa_transaction_id,
        status: TransferStatus::Completed,
        stage,
        direction: transfer.direction,
        amount: transfer.amount,
        currency: transfer.currency,
        urgency: transfer.urgency,
        completed_at: Utc::now(),
    }
}
