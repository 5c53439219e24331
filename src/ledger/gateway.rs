//! Ledger Gateway
//!
//! Thin wrapper over the engine client. Every call goes through a bounded
//! retry loop that only fires on transient (connection-class) faults;
//! business-rule rejections propagate on the first attempt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{Amount, Currency};

use super::engine::{
    AccountBalance, AccountSpec, CreateOutcome, LedgerEngine, LedgerError, TransferKind,
    TransferSpec,
};
use super::ids::IdGenerator;

/// Retry configuration for transient ledger faults
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based): base * 2^(attempt-1), capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// A transfer to post through the gateway
#[derive(Debug, Clone)]
pub struct TransferOrder {
    pub debit_account_id: u128,
    pub credit_account_id: u128,
    pub amount: Amount,
    pub currency: Currency,
    pub kind: TransferKind,
    pub memo: String,
}

/// Gateway to the external ledger engine
#[derive(Clone)]
pub struct LedgerGateway {
    engine: Arc<dyn LedgerEngine>,
    ids: Arc<IdGenerator>,
    retry: RetryPolicy,
}

impl LedgerGateway {
    pub fn new(engine: Arc<dyn LedgerEngine>, ids: Arc<IdGenerator>, retry: RetryPolicy) -> Self {
        Self { engine, ids, retry }
    }

    /// Shared id generator (also used for account ids)
    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    /// Create an account. `Exists` is a success outcome, not an error.
    pub async fn create_account(&self, account: AccountSpec) -> Result<CreateOutcome, LedgerError> {
        let account_id = account.id;
        let outcome = self
            .with_retry("create_account", || self.engine.create_account(account.clone()))
            .await?;

        tracing::debug!(
            account_id = %account_id,
            outcome = ?outcome,
            "Ledger account create"
        );

        Ok(outcome)
    }

    /// Post a single-phase transfer and return its id.
    ///
    /// The id is generated once, before the first attempt, so a retry after a
    /// dropped connection resolves to `Exists` instead of posting twice.
    pub async fn transfer(&self, order: TransferOrder) -> Result<u128, LedgerError> {
        let spec = TransferSpec {
            id: self.ids.generate(),
            debit_account_id: order.debit_account_id,
            credit_account_id: order.credit_account_id,
            amount: order.amount.into(),
            ledger: order.currency.ledger_code(),
            code: order.kind.code(),
            memo: order.memo,
        };
        let transfer_id = spec.id;

        self.with_retry("create_transfer", || self.engine.create_transfer(spec.clone()))
            .await?;

        tracing::debug!(
            transfer_id = %transfer_id,
            debit = %spec.debit_account_id,
            credit = %spec.credit_account_id,
            amount = %order.amount,
            currency = %order.currency,
            "Ledger transfer posted"
        );

        Ok(transfer_id)
    }

    /// Posted and pending totals for an account
    pub async fn account_balance(&self, account_id: u128) -> Result<AccountBalance, LedgerError> {
        self.with_retry("account_balance", || self.engine.account_balance(account_id))
            .await
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient ledger error, reconnecting and retrying"
                    );
                    tokio::time::sleep(delay).await;
                    if let Err(reconnect_err) = self.engine.reconnect().await {
                        tracing::warn!(operation, error = %reconnect_err, "Ledger reconnect failed");
                    }
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    tracing::error!(
                        operation,
                        attempts = attempt,
                        error = %e,
                        "Ledger retries exhausted"
                    );
                    return Err(LedgerError::RetriesExhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}
