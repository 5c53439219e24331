//! In-process ledger engine
//!
//! Simulates the external double-entry engine for development runs and
//! tests: idempotent creates keyed by client id, per-ledger isolation,
//! "debits must not exceed credits" enforcement and a CDC event for every
//! posted transfer. Transient faults can be injected to exercise the
//! gateway's retry path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::cdc::ChannelBroker;
use crate::domain::{AccountSnapshot, CdcEvent, CdcEventType, TransferRecord};

use super::engine::{
    AccountBalance, AccountKind, AccountSpec, CreateOutcome, LedgerEngine, LedgerError,
    TransferSpec,
};

#[derive(Debug, Clone)]
struct AccountRecord {
    spec: AccountSpec,
    balance: AccountBalance,
}

impl AccountRecord {
    fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            id: self.spec.id,
            debits_pending: self.balance.debits_pending,
            debits_posted: self.balance.debits_posted,
            credits_pending: self.balance.credits_pending,
            credits_posted: self.balance.credits_posted,
            ledger: self.spec.ledger,
            code: self.spec.code,
            flags: self.spec.flags.bits(),
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<u128, AccountRecord>,
    transfers: HashMap<u128, (TransferSpec, u64)>,
    last_timestamp: u64,
}

impl LedgerState {
    /// Strictly increasing nanosecond timestamp
    fn next_timestamp(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        self.last_timestamp = now.max(self.last_timestamp + 1);
        self.last_timestamp
    }
}

/// Simulated ledger engine
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
    calls: AtomicU64,
    failures_pending: AtomicU32,
    cdc: Option<Arc<ChannelBroker>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a CDC event for every posted transfer
    pub fn with_cdc(mut self, broker: Arc<ChannelBroker>) -> Self {
        self.cdc = Some(broker);
        self
    }

    /// Number of engine calls received (including failed ones)
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fail the next `n` calls with a connection error
    pub fn fail_next(&self, n: u32) {
        self.failures_pending.store(n, Ordering::SeqCst);
    }

    /// Look up a posted transfer
    pub async fn transfer(&self, transfer_id: u128) -> Option<TransferSpec> {
        let state = self.state.lock().await;
        state.transfers.get(&transfer_id).map(|(spec, _)| spec.clone())
    }

    /// Number of posted transfers
    pub async fn transfer_count(&self) -> usize {
        self.state.lock().await.transfers.len()
    }

    fn begin_call(&self) -> Result<(), LedgerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(LedgerError::Connection("connection reset by peer".to_string()));
        }
        Ok(())
    }

    async fn publish(&self, event: CdcEvent) {
        let Some(broker) = &self.cdc else {
            return;
        };
        match event.to_bytes() {
            Ok(payload) => broker.publish(&event.routing_key(), payload).await,
            Err(e) => tracing::error!(error = %e, "Failed to encode CDC event"),
        }
    }
}

#[async_trait]
impl LedgerEngine for MemoryLedger {
    async fn create_account(&self, account: AccountSpec) -> Result<CreateOutcome, LedgerError> {
        self.begin_call()?;

        if account.id == 0 || account.ledger == 0 {
            return Err(LedgerError::Rejected("account id and ledger must be non-zero".to_string()));
        }

        let mut state = self.state.lock().await;
        if let Some(existing) = state.accounts.get(&account.id) {
            return if existing.spec == account {
                Ok(CreateOutcome::Exists)
            } else {
                Err(LedgerError::AccountExistsWithDifferentFields(account.id))
            };
        }

        state.accounts.insert(
            account.id,
            AccountRecord {
                spec: account,
                balance: AccountBalance::default(),
            },
        );
        Ok(CreateOutcome::Created)
    }

    async fn create_transfer(&self, transfer: TransferSpec) -> Result<CreateOutcome, LedgerError> {
        self.begin_call()?;

        let event = {
            let mut state = self.state.lock().await;

            if let Some((existing, _)) = state.transfers.get(&transfer.id) {
                return if *existing == transfer {
                    Ok(CreateOutcome::Exists)
                } else {
                    Err(LedgerError::TransferExistsWithDifferentFields(transfer.id))
                };
            }

            if transfer.amount == 0 {
                return Err(LedgerError::Rejected("amount must be positive".to_string()));
            }
            if transfer.debit_account_id == transfer.credit_account_id {
                return Err(LedgerError::Rejected("accounts must be different".to_string()));
            }

            let debit = state
                .accounts
                .get(&transfer.debit_account_id)
                .cloned()
                .ok_or(LedgerError::AccountNotFound(transfer.debit_account_id))?;
            let credit = state
                .accounts
                .get(&transfer.credit_account_id)
                .cloned()
                .ok_or(LedgerError::AccountNotFound(transfer.credit_account_id))?;

            if debit.spec.ledger != transfer.ledger || credit.spec.ledger != transfer.ledger {
                return Err(LedgerError::LedgerMismatch);
            }

            if debit.spec.flags.debits_must_not_exceed_credits {
                let available = debit
                    .balance
                    .credits_posted
                    .saturating_sub(debit.balance.debits_posted);
                if transfer.amount > available {
                    return Err(LedgerError::InsufficientFunds {
                        account_id: debit.spec.id,
                        required: transfer.amount,
                        available,
                    });
                }
            }
            if credit.spec.flags.credits_must_not_exceed_debits {
                let headroom = credit
                    .balance
                    .debits_posted
                    .saturating_sub(credit.balance.credits_posted);
                if transfer.amount > headroom {
                    return Err(LedgerError::Rejected(
                        "credits would exceed debits".to_string(),
                    ));
                }
            }

            let timestamp = state.next_timestamp();

            let mut debit = debit;
            let mut credit = credit;
            debit.balance.debits_posted += transfer.amount;
            credit.balance.credits_posted += transfer.amount;

            let event = CdcEvent {
                event_type: CdcEventType::SinglePhase,
                timestamp,
                ledger: transfer.ledger,
                transfer: TransferRecord {
                    id: transfer.id,
                    amount: transfer.amount,
                    pending_id: 0,
                    debit_account_id: transfer.debit_account_id,
                    credit_account_id: transfer.credit_account_id,
                    ledger: transfer.ledger,
                    code: transfer.code,
                    flags: 0,
                    timeout: 0,
                    timestamp,
                },
                debit_account: debit.snapshot(),
                credit_account: credit.snapshot(),
            };

            state.accounts.insert(debit.spec.id, debit);
            state.accounts.insert(credit.spec.id, credit);
            state.transfers.insert(transfer.id, (transfer, timestamp));
            event
        };

        self.publish(event).await;
        Ok(CreateOutcome::Created)
    }

    async fn account_balance(&self, account_id: u128) -> Result<AccountBalance, LedgerError> {
        self.begin_call()?;

        let state = self.state.lock().await;
        state
            .accounts
            .get(&account_id)
            .map(|record| record.balance)
            .ok_or(LedgerError::AccountNotFound(account_id))
    }
}

/// Unconstrained equity account, used as a funding source when seeding balances
pub fn equity_account(id: u128, ledger: u32) -> AccountSpec {
    AccountSpec {
        id,
        kind: AccountKind::Equity,
        ledger,
        code: 9000,
        user_data: 0,
        flags: Default::default(),
    }
}
