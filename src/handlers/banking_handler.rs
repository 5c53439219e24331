//! Banking event handler
//!
//! Classifies posted transfers by the SEPA system accounts they touch and
//! keeps per-currency flow statistics, including how much currently rests
//! in each suspense account. Redelivered events are recognised and skipped.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::cdc::{EventHandler, HandlerError};
use crate::directory::SystemAccountDirectory;
use crate::domain::serde_ids::{i128_string, u128_string};
use crate::domain::{CdcEvent, CdcEventType, Currency, SepaAccountType, SystemAccountKey};

use super::dedupe::RecentEvents;

const RECENT_WINDOW: usize = 10_000;

/// Leg of the SEPA pipeline a transfer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SepaFlow {
    OutgoingInitiated,
    OutgoingSettled,
    IncomingReceived,
    IncomingCredited,
    Internal,
}

fn sepa_type(key: Option<SystemAccountKey>) -> Option<SepaAccountType> {
    match key {
        Some(SystemAccountKey::Sepa { account_type, .. }) => Some(account_type),
        _ => None,
    }
}

/// Classify by the (debit, credit) system accounts; `None` is a non-system account
pub fn classify(debit: Option<SystemAccountKey>, credit: Option<SystemAccountKey>) -> SepaFlow {
    let debit_is_customer = debit.is_none();
    let credit_is_customer = credit.is_none();

    match (sepa_type(debit), sepa_type(credit)) {
        (None, Some(SepaAccountType::OutgoingSuspense)) if debit_is_customer => {
            SepaFlow::OutgoingInitiated
        }
        (Some(SepaAccountType::OutgoingSuspense), Some(SepaAccountType::Settlement)) => {
            SepaFlow::OutgoingSettled
        }
        (Some(SepaAccountType::Settlement), Some(SepaAccountType::IncomingSuspense)) => {
            SepaFlow::IncomingReceived
        }
        (Some(SepaAccountType::IncomingSuspense), None) if credit_is_customer => {
            SepaFlow::IncomingCredited
        }
        _ => SepaFlow::Internal,
    }
}

/// Flow counters for one currency
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyFlowStats {
    pub outgoing_initiated: u64,
    pub outgoing_settled: u64,
    pub incoming_received: u64,
    pub incoming_credited: u64,
    pub internal: u64,
    /// Minor units settled outward
    #[serde(with = "u128_string")]
    pub outgoing_volume: u128,
    /// Minor units credited to customers
    #[serde(with = "u128_string")]
    pub incoming_volume: u128,
    /// Funds between hop 1 and hop 2 of outgoing transfers
    #[serde(with = "i128_string")]
    pub outgoing_in_suspense: i128,
    /// Funds between hop 1 and hop 2 of incoming transfers
    #[serde(with = "i128_string")]
    pub incoming_in_suspense: i128,
    pub large_transfers: u64,
    pub voided: u64,
    pub expired: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSnapshot {
    pub currencies: BTreeMap<Currency, CurrencyFlowStats>,
    pub events_applied: u64,
    pub duplicates_ignored: u64,
}

#[derive(Debug, Default)]
struct FlowState {
    currencies: HashMap<Currency, CurrencyFlowStats>,
    events_applied: u64,
    duplicates_ignored: u64,
}

pub struct BankingEventHandler {
    directory: Arc<SystemAccountDirectory>,
    large_transfer_threshold: u128,
    state: Mutex<FlowState>,
    applied: Mutex<RecentEvents<(u128, CdcEventType)>>,
}

impl BankingEventHandler {
    pub fn new(directory: Arc<SystemAccountDirectory>, large_transfer_threshold: u64) -> Self {
        Self {
            directory,
            large_transfer_threshold: u128::from(large_transfer_threshold),
            state: Mutex::new(FlowState::default()),
            applied: Mutex::new(RecentEvents::new(RECENT_WINDOW)),
        }
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        let state = self.state.lock();
        FlowSnapshot {
            currencies: state
                .currencies
                .iter()
                .map(|(currency, stats)| (*currency, stats.clone()))
                .collect(),
            events_applied: state.events_applied,
            duplicates_ignored: state.duplicates_ignored,
        }
    }

    fn apply(&self, event: &CdcEvent, currency: Currency) {
        let transfer = &event.transfer;
        let mut state = self.state.lock();
        state.events_applied += 1;
        let stats = state.currencies.entry(currency).or_default();

        match event.event_type {
            CdcEventType::TwoPhaseVoided => {
                stats.voided += 1;
                tracing::warn!(
                    transfer_id = %transfer.id,
                    pending_id = %transfer.pending_id,
                    currency = %currency,
                    "Pending transfer voided"
                );
                return;
            }
            CdcEventType::TwoPhaseExpired => {
                stats.expired += 1;
                tracing::warn!(
                    transfer_id = %transfer.id,
                    pending_id = %transfer.pending_id,
                    currency = %currency,
                    "Pending transfer expired"
                );
                return;
            }
            CdcEventType::TwoPhasePending => {
                tracing::debug!(transfer_id = %transfer.id, "Pending transfer reserved");
                return;
            }
            CdcEventType::SinglePhase | CdcEventType::TwoPhasePosted => {}
        }

        let flow = classify(
            self.directory.key_for_ledger_id(transfer.debit_account_id),
            self.directory.key_for_ledger_id(transfer.credit_account_id),
        );
        let amount = transfer.amount;
        let signed = amount as i128;

        match flow {
            SepaFlow::OutgoingInitiated => {
                stats.outgoing_initiated += 1;
                stats.outgoing_in_suspense += signed;
            }
            SepaFlow::OutgoingSettled => {
                stats.outgoing_settled += 1;
                stats.outgoing_in_suspense -= signed;
                stats.outgoing_volume += amount;
            }
            SepaFlow::IncomingReceived => {
                stats.incoming_received += 1;
                stats.incoming_in_suspense += signed;
            }
            SepaFlow::IncomingCredited => {
                stats.incoming_credited += 1;
                stats.incoming_in_suspense -= signed;
                stats.incoming_volume += amount;
            }
            SepaFlow::Internal => stats.internal += 1,
        }

        if amount >= self.large_transfer_threshold {
            stats.large_transfers += 1;
            tracing::warn!(
                transfer_id = %transfer.id,
                amount = %amount,
                currency = %currency,
                flow = ?flow,
                "Large transfer"
            );
        }

        tracing::debug!(transfer_id = %transfer.id, flow = ?flow, currency = %currency, "Transfer classified");
    }
}

#[async_trait]
impl EventHandler for BankingEventHandler {
    fn name(&self) -> &str {
        "banking"
    }

    async fn handle(&self, event: &CdcEvent) -> Result<(), HandlerError> {
        let key = (event.transfer_id(), event.event_type);
        let duplicate = self.applied.lock().contains(&key);
        if duplicate {
            self.state.lock().duplicates_ignored += 1;
            tracing::warn!(
                transfer_id = %key.0,
                event_type = %key.1,
                "Ignoring redelivered event"
            );
            return Ok(());
        }

        let currency = Currency::from_ledger_code(event.ledger).ok_or_else(|| {
            HandlerError::Failed(format!("unknown ledger {}", event.ledger))
        })?;

        self.apply(event, currency);
        self.applied.lock().insert(key);
        Ok(())
    }
}
