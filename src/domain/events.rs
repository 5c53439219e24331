//! Change-data-capture events
//!
//! Events published by the ledger engine for every posted or state-changed
//! transfer. They are facts about the ledger and are never persisted by the
//! dispatcher itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::serde_ids::u128_string;

/// Transfer phase that produced the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CdcEventType {
    SinglePhase,
    TwoPhasePending,
    TwoPhasePosted,
    TwoPhaseVoided,
    TwoPhaseExpired,
}

impl CdcEventType {
    pub const ALL: [CdcEventType; 5] = [
        CdcEventType::SinglePhase,
        CdcEventType::TwoPhasePending,
        CdcEventType::TwoPhasePosted,
        CdcEventType::TwoPhaseVoided,
        CdcEventType::TwoPhaseExpired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CdcEventType::SinglePhase => "single_phase",
            CdcEventType::TwoPhasePending => "two_phase_pending",
            CdcEventType::TwoPhasePosted => "two_phase_posted",
            CdcEventType::TwoPhaseVoided => "two_phase_voided",
            CdcEventType::TwoPhaseExpired => "two_phase_expired",
        }
    }

    /// Broker routing key for this event type
    pub fn routing_key(&self) -> String {
        format!("ledger.{}", self.as_str())
    }

    /// Whether the event moved posted balances
    pub fn is_posting(&self) -> bool {
        matches!(self, CdcEventType::SinglePhase | CdcEventType::TwoPhasePosted)
    }
}

impl fmt::Display for CdcEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CdcEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown CDC event type: {}", s))
    }
}

/// Transfer as recorded by the ledger engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    #[serde(with = "u128_string")]
    pub id: u128,
    #[serde(with = "u128_string")]
    pub amount: u128,
    #[serde(with = "u128_string", default)]
    pub pending_id: u128,
    #[serde(with = "u128_string")]
    pub debit_account_id: u128,
    #[serde(with = "u128_string")]
    pub credit_account_id: u128,
    pub ledger: u32,
    pub code: u16,
    #[serde(default)]
    pub flags: u16,
    #[serde(default)]
    pub timeout: u32,
    pub timestamp: u64,
}

/// Account balances at the moment the event was produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    #[serde(with = "u128_string")]
    pub id: u128,
    #[serde(with = "u128_string")]
    pub debits_pending: u128,
    #[serde(with = "u128_string")]
    pub debits_posted: u128,
    #[serde(with = "u128_string")]
    pub credits_pending: u128,
    #[serde(with = "u128_string")]
    pub credits_posted: u128,
    pub ledger: u32,
    pub code: u16,
    #[serde(default)]
    pub flags: u16,
}

/// A single change event from the ledger's CDC stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdcEvent {
    #[serde(rename = "type")]
    pub event_type: CdcEventType,
    /// Engine-assigned timestamp (nanoseconds)
    pub timestamp: u64,
    pub ledger: u32,
    pub transfer: TransferRecord,
    pub debit_account: AccountSnapshot,
    pub credit_account: AccountSnapshot,
}

impl CdcEvent {
    pub fn transfer_id(&self) -> u128 {
        self.transfer.id
    }

    pub fn routing_key(&self) -> String {
        self.event_type.routing_key()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
