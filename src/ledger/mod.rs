//! Ledger module
//!
//! Client side of the external double-entry engine: the engine contract,
//! id generation, the retrying gateway and an in-process simulation.

pub mod engine;
pub mod gateway;
pub mod ids;
pub mod memory;

pub use engine::{
    AccountBalance, AccountFlags, AccountKind, AccountSpec, CreateOutcome, LedgerEngine,
    LedgerError, TransferKind, TransferSpec,
};
pub use gateway::{LedgerGateway, RetryPolicy, TransferOrder};
pub use ids::IdGenerator;
pub use memory::MemoryLedger;
