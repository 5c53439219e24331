//! CDC event handlers
//!
//! Consumers registered with the dispatcher. Both tolerate redelivery.

mod audit_handler;
mod banking_handler;
mod dedupe;

pub use audit_handler::AuditEventHandler;
pub use banking_handler::{classify, BankingEventHandler, CurrencyFlowStats, FlowSnapshot, SepaFlow};
pub use dedupe::RecentEvents;
