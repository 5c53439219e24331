//! Change Data Capture
//!
//! Ledger change events arrive through a broker, are decoded into
//! `CdcEvent`s and fanned out to registered handlers.

pub mod broker;
pub mod dispatcher;
pub mod handler;

pub use broker::{BrokerError, ChannelBroker, Delivery, EventSource, CATCH_ALL_BINDING};
pub use dispatcher::{
    AckMode, CdcDispatcher, DispatchError, DispatchReport, HandlerOutcome, HandlerReport,
    Subscription, WILDCARD,
};
pub use handler::{EventHandler, HandlerError};
