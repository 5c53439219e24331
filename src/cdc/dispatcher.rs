//! CDC Event Dispatcher
//!
//! Consumes ledger change events from the broker and fans each one out to
//! the handlers registered for its type plus the wildcard handlers.
//!
//! Guarantees:
//! - events are processed one at a time, in receipt order
//! - a failing or panicking handler is logged and skipped; it never stops
//!   the remaining handlers or the consumption loop
//! - in manual-ack mode an event is acknowledged only after every handler
//!   has been attempted (at-least-once delivery)

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::serde_ids::u128_string;
use crate::domain::{CdcEvent, CdcEventType};

use super::broker::{BrokerError, Delivery, EventSource, CATCH_ALL_BINDING};
use super::handler::EventHandler;

/// Registry key matching every event type
pub const WILDCARD: &str = "*";

/// Registry key: one event type or all of them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subscription {
    All,
    Only(CdcEventType),
}

impl FromStr for Subscription {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == WILDCARD {
            return Ok(Subscription::All);
        }
        s.parse::<CdcEventType>()
            .map(Subscription::Only)
            .map_err(|_| DispatchError::UnknownEventType(s.to_string()))
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subscription::All => f.write_str(WILDCARD),
            Subscription::Only(event_type) => f.write_str(event_type.as_str()),
        }
    }
}

/// When deliveries are acknowledged to the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Acknowledged on receipt, before handlers run
    Auto,
    /// Acknowledged after all handlers were attempted
    #[default]
    Manual,
}

impl FromStr for AckMode {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(AckMode::Auto),
            "manual" => Ok(AckMode::Manual),
            other => Err(DispatchError::InvalidAckMode(other.to_string())),
        }
    }
}

/// Dispatcher errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Invalid acknowledgement mode: {0}")]
    InvalidAckMode(String),

    #[error("Dispatcher is not connected")]
    NotConnected,

    #[error("Dispatcher is already consuming")]
    AlreadyConsuming,

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Result of running one handler for one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandlerOutcome {
    Succeeded,
    Failed { error: String },
    Panicked { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct HandlerReport {
    pub handler: String,
    #[serde(flatten)]
    pub outcome: HandlerOutcome,
}

/// Per-event record of what every handler did. Failures end up here and in
/// the logs; they are never propagated.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub event_type: CdcEventType,
    #[serde(with = "u128_string")]
    pub transfer_id: u128,
    pub handlers: Vec<HandlerReport>,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize {
        self.handlers.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &HandlerReport> {
        self.handlers
            .iter()
            .filter(|r| r.outcome != HandlerOutcome::Succeeded)
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

type HandlerRef = Arc<dyn EventHandler>;

/// Fans CDC events out to registered handlers
pub struct CdcDispatcher {
    source: Arc<dyn EventSource>,
    ack_mode: AckMode,
    registry: RwLock<HashMap<Subscription, Vec<HandlerRef>>>,
    connected: AtomicBool,
    stop: watch::Sender<bool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    error_backoff: Duration,
}

impl CdcDispatcher {
    pub fn new(source: Arc<dyn EventSource>, ack_mode: AckMode) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            source,
            ack_mode,
            registry: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(false),
            stop,
            consumer: Mutex::new(None),
            error_backoff: Duration::from_secs(1),
        }
    }

    /// Delay after a broker error before polling again
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    /// Append a handler for an event type, or for every event with `*`
    pub fn register_handler(&self, event_type: &str, handler: HandlerRef) -> Result<(), DispatchError> {
        let subscription: Subscription = event_type.parse()?;
        tracing::info!(
            handler = handler.name(),
            subscription = %subscription,
            "Registered CDC handler"
        );
        self.registry
            .write()
            .entry(subscription)
            .or_default()
            .push(handler);
        Ok(())
    }

    /// Handlers for an event type: wildcard handlers first, then exact-type
    /// handlers, each in registration order. A handler registered under both
    /// runs once.
    pub fn handlers_for(&self, event_type: CdcEventType) -> Vec<HandlerRef> {
        let registry = self.registry.read();
        let wildcard = registry.get(&Subscription::All).into_iter().flatten();
        let exact = registry
            .get(&Subscription::Only(event_type))
            .into_iter()
            .flatten();

        let mut handlers: Vec<HandlerRef> = Vec::new();
        for handler in wildcard.chain(exact) {
            if !handlers.iter().any(|h| same_handler(h, handler)) {
                handlers.push(Arc::clone(handler));
            }
        }
        handlers
    }

    /// Routing keys the queue must be bound to for the current registry
    fn routing_keys(&self) -> Vec<String> {
        let registry = self.registry.read();
        if registry.contains_key(&Subscription::All) {
            return vec![CATCH_ALL_BINDING.to_string()];
        }
        let mut keys: Vec<String> = registry
            .keys()
            .filter_map(|s| match s {
                Subscription::Only(event_type) => Some(event_type.routing_key()),
                Subscription::All => None,
            })
            .collect();
        keys.sort();
        keys
    }

    /// Establish the broker connection
    pub async fn connect(&self) -> Result<(), DispatchError> {
        self.source.connect().await?;
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(ack_mode = ?self.ack_mode, "CDC dispatcher connected");
        Ok(())
    }

    /// Bind to the registered event types and start the consumption loop
    pub async fn start_consuming(self: &Arc<Self>) -> Result<(), DispatchError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DispatchError::NotConnected);
        }
        if self.consumer.lock().is_some() {
            return Err(DispatchError::AlreadyConsuming);
        }

        let keys = self.routing_keys();
        if keys.is_empty() {
            tracing::warn!("No CDC handlers registered; consumer will receive nothing");
        }
        self.source.subscribe(&keys).await?;

        self.stop.send_replace(false);
        let stop = self.stop.subscribe();
        let dispatcher = Arc::clone(self);
        let handle = tokio::spawn(async move { dispatcher.consume(stop).await });

        *self.consumer.lock() = Some(handle);
        tracing::info!(routing_keys = ?keys, "CDC consumer started");
        Ok(())
    }

    /// Stop consuming, close the broker connection and clear the registry.
    /// The event being processed (if any) finishes first.
    pub async fn disconnect(&self) -> Result<(), DispatchError> {
        self.stop.send_replace(true);

        let consumer = self.consumer.lock().take();
        if let Some(handle) = consumer {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "CDC consumer task ended abnormally");
            }
        }

        self.source.close().await?;
        self.registry.write().clear();
        self.connected.store(false, Ordering::SeqCst);

        tracing::info!("CDC dispatcher disconnected");
        Ok(())
    }

    async fn consume(&self, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;

                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                delivery = self.source.next_delivery() => match delivery {
                    Ok(Some(delivery)) => self.process_delivery(delivery).await,
                    Ok(None) => {
                        tracing::info!("CDC stream closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "CDC broker error");
                        tokio::time::sleep(self.error_backoff).await;
                    }
                },
            }
        }
        tracing::info!("CDC consumer stopped");
    }

    async fn process_delivery(&self, delivery: Delivery) {
        let tag = delivery.delivery_tag;

        if self.ack_mode == AckMode::Auto {
            if let Err(e) = self.source.ack(tag).await {
                tracing::warn!(delivery_tag = tag, error = %e, "Auto-ack failed");
            }
        }

        let event = match CdcEvent::from_bytes(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    delivery_tag = tag,
                    routing_key = %delivery.routing_key,
                    error = %e,
                    "Discarding undecodable CDC message"
                );
                if self.ack_mode == AckMode::Manual {
                    if let Err(e) = self.source.reject(tag, false).await {
                        tracing::warn!(delivery_tag = tag, error = %e, "Reject failed");
                    }
                }
                return;
            }
        };

        if delivery.redelivered {
            tracing::debug!(
                delivery_tag = tag,
                transfer_id = %event.transfer_id(),
                "Processing redelivered CDC event"
            );
        }

        let report = self.dispatch(&event).await;
        if !report.is_clean() {
            tracing::warn!(
                event_type = %report.event_type,
                transfer_id = %report.transfer_id,
                failed = report.failures().count(),
                attempted = report.attempted(),
                "CDC event dispatched with handler failures"
            );
        }

        if self.ack_mode == AckMode::Manual {
            if let Err(e) = self.source.ack(tag).await {
                tracing::warn!(delivery_tag = tag, error = %e, "Ack failed; event may be redelivered");
            }
        }
    }

    /// Run every matching handler for one event, isolating failures
    pub async fn dispatch(&self, event: &CdcEvent) -> DispatchReport {
        let handlers = self.handlers_for(event.event_type);
        let mut reports = Vec::with_capacity(handlers.len());

        for handler in handlers {
            let outcome = match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
                Ok(Ok(())) => HandlerOutcome::Succeeded,
                Ok(Err(e)) => {
                    tracing::error!(
                        handler = handler.name(),
                        event_type = %event.event_type,
                        transfer_id = %event.transfer_id(),
                        error = %e,
                        "CDC handler failed"
                    );
                    HandlerOutcome::Failed {
                        error: e.to_string(),
                    }
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(
                        handler = handler.name(),
                        event_type = %event.event_type,
                        transfer_id = %event.transfer_id(),
                        panic = %message,
                        "CDC handler panicked"
                    );
                    HandlerOutcome::Panicked { message }
                }
            };

            reports.push(HandlerReport {
                handler: handler.name().to_string(),
                outcome,
            });
        }

        DispatchReport {
            event_type: event.event_type,
            transfer_id: event.transfer_id(),
            handlers: reports,
        }
    }
}

fn same_handler(a: &HandlerRef, b: &HandlerRef) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdc::handler::HandlerError;
    use crate::cdc::ChannelBroker;
    use crate::domain::{AccountSnapshot, TransferRecord};
    use async_trait::async_trait;

    struct Recorder {
        name: String,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, event: &CdcEvent) -> Result<(), HandlerError> {
            self.seen
                .lock()
                .push(format!("{}:{}", self.name, event.event_type));
            Ok(())
        }
    }

    fn recorder(name: &str, seen: &Arc<Mutex<Vec<String>>>) -> HandlerRef {
        Arc::new(Recorder {
            name: name.to_string(),
            seen: Arc::clone(seen),
        })
    }

    fn event(event_type: CdcEventType) -> CdcEvent {
        let snapshot = |id| AccountSnapshot {
            id,
            debits_pending: 0,
            debits_posted: 0,
            credits_pending: 0,
            credits_posted: 0,
            ledger: 978,
            code: 1,
            flags: 0,
        };
        CdcEvent {
            event_type,
            timestamp: 1,
            ledger: 978,
            transfer: TransferRecord {
                id: 99,
                amount: 10,
                pending_id: 0,
                debit_account_id: 1,
                credit_account_id: 2,
                ledger: 978,
                code: 1000,
                flags: 0,
                timeout: 0,
                timestamp: 1,
            },
            debit_account: snapshot(1),
            credit_account: snapshot(2),
        }
    }

    fn dispatcher() -> CdcDispatcher {
        CdcDispatcher::new(Arc::new(ChannelBroker::new()), AckMode::Manual)
    }

    #[test]
    fn test_subscription_parse() {
        assert_eq!("*".parse::<Subscription>().unwrap(), Subscription::All);
        assert_eq!(
            "two_phase_voided".parse::<Subscription>().unwrap(),
            Subscription::Only(CdcEventType::TwoPhaseVoided)
        );
        assert!(matches!(
            "bogus".parse::<Subscription>(),
            Err(DispatchError::UnknownEventType(_))
        ));
    }

    #[test]
    fn test_ack_mode_parse() {
        assert_eq!("AUTO".parse::<AckMode>().unwrap(), AckMode::Auto);
        assert_eq!("manual".parse::<AckMode>().unwrap(), AckMode::Manual);
        assert!("sometimes".parse::<AckMode>().is_err());
        assert_eq!(AckMode::default(), AckMode::Manual);
    }

    #[tokio::test]
    async fn test_wildcard_runs_before_exact() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let d = dispatcher();
        d.register_handler("single_phase", recorder("exact", &seen)).unwrap();
        d.register_handler("*", recorder("any", &seen)).unwrap();

        let report = d.dispatch(&event(CdcEventType::SinglePhase)).await;
        assert_eq!(report.attempted(), 2);
        assert_eq!(
            *seen.lock(),
            vec!["any:single_phase".to_string(), "exact:single_phase".to_string()]
        );
    }

    #[tokio::test]
    async fn test_exact_handler_ignores_other_types() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let d = dispatcher();
        d.register_handler("two_phase_posted", recorder("posted", &seen)).unwrap();

        let report = d.dispatch(&event(CdcEventType::SinglePhase)).await;
        assert_eq!(report.attempted(), 0);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_same_handler_under_both_keys_runs_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let d = dispatcher();
        let handler = recorder("both", &seen);
        d.register_handler("*", Arc::clone(&handler)).unwrap();
        d.register_handler("single_phase", handler).unwrap();

        d.dispatch(&event(CdcEventType::SinglePhase)).await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_routing_keys() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let d = dispatcher();
        d.register_handler("two_phase_posted", recorder("a", &seen)).unwrap();
        d.register_handler("single_phase", recorder("b", &seen)).unwrap();
        assert_eq!(
            d.routing_keys(),
            vec!["ledger.single_phase".to_string(), "ledger.two_phase_posted".to_string()]
        );

        d.register_handler("*", recorder("c", &seen)).unwrap();
        assert_eq!(d.routing_keys(), vec![CATCH_ALL_BINDING.to_string()]);
    }

    #[tokio::test]
    async fn test_start_requires_connect() {
        let d = Arc::new(dispatcher());
        assert!(matches!(
            d.start_consuming().await,
            Err(DispatchError::NotConnected)
        ));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
