//! Message broker seam
//!
//! The dispatcher consumes ledger change events from a topic-style broker
//! with routing-key subscriptions and explicit acknowledgement. `ChannelBroker`
//! is the in-process implementation: a single queue with delivery tags and
//! an unacknowledged set that can be requeued to simulate a consumer crash.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

/// Binding that matches every routing key
pub const CATCH_ALL_BINDING: &str = "#";

/// A message handed to the consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub redelivered: bool,
}

/// Broker errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker is not connected")]
    NotConnected,

    #[error("Unknown delivery tag: {0}")]
    UnknownDeliveryTag(u64),

    #[error("Broker connection failed: {0}")]
    Connection(String),
}

/// Consumer side of the broker
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Bind the consumer queue to these routing keys
    async fn subscribe(&self, routing_keys: &[String]) -> Result<(), BrokerError>;

    /// Wait for the next delivery; `None` once the source is closed.
    /// Must be cancel-safe: a cancelled call never loses a message.
    async fn next_delivery(&self) -> Result<Option<Delivery>, BrokerError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    /// Negative acknowledgement; `requeue = false` drops the message
    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

#[derive(Debug, Default)]
struct BrokerState {
    connected: bool,
    closed: bool,
    bindings: Vec<String>,
    queue: VecDeque<Delivery>,
    unacked: BTreeMap<u64, Delivery>,
    next_tag: u64,
    acked: u64,
}

impl BrokerState {
    fn is_bound(&self, routing_key: &str) -> bool {
        self.bindings
            .iter()
            .any(|binding| binding == CATCH_ALL_BINDING || binding == routing_key)
    }
}

/// In-process broker queue
#[derive(Debug, Default)]
pub struct ChannelBroker {
    state: Mutex<BrokerState>,
    notify: Notify,
}

impl ChannelBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message (producer side)
    pub async fn publish(&self, routing_key: &str, payload: Vec<u8>) {
        let mut state = self.state.lock().await;
        state.next_tag += 1;
        let delivery = Delivery {
            delivery_tag: state.next_tag,
            routing_key: routing_key.to_string(),
            payload,
            redelivered: false,
        };
        state.queue.push_back(delivery);
        drop(state);
        self.notify.notify_one();
    }

    /// Return every unacknowledged delivery to the head of the queue,
    /// flagged as redelivered, as a broker does when a consumer dies
    pub async fn requeue_unacked(&self) -> usize {
        let mut state = self.state.lock().await;
        let unacked = std::mem::take(&mut state.unacked);
        let count = unacked.len();
        for (_, mut delivery) in unacked.into_iter().rev() {
            delivery.redelivered = true;
            state.queue.push_front(delivery);
        }
        state.connected = false;
        state.closed = false;
        drop(state);
        self.notify.notify_one();
        count
    }

    /// Messages waiting to be delivered
    pub async fn pending(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Deliveries handed out but not yet acknowledged
    pub async fn unacked(&self) -> usize {
        self.state.lock().await.unacked.len()
    }

    /// Total acknowledgements received
    pub async fn acked(&self) -> u64 {
        self.state.lock().await.acked
    }
}

#[async_trait]
impl EventSource for ChannelBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        state.connected = true;
        state.closed = false;
        Ok(())
    }

    async fn subscribe(&self, routing_keys: &[String]) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(BrokerError::NotConnected);
        }
        for key in routing_keys {
            if !state.bindings.contains(key) {
                state.bindings.push(key.clone());
            }
        }
        Ok(())
    }

    async fn next_delivery(&self) -> Result<Option<Delivery>, BrokerError> {
        loop {
            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Ok(None);
                }
                if !state.connected {
                    return Err(BrokerError::NotConnected);
                }

                // Messages with no matching binding are not routed to this queue
                while let Some(delivery) = state.queue.pop_front() {
                    if state.is_bound(&delivery.routing_key) {
                        state.unacked.insert(delivery.delivery_tag, delivery.clone());
                        return Ok(Some(delivery));
                    }
                    tracing::trace!(routing_key = %delivery.routing_key, "Dropping unrouted message");
                }
            }
            self.notify.notified().await;
        }
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        state
            .unacked
            .remove(&delivery_tag)
            .ok_or(BrokerError::UnknownDeliveryTag(delivery_tag))?;
        state.acked += 1;
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let mut delivery = state
            .unacked
            .remove(&delivery_tag)
            .ok_or(BrokerError::UnknownDeliveryTag(delivery_tag))?;
        if requeue {
            delivery.redelivered = true;
            state.queue.push_front(delivery);
            drop(state);
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.connected = false;
        state.bindings.clear();
        drop(state);
        self.notify.notify_waiters();
        self.notify.notify_one();
        Ok(())
    }
}
