// =============================================================================
// Opportunity Broker — latest scan results fanned out to subscribers
// =============================================================================
//
// Holds the most recently published opportunity list and a registry of
// subscriber queues. Every scan tick replaces the list wholesale and pushes
// one serialized message per subscriber; queues are bounded, and a consumer
// that cannot keep up loses individual messages rather than stalling the
// publisher. Consumers that stay full for too long, or whose receiver is
// gone, are unsubscribed.
// =============================================================================

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::types::Opportunity;

/// Bound of each subscriber's queue.
pub const SUBSCRIBER_QUEUE_BOUND: usize = 16;

/// Consecutive full-queue drops after which a subscriber is evicted.
const MAX_CONSECUTIVE_DROPS: u32 = 8;

pub type SubscriberId = Uuid;

/// What a subscriber pulls off its queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerMessage {
    /// One published opportunity list, serialized as a JSON array.
    Payload(String),
    /// The service is stopping; the consumer loop should exit.
    Shutdown,
}

struct Slot {
    tx: mpsc::Sender<BrokerMessage>,
    consecutive_drops: u32,
}

struct BrokerInner {
    latest: Vec<Opportunity>,
    subscribers: HashMap<SubscriberId, Slot>,
}

pub struct OpportunityBroker {
    inner: Mutex<BrokerInner>,
}

impl OpportunityBroker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BrokerInner {
                latest: Vec::new(),
                subscribers: HashMap::new(),
            }),
        }
    }

    /// Copy of the most recently published list.
    pub fn latest(&self) -> Vec<Opportunity> {
        self.inner.lock().latest.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Register a new subscriber. The current list is enqueued immediately —
    /// an empty array too, so every consumer starts with a known state.
    pub fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<BrokerMessage>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_BOUND);
        let id = Uuid::new_v4();

        let mut inner = self.inner.lock();
        match serde_json::to_string(&inner.latest) {
            // A fresh queue cannot be full.
            Ok(payload) => {
                tx.try_send(BrokerMessage::Payload(payload)).ok();
            }
            Err(e) => error!(error = %e, "failed to serialize current list for new subscriber"),
        }
        inner.subscribers.insert(
            id,
            Slot {
                tx,
                consecutive_drops: 0,
            },
        );
        info!(subscriber = %id, total = inner.subscribers.len(), "subscriber added");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut inner = self.inner.lock();
        if inner.subscribers.remove(&id).is_some() {
            info!(subscriber = %id, total = inner.subscribers.len(), "subscriber removed");
        }
    }

    /// Replace the held list and fan it out. The list is serialized once; a
    /// serialization failure skips the fan-out entirely and the next tick
    /// publishes fresh data.
    pub fn publish(&self, list: Vec<Opportunity>) {
        let mut inner = self.inner.lock();
        inner.latest = list;

        let payload = match serde_json::to_string(&inner.latest) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "failed to serialize opportunity list, skipping publish");
                return;
            }
        };

        let mut evicted = Vec::new();
        for (id, slot) in inner.subscribers.iter_mut() {
            match slot.tx.try_send(BrokerMessage::Payload(payload.clone())) {
                Ok(()) => slot.consecutive_drops = 0,
                Err(TrySendError::Full(_)) => {
                    slot.consecutive_drops += 1;
                    warn!(
                        subscriber = %id,
                        consecutive_drops = slot.consecutive_drops,
                        "subscriber queue full, dropping message"
                    );
                    if slot.consecutive_drops >= MAX_CONSECUTIVE_DROPS {
                        warn!(subscriber = %id, "evicting persistently slow subscriber");
                        evicted.push(*id);
                    }
                }
                Err(TrySendError::Closed(_)) => evicted.push(*id),
            }
        }
        for id in evicted {
            inner.subscribers.remove(&id);
        }
    }

    /// Tell every subscriber to wind down, then clear the registry.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        for slot in inner.subscribers.values() {
            slot.tx.try_send(BrokerMessage::Shutdown).ok();
        }
        let count = inner.subscribers.len();
        inner.subscribers.clear();
        info!(notified = count, "broker shut down");
    }
}

impl Default for OpportunityBroker {
    fn default() -> Self {
        Self::new()
    }
}
