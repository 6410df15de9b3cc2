//! Event types and delivery for streaming generation
//!
//! Streaming results reach host code as [`AiEvent`]s published on an
//! [`EventBus`]. Consumers either hold an [`EventSubscription`] (an async
//! channel) or register their own [`EventSink`].
//!
//! The bus itself is a plain fan-out. Ordering, at-most-once delivery per
//! index and "nothing after the terminal event" are enforced upstream by the
//! streaming operation before an event is published.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::FinishReason;

/// Identifier returned by [`EventBus::subscribe`] and [`EventBus::add_sink`]
pub type SubscriptionId = u64;

/// Events emitted while a streaming operation runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AiEvent {
    /// One generated token
    #[serde(rename_all = "camelCase")]
    Token {
        operation: u64,
        token: String,
        index: u32,
    },

    /// The operation finished; always the last event of an operation
    #[serde(rename_all = "camelCase")]
    Complete {
        operation: u64,
        total_tokens: u32,
        finish_reason: FinishReason,
    },

    /// The operation failed after streaming began; replaces `Complete`
    #[serde(rename_all = "camelCase")]
    Error {
        operation: u64,
        message: String,
        code: String,
    },
}

impl AiEvent {
    /// Operation this event belongs to
    pub fn operation(&self) -> u64 {
        match self {
            Self::Token { operation, .. }
            | Self::Complete { operation, .. }
            | Self::Error { operation, .. } => *operation,
        }
    }

    /// Whether this event ends its operation
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Token { .. })
    }

    /// Listener name used by host bindings
    pub fn listener_name(&self) -> &'static str {
        match self {
            Self::Token { .. } => "onToken",
            Self::Complete { .. } => "onComplete",
            Self::Error { .. } => "onError",
        }
    }
}

/// Trait for receiving events
///
/// This abstracts over the transport (async channel, FFI buffer, test
/// collector). Returning an error unregisters the sink.
pub trait EventSink: Send + Sync {
    fn send(&self, event: &AiEvent) -> Result<(), EventError>;
}

/// A sink could not take an event
#[derive(Debug, Clone, thiserror::Error)]
#[error("Event delivery failed: {message}")]
pub struct EventError {
    pub message: String,
}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "subscriber channel closed".to_string(),
        }
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: parking_lot::Mutex<Vec<AiEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<AiEvent> {
        self.events.lock().clone()
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: &AiEvent) -> Result<(), EventError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<AiEvent>,
}

impl EventSink for ChannelSink {
    fn send(&self, event: &AiEvent) -> Result<(), EventError> {
        self.tx
            .send(event.clone())
            .map_err(|_| EventError::channel_closed())
    }
}

/// Receiving end of [`EventBus::subscribe`]
///
/// Dropping the subscription unregisters it on the next publish.
pub struct EventSubscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<AiEvent>,
}

impl EventSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event; `None` once unsubscribed
    pub async fn recv(&mut self) -> Option<AiEvent> {
        self.rx.recv().await
    }

    /// Next already-delivered event, without waiting
    pub fn try_recv(&mut self) -> Option<AiEvent> {
        self.rx.try_recv().ok()
    }

    /// Receive events up to and including the next terminal event
    pub async fn collect_operation(&mut self) -> Vec<AiEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }
}

/// Fan-out of events to every registered subscriber
pub struct EventBus {
    sinks: RwLock<Vec<(SubscriptionId, Arc<dyn EventSink>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe with an async channel
    pub fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.add_sink(Arc::new(ChannelSink { tx }));
        EventSubscription { id, rx }
    }

    /// Register a custom sink
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sinks.write().push((id, sink));
        id
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut sinks = self.sinks.write();
        let before = sinks.len();
        sinks.retain(|(sink_id, _)| *sink_id != id);
        sinks.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.sinks.read().len()
    }

    /// Deliver an event to every subscriber, dropping those that fail
    ///
    /// Sinks are called on a snapshot of the subscriber list, so a sink may
    /// subscribe or unsubscribe from inside `send`.
    pub fn publish(&self, event: AiEvent) {
        let sinks: Vec<(SubscriptionId, Arc<dyn EventSink>)> = self.sinks.read().clone();
        let failed: Vec<SubscriptionId> = sinks
            .iter()
            .filter_map(|(id, sink)| sink.send(&event).err().map(|_| *id))
            .collect();

        if !failed.is_empty() {
            log::debug!("Dropping {} closed event subscriber(s)", failed.len());
            self.sinks.write().retain(|(id, _)| !failed.contains(id));
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(index: u32) -> AiEvent {
        AiEvent::Token {
            operation: 1,
            token: format!("t{}", index),
            index,
        }
    }

    #[test]
    fn test_vec_event_sink() {
        let bus = EventBus::new();
        let sink = Arc::new(VecEventSink::new());
        bus.add_sink(sink.clone());

        bus.publish(token(0));
        bus.publish(AiEvent::Complete {
            operation: 1,
            total_tokens: 1,
            finish_reason: FinishReason::Complete,
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(!events[0].is_terminal());
        assert!(events[1].is_terminal());
    }

    #[test]
    fn test_multiple_subscribers_and_unsubscribe() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(token(0));
        assert!(bus.unsubscribe(second.id()));
        assert!(!bus.unsubscribe(second.id()));
        bus.publish(token(1));

        assert_eq!(first.try_recv(), Some(token(0)));
        assert_eq!(first.try_recv(), Some(token(1)));
        assert_eq!(second.try_recv(), Some(token(0)));
        assert_eq!(second.try_recv(), None);
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let bus = EventBus::new();
        let subscription = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        drop(subscription);
        bus.publish(token(0));
        assert_eq!(bus.subscriber_count(), 0);
    }

    struct UnsubscribingSink {
        bus: Arc<EventBus>,
        id: parking_lot::Mutex<Option<SubscriptionId>>,
        seen: parking_lot::Mutex<u32>,
    }

    impl EventSink for UnsubscribingSink {
        fn send(&self, _event: &AiEvent) -> Result<(), EventError> {
            *self.seen.lock() += 1;
            if let Some(id) = self.id.lock().take() {
                self.bus.unsubscribe(id);
            }
            Ok(())
        }
    }

    #[test]
    fn test_sink_can_unsubscribe_itself() {
        let bus = Arc::new(EventBus::new());
        let sink = Arc::new(UnsubscribingSink {
            bus: bus.clone(),
            id: parking_lot::Mutex::new(None),
            seen: parking_lot::Mutex::new(0),
        });
        let id = bus.add_sink(sink.clone());
        *sink.id.lock() = Some(id);
        let mut other = bus.subscribe();

        bus.publish(token(0));
        bus.publish(token(1));

        assert_eq!(*sink.seen.lock(), 1);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(other.try_recv(), Some(token(0)));
        assert_eq!(other.try_recv(), Some(token(1)));
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(AiEvent::Complete {
            operation: 3,
            total_tokens: 4,
            finish_reason: FinishReason::MaxTokens,
        })
        .unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["totalTokens"], 4);
        assert_eq!(json["finishReason"], "maxTokens");
    }
}
