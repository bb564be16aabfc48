//! Async message bus between gateways and the dispatcher.
//!
//! Gateways publish inbound events; the dispatcher consumes them one by one.
//! Replies go straight through the gateway, so the bus only carries the
//! inbound direction.

use crate::error::{BusError, BusResult};
use crate::events::InboundEvent;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::{trace, warn};

/// Default capacity for the inbound queue.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Async message bus that decouples gateways from the dispatcher.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<MessageBusInner>,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus").finish_non_exhaustive()
    }
}

struct MessageBusInner {
    inbound_tx: mpsc::Sender<InboundEvent>,
    inbound_rx: RwLock<Option<mpsc::Receiver<InboundEvent>>>,
    stats: Arc<RwLock<BusStats>>,
}

/// Message bus statistics.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusStats {
    /// Inbound events accepted.
    pub inbound_count: u64,
    /// Inbound events consumed by the dispatcher.
    pub consumed_count: u64,
    /// Events dropped because the queue was full.
    pub dropped_count: u64,
}

impl MessageBus {
    /// Create a new message bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a new message bus with specified queue capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity.max(1));
        Self {
            inner: Arc::new(MessageBusInner {
                inbound_tx,
                inbound_rx: RwLock::new(Some(inbound_rx)),
                stats: Arc::new(RwLock::new(BusStats::default())),
            }),
        }
    }

    /// Publish an inbound event, waiting for queue space.
    pub async fn publish_inbound(&self, event: InboundEvent) -> BusResult<()> {
        self.inbound_handle().publish(event).await
    }

    /// Consume the next inbound event.
    ///
    /// Returns `None` when every sender is gone or the receiver was taken.
    pub async fn consume_inbound(&self) -> Option<InboundEvent> {
        let mut rx_guard = self.inner.inbound_rx.write().await;
        let event = rx_guard.as_mut()?.recv().await;
        drop(rx_guard);
        if event.is_some() {
            self.inner.stats.write().await.consumed_count += 1;
        }
        event
    }

    /// Consume the next inbound event, giving up after `timeout`.
    pub async fn consume_inbound_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Option<InboundEvent> {
        tokio::time::timeout(timeout, self.consume_inbound())
            .await
            .ok()
            .flatten()
    }

    /// Take exclusive ownership of the receiver.
    pub async fn take_receiver(&self) -> BusResult<mpsc::Receiver<InboundEvent>> {
        self.inner
            .inbound_rx
            .write()
            .await
            .take()
            .ok_or(BusError::ReceiverTaken)
    }

    /// Get current bus statistics.
    pub async fn stats(&self) -> BusStats {
        *self.inner.stats.read().await
    }

    /// Create a handle for publishing inbound events.
    ///
    /// Gateways hold this instead of the whole bus.
    pub fn inbound_handle(&self) -> InboundHandle {
        InboundHandle {
            tx: self.inner.inbound_tx.clone(),
            stats: Arc::clone(&self.inner.stats),
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Lightweight handle for publishing inbound events.
#[derive(Clone)]
pub struct InboundHandle {
    tx: mpsc::Sender<InboundEvent>,
    stats: Arc<RwLock<BusStats>>,
}

impl std::fmt::Debug for InboundHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundHandle")
            .field("closed", &self.tx.is_closed())
            .finish_non_exhaustive()
    }
}

impl InboundHandle {
    /// Publish an event, waiting for queue space.
    pub async fn publish(&self, event: InboundEvent) -> BusResult<()> {
        trace!(session = %event.session_id(), "publishing inbound event");
        self.tx
            .send(event)
            .await
            .map_err(|_| BusError::InboundClosed)?;
        self.stats.write().await.inbound_count += 1;
        Ok(())
    }

    /// Publish without waiting; a full queue drops the event.
    pub async fn try_publish(&self, event: InboundEvent) -> BusResult<bool> {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.stats.write().await.inbound_count += 1;
                Ok(true)
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(session = %event.session_id(), "inbound queue full, dropping event");
                self.stats.write().await.dropped_count += 1;
                Ok(false)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BusError::InboundClosed),
        }
    }
}

/// Builder for configuring a message bus.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageBusBuilder {
    inbound_capacity: Option<usize>,
}

impl MessageBusBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the inbound queue capacity.
    #[must_use]
    pub const fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = Some(capacity);
        self
    }

    /// Build the message bus.
    #[must_use]
    pub fn build(self) -> MessageBus {
        MessageBus::with_capacity(self.inbound_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ButtonEvent, TextEvent};
    use std::time::Duration;

    #[tokio::test]
    async fn test_inbound_event_flow() {
        let bus = MessageBus::new();

        bus.publish_inbound(TextEvent::new("7", "Hello").into())
            .await
            .unwrap();

        let received = bus.consume_inbound_timeout(Duration::from_millis(100)).await;
        match received {
            Some(InboundEvent::Text(text)) => assert_eq!(text.text, "Hello"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_order_is_preserved() {
        let bus = MessageBus::new();
        let handle = bus.inbound_handle();

        handle.publish(TextEvent::new("1", "a").into()).await.unwrap();
        handle
            .publish(ButtonEvent::new("1", "tok", "u", "x").into())
            .await
            .unwrap();

        assert!(matches!(bus.consume_inbound().await, Some(InboundEvent::Text(_))));
        assert!(matches!(bus.consume_inbound().await, Some(InboundEvent::Button(_))));
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let bus = MessageBusBuilder::new().inbound_capacity(1).build();
        let handle = bus.inbound_handle();

        assert!(handle.try_publish(TextEvent::new("1", "a").into()).await.unwrap());
        assert!(!handle.try_publish(TextEvent::new("1", "b").into()).await.unwrap());

        let stats = bus.stats().await;
        assert_eq!(stats.inbound_count, 1);
        assert_eq!(stats.dropped_count, 1);
    }

    #[tokio::test]
    async fn test_receiver_taken_once() {
        let bus = MessageBus::new();
        let _rx = bus.take_receiver().await.unwrap();
        assert!(matches!(bus.take_receiver().await, Err(BusError::ReceiverTaken)));
        assert!(bus.consume_inbound_timeout(Duration::from_millis(10)).await.is_none());
    }
}
