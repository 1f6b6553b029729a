//! Typed publish/subscribe bus
//!
//! A bus is constructed explicitly and handed to whoever publishes into it,
//! so independent managers never share notification state.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::download::{Download, DownloadId};

/// Published once per download when it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadFinished {
    pub download: Download,
}

impl DownloadFinished {
    pub const NAME: &'static str = "download finished";

    pub fn id(&self) -> DownloadId {
        self.download.id()
    }
}

/// Fan-out bus with one unbounded queue per subscriber. A slow subscriber
/// never loses events; its queue grows until it catches up or is dropped.
pub struct EventBus<E> {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<E>>>>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Deliver `event` to every current subscriber. Returns how many
    /// subscribers it reached; publishing with none is not an error.
    pub fn publish(&self, event: E) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());

        if subscribers.is_empty() {
            tracing::debug!("Published event with no subscribers");
        }
        subscribers.len()
    }

    /// Subscribers only see events published after they subscribed.
    pub fn subscribe(&self) -> Subscription<E> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().push(sender);
        Subscription { receiver }
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sender| !sender.is_closed());
        subscribers.len()
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

pub struct Subscription<E> {
    receiver: mpsc::UnboundedReceiver<E>,
}

impl<E> Subscription<E> {
    /// Next event, or `None` once every handle to the bus is gone and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<E> {
        self.receiver.recv().await
    }

    /// Wait for the first event accepted by `predicate`, discarding others.
    pub async fn next_matching<F>(&mut self, mut predicate: F) -> Option<E>
    where
        F: FnMut(&E) -> bool,
    {
        while let Some(event) = self.recv().await {
            if predicate(&event) {
                return Some(event);
            }
        }
        None
    }
}

impl Subscription<DownloadFinished> {
    /// Wait for the finished event of one particular download.
    pub async fn finished(&mut self, id: DownloadId) -> Option<Download> {
        self.next_matching(|event| event.id() == id)
            .await
            .map(|event| event.download)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        assert_eq!(bus.publish(7u32), 2);
        assert_eq!(first.recv().await, Some(7));
        assert_eq!(second.recv().await, Some(7));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus: EventBus<u32> = EventBus::new();
        assert_eq!(bus.publish(1), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_next_matching_skips_others() {
        let bus = EventBus::new();
        let mut subscription = bus.subscribe();

        bus.publish(1u32);
        bus.publish(2);
        bus.publish(3);

        assert_eq!(subscription.next_matching(|n| *n == 3).await, Some(3));
    }

    #[tokio::test]
    async fn test_closed_bus_ends_subscription() {
        let bus: EventBus<u32> = EventBus::new();
        let mut subscription = bus.subscribe();
        drop(bus);

        assert_eq!(subscription.recv().await, None);
    }

    #[tokio::test]
    async fn test_slow_subscriber_keeps_every_event() {
        let bus = EventBus::new();
        let mut subscription = bus.subscribe();

        for n in 0..500u32 {
            bus.publish(n);
        }

        for n in 0..500u32 {
            assert_eq!(subscription.recv().await, Some(n));
        }
    }

    #[tokio::test]
    async fn test_dropped_subscriber_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        let dropped = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(dropped);
        assert_eq!(bus.publish(1u32), 1);
        assert_eq!(bus.subscriber_count(), 1);
        drop(kept);
    }

    #[tokio::test]
    async fn test_queued_events_survive_closed_bus() {
        let bus = EventBus::new();
        let mut subscription = bus.subscribe();
        bus.publish(9u32);
        drop(bus);

        assert_eq!(subscription.recv().await, Some(9));
        assert_eq!(subscription.recv().await, None);
    }
}
