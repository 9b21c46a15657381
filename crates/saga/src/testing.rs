//! Bus wrappers for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use event_bus::{BusError, EventBus, InMemoryEventBus, OutboundMessage, Record, Subscription};

/// Rejects the next `times` publishes to one topic, then behaves like the
/// wrapped bus. Other topics are never affected.
#[derive(Clone)]
pub(crate) struct FlakyBus {
    inner: InMemoryEventBus,
    topic: &'static str,
    remaining: Arc<AtomicUsize>,
}

impl FlakyBus {
    pub(crate) fn failing(inner: InMemoryEventBus, topic: &'static str, times: usize) -> Self {
        Self {
            inner,
            topic,
            remaining: Arc::new(AtomicUsize::new(times)),
        }
    }

    /// Publishes to the failing topic that are still going to be rejected.
    pub(crate) fn remaining_failures(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventBus for FlakyBus {
    async fn publish(&self, message: OutboundMessage) -> event_bus::Result<Record> {
        if message.topic == self.topic
            && self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(BusError::Closed {
                topic: message.topic,
            });
        }
        self.inner.publish(message).await
    }

    async fn subscribe(&self, topic: &str, group: &str) -> event_bus::Result<Subscription> {
        self.inner.subscribe(topic, group).await
    }

    fn partition_count(&self) -> u32 {
        self.inner.partition_count()
    }
}
