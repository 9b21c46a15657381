//! Correlated request/reply over two topics.
//!
//! A request goes to `<topic>` carrying `correlation-id` and `reply-topic`
//! headers; the responder answers on `<topic>.reply` with the same
//! correlation id.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{BusError, EventBus, OutboundMessage, Result};

/// Header carrying the request correlation id.
pub const CORRELATION_ID: &str = "correlation-id";

/// Header naming the topic the reply must be published to.
pub const REPLY_TOPIC: &str = "reply-topic";

/// Returns the reply topic paired with a request topic.
pub fn reply_topic(topic: &str) -> String {
    format!("{topic}.reply")
}

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<serde_json::Value>>>>;

/// Sends requests on one topic and awaits their correlated replies.
#[derive(Clone)]
pub struct RequestClient<B: EventBus + Clone> {
    bus: B,
    topic: String,
    timeout: Duration,
    pending: Pending,
}

impl<B: EventBus + Clone> RequestClient<B> {
    /// Subscribes to the reply topic and starts routing replies.
    ///
    /// `group` should be unique per client instance, otherwise replies are
    /// split between instances.
    pub async fn connect(bus: B, topic: &str, group: &str, timeout: Duration) -> Result<Self> {
        let mut replies = bus.subscribe(&reply_topic(topic), group).await?;
        let pending: Pending = Arc::default();

        let router = pending.clone();
        tokio::spawn(async move {
            while let Some(delivery) = replies.next().await {
                let record = delivery.record();
                let waiter = record.header(CORRELATION_ID).and_then(|id| {
                    router
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(id)
                });
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(record.value.clone());
                    }
                    None => tracing::debug!(
                        correlation_id = ?record.header(CORRELATION_ID),
                        "discarding reply with no waiting request"
                    ),
                }
                delivery.commit();
            }
        });

        Ok(Self {
            bus,
            topic: topic.to_string(),
            timeout,
            pending,
        })
    }

    /// Publishes a request and waits for its reply.
    ///
    /// Fails with [`BusError::Timeout`] when no reply arrives in time.
    #[tracing::instrument(skip(self, payload), fields(topic = %self.topic))]
    pub async fn request<T: Serialize + ?Sized>(&self, payload: &T) -> Result<serde_json::Value> {
        let correlation_id = Uuid::new_v4().to_string();
        let message = OutboundMessage::builder()
            .topic(&self.topic)
            .payload(&payload)?
            .header(CORRELATION_ID, &correlation_id)
            .header(REPLY_TOPIC, reply_topic(&self.topic))
            .build()?;

        let (tx, rx) = oneshot::channel();
        self.pending_map().insert(correlation_id.clone(), tx);

        if let Err(e) = self.bus.publish(message).await {
            self.pending_map().remove(&correlation_id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(BusError::Closed {
                topic: reply_topic(&self.topic),
            }),
            Err(_) => {
                self.pending_map().remove(&correlation_id);
                tracing::warn!(%correlation_id, timeout = ?self.timeout, "request timed out");
                Err(BusError::Timeout {
                    topic: self.topic.clone(),
                    after: self.timeout,
                })
            }
        }
    }

    fn pending_map(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<serde_json::Value>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Answers requests on `topic` with the value produced by `handler`.
///
/// Requests without a correlation id are committed and ignored.
pub async fn serve_requests<B, F, Fut>(
    bus: B,
    topic: &str,
    group: &str,
    handler: F,
) -> Result<JoinHandle<()>>
where
    B: EventBus + Clone,
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = serde_json::Value> + Send,
{
    let mut requests = bus.subscribe(topic, group).await?;
    let topic = topic.to_string();

    Ok(tokio::spawn(async move {
        while let Some(delivery) = requests.next().await {
            let record = delivery.record();
            let Some(correlation_id) = record.header(CORRELATION_ID).map(str::to_string) else {
                tracing::warn!(%topic, offset = record.offset, "request without correlation id");
                delivery.commit();
                continue;
            };
            let reply_to = record
                .header(REPLY_TOPIC)
                .map(str::to_string)
                .unwrap_or_else(|| reply_topic(&topic));

            let answer = handler(record.value.clone()).await;
            let reply = OutboundMessage::builder()
                .topic(reply_to)
                .payload_raw(answer)
                .header(CORRELATION_ID, correlation_id)
                .build();

            match reply {
                Ok(message) => {
                    if let Err(e) = bus.publish(message).await {
                        tracing::error!(error = %e, %topic, "failed to publish reply");
                    }
                }
                Err(e) => tracing::error!(error = %e, %topic, "failed to build reply"),
            }
            delivery.commit();
        }
    }))
}
