//! Consumer loop driving a subscription through a handler.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::task::JoinHandle;

use crate::bus::{Delivery, Subscription};

/// What the consumer loop should do with a delivery once the handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The record is fully processed; commit it now.
    Commit,
    /// The handler took the commit token and will commit later.
    Deferred,
}

/// Handles records from one topic subscription.
///
/// Errors are logged by the loop and the record is committed anyway: a
/// failing handler must never stall its partition.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Error type returned by the handler.
    type Error: std::fmt::Display + Send;

    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Processes one delivery.
    async fn handle(&self, delivery: &Delivery) -> Result<Ack, Self::Error>;
}

/// Pulls deliveries off a subscription one at a time and feeds a handler.
///
/// Handling is sequential, so records of a partition are processed in
/// publish order. Handlers that need to wait (retry backoff) return
/// [`Ack::Deferred`] and continue on their own task.
pub struct ConsumerLoop<H: MessageHandler> {
    subscription: Subscription,
    handler: Arc<H>,
}

impl<H: MessageHandler> ConsumerLoop<H> {
    /// Creates a loop for the given subscription and handler.
    pub fn new(subscription: Subscription, handler: Arc<H>) -> Self {
        Self {
            subscription,
            handler,
        }
    }

    /// Runs until the subscription closes.
    pub async fn run(mut self) {
        tracing::info!(
            handler = self.handler.name(),
            topic = self.subscription.topic(),
            group = self.subscription.group(),
            "consumer started"
        );

        while let Some(delivery) = self.subscription.next().await {
            self.dispatch(delivery).await;
        }

        tracing::info!(handler = self.handler.name(), "consumer stopped");
    }

    /// Spawns the loop onto the tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    #[tracing::instrument(
        skip(self, delivery),
        fields(
            handler = self.handler.name(),
            topic = %delivery.record().topic,
            partition = delivery.record().partition,
            offset = delivery.record().offset,
        )
    )]
    async fn dispatch(&self, delivery: Delivery) {
        match self.handler.handle(&delivery).await {
            Ok(Ack::Commit) => delivery.commit(),
            Ok(Ack::Deferred) => {}
            Err(e) => {
                metrics::counter!("consumer_handler_errors_total", "handler" => self.handler.name())
                    .increment(1);
                tracing::error!(error = %e, "handler failed, committing to keep partition moving");
                delivery.commit();
            }
        }
    }
}
