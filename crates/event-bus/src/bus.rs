use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_core::Stream;
use tokio::sync::mpsc;

use crate::{OutboundMessage, Record, Result};

/// Core trait for event bus implementations.
///
/// Implementations must route same-keyed messages to the same partition in
/// publish order, fan every record out to each subscribed consumer group,
/// and redeliver uncommitted records when a group resubscribes.
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    /// Appends a message to its topic and returns the stored record.
    async fn publish(&self, message: OutboundMessage) -> Result<Record>;

    /// Joins `group` as a new member consuming `topic`.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Subscription>;

    /// Number of partitions every topic is split into.
    fn partition_count(&self) -> u32;
}

/// Receives offset commits for a consumer group.
pub trait OffsetCommitter: Send + Sync {
    /// Marks `offset` of `topic`/`partition` as processed by `group`.
    fn commit(&self, group: &str, topic: &str, partition: u32, offset: u64);
}

/// Handle used to acknowledge a single delivery.
///
/// Cloneable so a handler can move it into a spawned task; committing is
/// idempotent across clones.
#[derive(Clone)]
pub struct CommitToken {
    committer: Arc<dyn OffsetCommitter>,
    group: Arc<str>,
    topic: Arc<str>,
    partition: u32,
    offset: u64,
    committed: Arc<AtomicBool>,
}

impl CommitToken {
    /// Creates a token for one record delivered to `group`.
    pub fn new(committer: Arc<dyn OffsetCommitter>, group: &str, record: &Record) -> Self {
        Self {
            committer,
            group: Arc::from(group),
            topic: Arc::from(record.topic.as_str()),
            partition: record.partition,
            offset: record.offset,
            committed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Commits the record. Later calls are no-ops.
    pub fn commit(&self) {
        if self.committed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.committer
            .commit(&self.group, &self.topic, self.partition, self.offset);
        metrics::counter!("bus_messages_committed_total", "topic" => self.topic.to_string())
            .increment(1);
        tracing::trace!(
            group = %self.group,
            topic = %self.topic,
            partition = self.partition,
            offset = self.offset,
            "offset committed"
        );
    }

    /// Returns true once any clone of this token has committed.
    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for CommitToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitToken")
            .field("group", &self.group)
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .field("committed", &self.is_committed())
            .finish()
    }
}

/// A record handed to one consumer group member.
#[derive(Debug)]
pub struct Delivery {
    record: Record,
    token: CommitToken,
}

impl Delivery {
    /// Pairs a record with its commit token.
    pub fn new(record: Record, token: CommitToken) -> Self {
        Self { record, token }
    }

    /// The delivered record.
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Returns a token that commits this delivery when invoked.
    pub fn commit_token(&self) -> CommitToken {
        self.token.clone()
    }

    /// Commits this delivery.
    pub fn commit(&self) {
        self.token.commit();
    }

    /// Returns true once the delivery has been committed.
    pub fn is_committed(&self) -> bool {
        self.token.is_committed()
    }
}

/// The receiving end of one consumer group membership.
///
/// Yields deliveries for the partitions assigned to this member, in
/// partition order. Dropping the subscription leaves the group.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    group: String,
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    /// Wraps a delivery channel.
    pub fn new(
        topic: impl Into<String>,
        group: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            receiver,
        }
    }

    /// Waits for the next delivery. Returns `None` once the bus shuts down.
    pub async fn next_delivery(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// The subscribed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The consumer group this member belongs to.
    pub fn group(&self) -> &str {
        &self.group
    }
}

impl Stream for Subscription {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
