use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use crate::bus::{CommitToken, Delivery, EventBus, OffsetCommitter, Subscription};
use crate::{BusConfig, OutboundMessage, Record, Result, partition_for_key};

/// In-memory event bus for tests and single-process deployments.
///
/// Behaves like a partitioned log:
/// - keyed records go to `hash(key) % partitions`, unkeyed ones round-robin
/// - each consumer group gets its own copy of every record
/// - a group's partitions are split across its live members
/// - a brand new group starts at the end of the topic
/// - a group that resubscribes after losing all members replays everything
///   after its committed offsets
#[derive(Clone)]
pub struct InMemoryEventBus {
    inner: Arc<Inner>,
}

struct Inner {
    partitions: u32,
    state: Mutex<BusState>,
}

#[derive(Default)]
struct BusState {
    topics: HashMap<String, TopicLog>,
    groups: HashMap<(String, String), GroupState>,
    next_sequence: u64,
    next_unkeyed: u64,
    next_member: u64,
}

struct TopicLog {
    partitions: Vec<Vec<Entry>>,
}

/// A stored record and its position in the bus-wide publish order.
struct Entry {
    sequence: u64,
    record: Record,
}

impl TopicLog {
    fn new(partitions: u32) -> Self {
        Self {
            partitions: (0..partitions).map(|_| Vec::new()).collect(),
        }
    }

    fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.partitions.iter().flatten()
    }
}

/// Clones the records of `entries` in global publish order.
fn in_publish_order<'a>(entries: impl Iterator<Item = &'a Entry>) -> Vec<Record> {
    let mut entries: Vec<&Entry> = entries.collect();
    entries.sort_by_key(|e| e.sequence);
    entries.into_iter().map(|e| e.record.clone()).collect()
}

struct Member {
    id: u64,
    sender: mpsc::UnboundedSender<Delivery>,
}

struct GroupState {
    members: Vec<Member>,
    progress: Vec<PartitionProgress>,
}

/// Tracks the committed offset of one partition for one group.
///
/// Commits may arrive out of order when handlers defer them, so the
/// committed offset only moves over a contiguous run of completed offsets.
#[derive(Debug, Default, Clone)]
struct PartitionProgress {
    committed: u64,
    completed: BTreeSet<u64>,
}

impl PartitionProgress {
    fn starting_at(offset: u64) -> Self {
        Self {
            committed: offset,
            completed: BTreeSet::new(),
        }
    }

    fn complete(&mut self, offset: u64) {
        if offset < self.committed {
            return;
        }
        self.completed.insert(offset);
        while self.completed.remove(&self.committed) {
            self.committed += 1;
        }
    }

    fn is_done(&self, offset: u64) -> bool {
        offset < self.committed || self.completed.contains(&offset)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OffsetCommitter for Inner {
    fn commit(&self, group: &str, topic: &str, partition: u32, offset: u64) {
        let mut state = self.lock();
        if let Some(group_state) = state
            .groups
            .get_mut(&(topic.to_string(), group.to_string()))
            && let Some(progress) = group_state.progress.get_mut(partition as usize)
        {
            progress.complete(offset);
        }
    }
}

impl InMemoryEventBus {
    /// Creates a bus whose topics have `partitions` partitions (at least one).
    pub fn new(partitions: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                state: Mutex::new(BusState::default()),
            }),
        }
    }

    /// Creates a bus from connection settings.
    ///
    /// Only the partition count applies in-process; broker addresses are
    /// logged and otherwise ignored.
    pub fn from_config(config: &BusConfig) -> Self {
        tracing::info!(
            brokers = ?config.brokers,
            client_id = %config.client_id,
            partitions = config.partitions,
            "using in-memory event bus"
        );
        Self::new(config.partitions)
    }

    /// Returns every record published so far, in global publish order.
    pub fn published(&self) -> Vec<Record> {
        let state = self.inner.lock();
        in_publish_order(state.topics.values().flat_map(TopicLog::entries))
    }

    /// Returns the records published to one topic, in global publish order.
    pub fn published_on(&self, topic: &str) -> Vec<Record> {
        let state = self.inner.lock();
        state
            .topics
            .get(topic)
            .map(|log| in_publish_order(log.entries()))
            .unwrap_or_default()
    }

    /// Returns the topics of all published records, in publish order.
    pub fn published_topics(&self) -> Vec<String> {
        self.published().into_iter().map(|r| r.topic).collect()
    }

    /// Returns the committed offset of a group on one partition.
    pub fn committed_offset(&self, topic: &str, group: &str, partition: u32) -> Option<u64> {
        self.inner
            .lock()
            .groups
            .get(&(topic.to_string(), group.to_string()))
            .and_then(|g| g.progress.get(partition as usize))
            .map(|p| p.committed)
    }

    /// Returns the number of records a group has received but not committed.
    pub fn uncommitted_count(&self, topic: &str, group: &str) -> usize {
        let state = self.inner.lock();
        let Some(log) = state.topics.get(topic) else {
            return 0;
        };
        let Some(group_state) = state.groups.get(&(topic.to_string(), group.to_string())) else {
            return 0;
        };
        log.partitions
            .iter()
            .zip(&group_state.progress)
            .map(|(entries, progress)| {
                entries
                    .iter()
                    .filter(|e| !progress.is_done(e.record.offset))
                    .count()
            })
            .sum()
    }

    fn committer(&self) -> Arc<dyn OffsetCommitter> {
        self.inner.clone()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(BusConfig::default().partitions)
    }
}

/// Hands a record to the member that owns its partition.
///
/// Members whose receiver is gone are dropped from the group and the record
/// is routed to the next owner. With no members left the record stays
/// uncommitted and is replayed on the next subscription.
fn dispatch(
    group: &mut GroupState,
    group_name: &str,
    record: &Record,
    committer: &Arc<dyn OffsetCommitter>,
) {
    while !group.members.is_empty() {
        let index = record.partition as usize % group.members.len();
        let token = CommitToken::new(committer.clone(), group_name, record);
        let delivery = Delivery::new(record.clone(), token);
        if group.members[index].sender.send(delivery).is_ok() {
            return;
        }
        let member = group.members.remove(index);
        tracing::debug!(
            group = group_name,
            member = member.id,
            "dropping disconnected consumer"
        );
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, message: OutboundMessage) -> Result<Record> {
        let committer = self.committer();
        let partitions = self.inner.partitions;
        let mut state = self.inner.lock();

        let partition = match &message.key {
            Some(key) => partition_for_key(key, partitions),
            None => {
                let p = (state.next_unkeyed % u64::from(partitions)) as u32;
                state.next_unkeyed += 1;
                p
            }
        };
        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let log = state
            .topics
            .entry(message.topic.clone())
            .or_insert_with(|| TopicLog::new(partitions));
        let entries = &mut log.partitions[partition as usize];
        let record = Record {
            topic: message.topic,
            partition,
            offset: entries.len() as u64,
            key: message.key,
            value: message.value,
            headers: message.headers,
            timestamp: Utc::now(),
        };
        entries.push(Entry {
            sequence,
            record: record.clone(),
        });

        for ((topic, group_name), group) in state.groups.iter_mut() {
            if *topic == record.topic {
                dispatch(group, group_name, &record, &committer);
            }
        }

        metrics::counter!("bus_messages_published_total", "topic" => record.topic.clone())
            .increment(1);
        tracing::debug!(
            topic = %record.topic,
            key = ?record.key,
            partition = record.partition,
            offset = record.offset,
            "record published"
        );

        Ok(record)
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Subscription> {
        let committer = self.committer();
        let partitions = self.inner.partitions;
        let mut state = self.inner.lock();
        let state = &mut *state;

        let log = state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicLog::new(partitions));

        let group_state = state
            .groups
            .entry((topic.to_string(), group.to_string()))
            .or_insert_with(|| GroupState {
                members: Vec::new(),
                progress: log
                    .partitions
                    .iter()
                    .map(|entries| PartitionProgress::starting_at(entries.len() as u64))
                    .collect(),
            });

        group_state.members.retain(|m| !m.sender.is_closed());

        let (sender, receiver) = mpsc::unbounded_channel();

        if group_state.members.is_empty() {
            let mut replayed = 0usize;
            for (entries, progress) in log.partitions.iter().zip(&group_state.progress) {
                for record in entries
                    .iter()
                    .map(|e| &e.record)
                    .filter(|r| !progress.is_done(r.offset))
                {
                    let token = CommitToken::new(committer.clone(), group, record);
                    // The receiver is still in scope, so this cannot fail.
                    let _ = sender.send(Delivery::new(record.clone(), token));
                    replayed += 1;
                }
            }
            if replayed > 0 {
                tracing::info!(topic, group, replayed, "redelivering uncommitted records");
            }
        }

        state.next_member += 1;
        let member_id = state.next_member;
        group_state.members.push(Member {
            id: member_id,
            sender,
        });

        tracing::debug!(topic, group, member = member_id, "consumer joined group");
        Ok(Subscription::new(topic, group, receiver))
    }

    fn partition_count(&self) -> u32 {
        self.inner.partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(topic: &str, key: Option<&str>, n: i64) -> OutboundMessage {
        OutboundMessage::builder()
            .topic(topic)
            .maybe_key(key.map(str::to_string))
            .payload_raw(serde_json::json!({ "n": n }))
            .build()
            .unwrap()
    }

    #[test]
    fn partition_progress_advances_over_contiguous_prefix() {
        let mut progress = PartitionProgress::default();
        progress.complete(1);
        progress.complete(2);
        assert_eq!(progress.committed, 0);

        progress.complete(0);
        assert_eq!(progress.committed, 3);
        assert!(progress.completed.is_empty());

        progress.complete(1);
        assert_eq!(progress.committed, 3);
    }

    #[tokio::test]
    async fn same_key_goes_to_same_partition_in_order() {
        let bus = InMemoryEventBus::new(4);
        let mut offsets = Vec::new();
        let mut partitions = Vec::new();
        for n in 0..5 {
            let record = bus
                .publish(message("order.created", Some("order-1"), n))
                .await
                .unwrap();
            offsets.push(record.offset);
            partitions.push(record.partition);
        }

        assert!(partitions.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(offsets, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn unkeyed_messages_round_robin() {
        let bus = InMemoryEventBus::new(3);
        let mut partitions = Vec::new();
        for n in 0..3 {
            partitions.push(bus.publish(message("t", None, n)).await.unwrap().partition);
        }
        partitions.sort();
        assert_eq!(partitions, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn every_group_receives_every_record() {
        let bus = InMemoryEventBus::new(2);
        let mut billing = bus.subscribe("order.created", "billing").await.unwrap();
        let mut notifications = bus
            .subscribe("order.created", "notifications")
            .await
            .unwrap();

        bus.publish(message("order.created", Some("a"), 1))
            .await
            .unwrap();

        assert_eq!(
            billing.next_delivery().await.unwrap().record().value["n"],
            1
        );
        assert_eq!(
            notifications.next_delivery().await.unwrap().record().value["n"],
            1
        );
    }

    #[tokio::test]
    async fn new_group_starts_at_end_of_topic() {
        let bus = InMemoryEventBus::new(1);
        bus.publish(message("t", Some("k"), 1)).await.unwrap();

        let mut sub = bus.subscribe("t", "late").await.unwrap();
        bus.publish(message("t", Some("k"), 2)).await.unwrap();

        let delivery = sub.next_delivery().await.unwrap();
        assert_eq!(delivery.record().value["n"], 2);
    }

    #[tokio::test]
    async fn resubscribe_redelivers_uncommitted_records() {
        let bus = InMemoryEventBus::new(1);
        let mut sub = bus.subscribe("t", "g").await.unwrap();

        bus.publish(message("t", Some("k"), 1)).await.unwrap();
        bus.publish(message("t", Some("k"), 2)).await.unwrap();

        let first = sub.next_delivery().await.unwrap();
        first.commit();
        let _second = sub.next_delivery().await.unwrap();
        drop(sub);

        assert_eq!(bus.committed_offset("t", "g", 0), Some(1));
        assert_eq!(bus.uncommitted_count("t", "g"), 1);

        let mut restarted = bus.subscribe("t", "g").await.unwrap();
        let replayed = restarted.next_delivery().await.unwrap();
        assert_eq!(replayed.record().value["n"], 2);
        assert_eq!(replayed.record().offset, 1);
    }

    #[tokio::test]
    async fn published_log_keeps_global_order() {
        let bus = InMemoryEventBus::new(3);
        bus.publish(message("a", Some("x"), 1)).await.unwrap();
        bus.publish(message("b", Some("y"), 2)).await.unwrap();
        bus.publish(message("a", Some("z"), 3)).await.unwrap();

        assert_eq!(bus.published_topics(), vec!["a", "b", "a"]);
        let on_a: Vec<_> = bus
            .published_on("a")
            .into_iter()
            .map(|r| r.value["n"].clone())
            .collect();
        assert_eq!(on_a, vec![1, 3]);
        assert!(bus.published_on("missing").is_empty());
    }
}
