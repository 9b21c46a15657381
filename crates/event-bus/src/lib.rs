//! Event bus abstraction for the order saga.
//!
//! Models a partitioned, append-only log with named topics and consumer
//! groups:
//! - messages with the same key land on the same partition, in publish order
//! - every consumer group sees every record of a topic it subscribes to
//! - within a group, partitions are spread across members
//! - delivery is at-least-once; a group resumes from its committed offsets
//!
//! [`InMemoryEventBus`] implements the contract in-process. A broker-backed
//! implementation only has to satisfy the [`EventBus`] trait.

pub mod bus;
pub mod config;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod message;
pub mod partition;
pub mod request;

pub use bus::{CommitToken, Delivery, EventBus, OffsetCommitter, Subscription};
pub use config::BusConfig;
pub use consumer::{Ack, ConsumerLoop, MessageHandler};
pub use error::{BusError, Result};
pub use memory::InMemoryEventBus;
pub use message::{Headers, OutboundMessage, OutboundMessageBuilder, Record};
pub use partition::partition_for_key;
pub use request::{RequestClient, reply_topic, serve_requests};
