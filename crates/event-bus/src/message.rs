//! Messages going onto the bus and records coming off it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{BusError, Result};

/// Message headers. Ordered so that encoded records are deterministic.
pub type Headers = BTreeMap<String, String>;

/// A message waiting to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Destination topic.
    pub topic: String,

    /// Partition routing key. Unkeyed messages are spread round-robin.
    pub key: Option<String>,

    /// The payload as JSON.
    pub value: serde_json::Value,

    /// Transport headers (correlation ids, reply topics).
    pub headers: Headers,
}

impl OutboundMessage {
    /// Creates a new outbound message builder.
    pub fn builder() -> OutboundMessageBuilder {
        OutboundMessageBuilder::default()
    }
}

/// Builder for constructing outbound messages.
#[derive(Debug, Default)]
pub struct OutboundMessageBuilder {
    topic: Option<String>,
    key: Option<String>,
    value: Option<serde_json::Value>,
    headers: Headers,
}

impl OutboundMessageBuilder {
    /// Sets the destination topic.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Sets the partition key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets the partition key from an optional value.
    pub fn maybe_key(mut self, key: Option<String>) -> Self {
        self.key = key;
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        self.value = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Builds the message, failing if the topic or payload is missing.
    pub fn build(self) -> Result<OutboundMessage> {
        Ok(OutboundMessage {
            topic: self.topic.ok_or(BusError::MissingField("topic"))?,
            key: self.key,
            value: self.value.ok_or(BusError::MissingField("value"))?,
            headers: self.headers,
        })
    }
}

/// A record as stored in, and delivered from, a topic partition.
///
/// Records are immutable once published. Partition, offset and timestamp
/// are assigned by the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Topic the record was published to.
    pub topic: String,

    /// Partition within the topic.
    pub partition: u32,

    /// Position within the partition, starting at zero.
    pub offset: u64,

    /// Partition routing key, if any.
    pub key: Option<String>,

    /// The payload as JSON.
    pub value: serde_json::Value,

    /// Transport headers.
    #[serde(default)]
    pub headers: Headers,

    /// When the bus accepted the record.
    pub timestamp: DateTime<Utc>,
}

impl Record {
    /// Returns a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Deserializes the payload into a concrete type.
    pub fn decode_value<T: DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        T::deserialize(&self.value)
    }
}
