//! Domain error types.

use thiserror::Error;

/// A creation request that cannot be accepted.
///
/// Raised before anything is persisted or published.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field was empty.
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    /// The amount is not a non-negative decimal number.
    #[error("totalAmount must be a non-negative decimal number, got {0:?}")]
    InvalidAmount(String),

    /// The status is not one of the known order statuses.
    #[error("Unknown order status: {0:?}")]
    UnknownStatus(String),
}

/// A bus record whose payload does not match its topic.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// No payload type is registered for the topic.
    #[error("No event type is registered for topic {0}")]
    UnknownTopic(String),

    /// The payload does not deserialize into the topic's type.
    #[error("Malformed {topic} payload at offset {offset}: {source}")]
    Malformed {
        topic: String,
        offset: u64,
        #[source]
        source: serde_json::Error,
    },

    /// The record decoded to an event the consumer does not handle.
    #[error("{consumer} cannot handle {event_type} events")]
    Unexpected {
        consumer: &'static str,
        event_type: &'static str,
    },
}
