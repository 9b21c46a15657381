use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus (or the consumer side of a channel) has shut down.
    #[error("Event bus closed for topic {topic}")]
    Closed { topic: String },

    /// A correlated reply did not arrive before the deadline.
    #[error("No reply on topic {topic} within {after:?}")]
    Timeout { topic: String, after: Duration },

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A required field was not set on an outbound message.
    #[error("Outbound message is missing required field: {0}")]
    MissingField(&'static str),
}

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
