//! Dead-letter records.

use chrono::{DateTime, Utc};
use event_bus::Record;
use serde::{Deserialize, Serialize};

use crate::order::Order;

/// Description of the failure that exhausted a retry sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetail {
    /// Human-readable error message.
    pub message: String,

    /// Error category (e.g. `"CaptureDeclined"`).
    pub kind: String,

    /// Longer diagnostic detail such as the error source chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A record the payment service gave up on, kept for audit and compensation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    /// The full record that failed, as it was delivered.
    pub original_message: Record,

    /// Why processing failed.
    pub error: FailureDetail,

    /// When the retry sequence was abandoned.
    pub failed_at: DateTime<Utc>,

    /// Retries attempted after the first failure.
    pub retry_count: u32,
}

impl DeadLetterRecord {
    /// Returns the order carried by the original record, if it holds one.
    pub fn original_order(&self) -> Option<Order> {
        self.original_message.decode_value().ok()
    }

    /// Returns the partition key of the original record.
    pub fn original_key(&self) -> Option<&str> {
        self.original_message.key.as_deref()
    }
}
