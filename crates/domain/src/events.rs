//! Typed payloads of the saga topics.
//!
//! Every saga topic carries exactly one payload type. Records are decoded at
//! the consumer boundary with [`SagaEvent::decode`], which picks the type
//! from the record's topic.

use chrono::{DateTime, Utc};
use common::OrderId;
use event_bus::{BusError, OutboundMessage, Record};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::dead_letter::DeadLetterRecord;
use crate::error::DecodeError;
use crate::order::Order;
use crate::payment::Payment;
use crate::topics;

/// Payload of `payment.failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailed {
    pub order: Order,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Payload of `order.cancelled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelled {
    pub order: Order,
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

/// Every event exchanged on a saga topic.
#[derive(Debug, Clone, PartialEq)]
pub enum SagaEvent {
    /// `order.created`: an order was persisted.
    OrderCreated(Order),

    /// `payment.created`: a payment was captured.
    PaymentCreated(Payment),

    /// `payment.failed`: capture failed after all retries.
    PaymentFailed(PaymentFailed),

    /// `order.cancelled`: an order was cancelled by compensation.
    OrderCancelled(OrderCancelled),

    /// `billing.dlq`: a record was dead-lettered.
    DeadLettered(DeadLetterRecord),
}

impl SagaEvent {
    /// Returns the topic this event is published to.
    pub fn topic(&self) -> &'static str {
        match self {
            SagaEvent::OrderCreated(_) => topics::ORDER_CREATED,
            SagaEvent::PaymentCreated(_) => topics::PAYMENT_CREATED,
            SagaEvent::PaymentFailed(_) => topics::PAYMENT_FAILED,
            SagaEvent::OrderCancelled(_) => topics::ORDER_CANCELLED,
            SagaEvent::DeadLettered(_) => topics::BILLING_DLQ,
        }
    }

    /// Returns a short name for logs and errors.
    pub fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::OrderCreated(_) => "OrderCreated",
            SagaEvent::PaymentCreated(_) => "PaymentCreated",
            SagaEvent::PaymentFailed(_) => "PaymentFailed",
            SagaEvent::OrderCancelled(_) => "OrderCancelled",
            SagaEvent::DeadLettered(_) => "DeadLettered",
        }
    }

    /// Returns the order this event concerns, if known.
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            SagaEvent::OrderCreated(order) => Some(order.id),
            SagaEvent::PaymentCreated(payment) => Some(payment.order_id),
            SagaEvent::PaymentFailed(failed) => Some(failed.order.id),
            SagaEvent::OrderCancelled(cancelled) => Some(cancelled.order.id),
            SagaEvent::DeadLettered(record) => record.original_order().map(|o| o.id),
        }
    }

    /// Returns the partition key.
    ///
    /// Order-scoped events are keyed by order id; dead letters keep the key
    /// of the record that failed.
    pub fn key(&self) -> Option<String> {
        match self {
            SagaEvent::DeadLettered(record) => record.original_message.key.clone(),
            other => other.order_id().map(|id| id.to_string()),
        }
    }

    /// Encodes the event as an outbound message.
    pub fn to_message(&self) -> Result<OutboundMessage, BusError> {
        let builder = OutboundMessage::builder()
            .topic(self.topic())
            .maybe_key(self.key());

        let builder = match self {
            SagaEvent::OrderCreated(order) => builder.payload(order)?,
            SagaEvent::PaymentCreated(payment) => builder.payload(payment)?,
            SagaEvent::PaymentFailed(failed) => builder.payload(failed)?,
            SagaEvent::OrderCancelled(cancelled) => builder.payload(cancelled)?,
            SagaEvent::DeadLettered(record) => builder.payload(record)?,
        };

        builder.build()
    }

    /// Decodes a record according to its topic.
    pub fn decode(record: &Record) -> Result<Self, DecodeError> {
        match record.topic.as_str() {
            topics::ORDER_CREATED => decode_payload(record).map(SagaEvent::OrderCreated),
            topics::PAYMENT_CREATED => decode_payload(record).map(SagaEvent::PaymentCreated),
            topics::PAYMENT_FAILED => decode_payload(record).map(SagaEvent::PaymentFailed),
            topics::ORDER_CANCELLED => decode_payload(record).map(SagaEvent::OrderCancelled),
            topics::BILLING_DLQ => decode_payload(record).map(SagaEvent::DeadLettered),
            other => Err(DecodeError::UnknownTopic(other.to_string())),
        }
    }

    /// Builds the error returned when a consumer receives an event it does
    /// not handle.
    pub fn unexpected(&self, consumer: &'static str) -> DecodeError {
        DecodeError::Unexpected {
            consumer,
            event_type: self.event_type(),
        }
    }
}

fn decode_payload<T: DeserializeOwned>(record: &Record) -> Result<T, DecodeError> {
    record
        .decode_value()
        .map_err(|source| DecodeError::Malformed {
            topic: record.topic.clone(),
            offset: record.offset,
            source,
        })
}
