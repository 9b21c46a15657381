use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{DeadLetterId, OrderId, PaymentId};
use domain::{DeadLetterRecord, Order, Payment};

use crate::Result;

/// Order records, written only by the order service.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Returns the order with the given id.
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Inserts the order or replaces the stored copy with the same id.
    async fn upsert_order(&self, order: &Order) -> Result<()>;

    /// Deletes the order. Returns false if it was not stored.
    async fn remove_order(&self, id: OrderId) -> Result<bool>;

    /// Returns every order, oldest first.
    async fn list_orders(&self) -> Result<Vec<Order>>;
}

/// Payment records, written only by the payment service.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Returns the payment with the given id.
    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>>;

    /// Returns the PAID payment for an order, if one exists.
    async fn find_paid_for_order(&self, order_id: OrderId) -> Result<Option<Payment>>;

    /// Stores a payment and returns the record that is now authoritative.
    ///
    /// Upserts are keyed by order for PAID payments: if the order already
    /// has a PAID payment with a different id, nothing is written and the
    /// existing payment is returned.
    async fn upsert_payment(&self, payment: &Payment) -> Result<Payment>;

    /// Returns every payment, oldest first.
    async fn list_payments(&self) -> Result<Vec<Payment>>;
}

/// A dead-letter record as kept by the audit store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDeadLetter {
    pub id: DeadLetterId,
    pub record: DeadLetterRecord,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only audit store for dead-letter records.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Appends a record and returns its audit id.
    async fn append_dead_letter(&self, record: &DeadLetterRecord) -> Result<DeadLetterId>;

    /// Returns every stored record in append order.
    async fn list_dead_letters(&self) -> Result<Vec<StoredDeadLetter>>;
}
