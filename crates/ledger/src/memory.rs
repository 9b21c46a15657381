use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{DeadLetterId, OrderId, PaymentId};
use domain::{DeadLetterRecord, Order, Payment};
use tokio::sync::RwLock;

use crate::{
    LedgerError, Result,
    store::{DeadLetterStore, OrderLedger, PaymentLedger, StoredDeadLetter},
};

/// In-memory ledger implementation for tests and single-process runs.
///
/// Implements all three storage traits. Clones share the same state.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    payments: Arc<RwLock<HashMap<PaymentId, Payment>>>,
    dead_letters: Arc<RwLock<Vec<StoredDeadLetter>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail, for exercising error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Returns the number of stored payments.
    pub async fn payment_count(&self) -> usize {
        self.payments.read().await.len()
    }

    /// Clears all records.
    pub async fn clear(&self) {
        self.orders.write().await.clear();
        self.payments.write().await.clear();
        self.dead_letters.write().await.clear();
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderLedger for InMemoryLedger {
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn upsert_order(&self, order: &Order) -> Result<()> {
        self.check_writable()?;
        self.orders.write().await.insert(order.id, order.clone());
        Ok(())
    }

    async fn remove_order(&self, id: OrderId) -> Result<bool> {
        self.check_writable()?;
        Ok(self.orders.write().await.remove(&id).is_some())
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        let mut orders: Vec<_> = self.orders.read().await.values().cloned().collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(orders)
    }
}

#[async_trait]
impl PaymentLedger for InMemoryLedger {
    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        Ok(self.payments.read().await.get(&id).cloned())
    }

    async fn find_paid_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        Ok(self
            .payments
            .read()
            .await
            .values()
            .find(|p| p.order_id == order_id && p.is_paid())
            .cloned())
    }

    async fn upsert_payment(&self, payment: &Payment) -> Result<Payment> {
        self.check_writable()?;

        let mut payments = self.payments.write().await;
        if payment.is_paid()
            && let Some(existing) = payments
                .values()
                .find(|p| p.order_id == payment.order_id && p.is_paid() && p.id != payment.id)
        {
            return Ok(existing.clone());
        }

        payments.insert(payment.id, payment.clone());
        Ok(payment.clone())
    }

    async fn list_payments(&self) -> Result<Vec<Payment>> {
        let mut payments: Vec<_> = self.payments.read().await.values().cloned().collect();
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(payments)
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryLedger {
    async fn append_dead_letter(&self, record: &DeadLetterRecord) -> Result<DeadLetterId> {
        self.check_writable()?;

        let id = DeadLetterId::new();
        self.dead_letters.write().await.push(StoredDeadLetter {
            id,
            record: record.clone(),
            recorded_at: Utc::now(),
        });
        Ok(id)
    }

    async fn list_dead_letters(&self) -> Result<Vec<StoredDeadLetter>> {
        Ok(self.dead_letters.read().await.clone())
    }
}
