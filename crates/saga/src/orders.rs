//! Order service: creation, reads and compensating cancellation.

use chrono::Utc;
use common::OrderId;
use domain::{CreateOrder, Order, OrderCancelled, SagaEvent};
use event_bus::EventBus;
use ledger::OrderLedger;
use tokio::sync::Mutex;

use crate::error::{Result, SagaError};
use crate::users::UserDirectory;

/// Owns the order ledger and publishes order lifecycle events.
pub struct OrderService<B, L, U>
where
    B: EventBus,
    L: OrderLedger,
    U: UserDirectory,
{
    bus: B,
    ledger: L,
    users: U,
    cancel_lock: Mutex<()>,
}

impl<B, L, U> OrderService<B, L, U>
where
    B: EventBus,
    L: OrderLedger,
    U: UserDirectory,
{
    /// Creates a new order service.
    pub fn new(bus: B, ledger: L, users: U) -> Self {
        Self {
            bus,
            ledger,
            users,
            cancel_lock: Mutex::new(()),
        }
    }

    /// Returns the underlying ledger.
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Validates the request, resolves the user, persists the order and
    /// publishes `order.created`.
    ///
    /// Nothing is published unless the order was persisted, and the order is
    /// removed again if `order.created` cannot be published.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn create_order(&self, request: CreateOrder) -> Result<Order> {
        let new_order = request.validate()?;

        if self.users.find_user(&new_order.user_id).await?.is_none() {
            tracing::warn!("order rejected, user not found");
            return Err(SagaError::UserNotFound(new_order.user_id));
        }

        let order = new_order.into_order(Utc::now());
        self.ledger.upsert_order(&order).await?;

        let message = SagaEvent::OrderCreated(order.clone()).to_message()?;
        if let Err(e) = self.bus.publish(message).await {
            tracing::error!(order_id = %order.id, error = %e, "failed to publish order.created, removing order");
            if let Err(undo) = self.ledger.remove_order(order.id).await {
                tracing::error!(error = %undo, "failed to remove unannounced order");
            }
            return Err(e.into());
        }

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(order_id = %order.id, total = %order.total_amount, "order created");

        Ok(order)
    }

    /// Returns every order, oldest first.
    pub async fn find_all(&self) -> Result<Vec<Order>> {
        Ok(self.ledger.list_orders().await?)
    }

    /// Returns one order.
    pub async fn find_one(&self, id: OrderId) -> Result<Order> {
        self.ledger
            .get_order(id)
            .await?
            .ok_or(SagaError::OrderNotFound(id))
    }

    /// Cancels an order and publishes `order.cancelled`.
    ///
    /// Missing and already-cancelled orders are left alone and nothing is
    /// published. Returns the cancelled order when a transition happened.
    ///
    /// If `order.cancelled` cannot be published the previous state is
    /// restored, so the next cancellation request performs the transition
    /// again.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, id: OrderId, reason: &str) -> Result<Option<Order>> {
        let _guard = self.cancel_lock.lock().await;

        let Some(previous) = self.ledger.get_order(id).await? else {
            tracing::warn!("cancellation requested for unknown order");
            return Ok(None);
        };

        let mut order = previous.clone();
        let now = Utc::now();
        if !order.cancel(now) {
            tracing::info!("order already cancelled, ignoring");
            return Ok(None);
        }

        self.ledger.upsert_order(&order).await?;

        let event = SagaEvent::OrderCancelled(OrderCancelled {
            order: order.clone(),
            reason: reason.to_string(),
            cancelled_at: now,
        });
        if let Err(e) = self.publish(event).await {
            tracing::error!(error = %e, "failed to publish order.cancelled, restoring order");
            if let Err(undo) = self.ledger.upsert_order(&previous).await {
                tracing::error!(error = %undo, "failed to restore order after unannounced cancellation");
            }
            return Err(e);
        }

        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!("order cancelled");

        Ok(Some(order))
    }

    async fn publish(&self, event: SagaEvent) -> Result<()> {
        self.bus.publish(event.to_message()?).await?;
        Ok(())
    }
}
