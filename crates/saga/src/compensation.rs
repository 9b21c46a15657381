//! Compensation coordinator: cancels orders whose payment failed.

use std::sync::Arc;

use async_trait::async_trait;
use domain::SagaEvent;
use event_bus::{Ack, Delivery, EventBus, MessageHandler};
use ledger::OrderLedger;

use crate::error::{Result, SagaError};
use crate::orders::OrderService;
use crate::users::UserDirectory;

/// Reacts to `payment.failed` and `billing.dlq` by cancelling the order.
///
/// Both topics fire for every exhausted payment; the second cancellation is
/// absorbed by [`OrderService::cancel_order`].
pub struct CompensationCoordinator<B, L, U>
where
    B: EventBus,
    L: OrderLedger,
    U: UserDirectory,
{
    orders: Arc<OrderService<B, L, U>>,
}

impl<B, L, U> CompensationCoordinator<B, L, U>
where
    B: EventBus,
    L: OrderLedger,
    U: UserDirectory,
{
    /// Creates a coordinator cancelling through `orders`.
    pub fn new(orders: Arc<OrderService<B, L, U>>) -> Self {
        Self { orders }
    }

    /// Applies the compensation for one saga event.
    pub async fn compensate(&self, event: SagaEvent) -> Result<()> {
        match event {
            SagaEvent::PaymentFailed(failed) => {
                tracing::error!(order_id = %failed.order.id, error = %failed.error, "payment failed");
                self.orders
                    .cancel_order(
                        failed.order.id,
                        &format!("Payment processing failed: {}", failed.error),
                    )
                    .await?;
            }
            SagaEvent::DeadLettered(record) => match record.original_order() {
                Some(order) => {
                    tracing::error!(order_id = %order.id, "billing gave up on order after max retries");
                    self.orders
                        .cancel_order(
                            order.id,
                            &format!("Billing service unavailable: {}", record.error.message),
                        )
                        .await?;
                }
                None => tracing::warn!(
                    topic = %record.original_message.topic,
                    offset = record.original_message.offset,
                    "dead letter carries no order, nothing to compensate"
                ),
            },
            other => return Err(other.unexpected("compensation").into()),
        }
        Ok(())
    }
}

#[async_trait]
impl<B, L, U> MessageHandler for CompensationCoordinator<B, L, U>
where
    B: EventBus,
    L: OrderLedger + 'static,
    U: UserDirectory + 'static,
{
    type Error = SagaError;

    fn name(&self) -> &'static str {
        "compensation"
    }

    async fn handle(&self, delivery: &Delivery) -> Result<Ack> {
        let event = SagaEvent::decode(delivery.record())?;
        self.compensate(event).await?;
        Ok(Ack::Commit)
    }
}
