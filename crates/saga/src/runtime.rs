//! Subscribes every saga consumer to its topics.

use std::sync::Arc;

use domain::topics;
use event_bus::{ConsumerLoop, EventBus, MessageHandler};
use ledger::{DeadLetterStore, OrderLedger, PaymentLedger};
use tokio::task::JoinHandle;

use crate::compensation::CompensationCoordinator;
use crate::dead_letter::{Alerter, DeadLetterRecorder};
use crate::error::Result;
use crate::gateway::PaymentGateway;
use crate::notifications::{NotificationService, Notifier};
use crate::orders::OrderService;
use crate::payments::{PaymentConsumer, PaymentService};
use crate::users::UserDirectory;

/// Consumer group of the order service (compensation).
pub const ORDERS_GROUP: &str = "orders-consumer-group";

/// Consumer group of the billing service (payments, dead-letter recorder).
pub const BILLING_GROUP: &str = "billing-consumer-group";

/// Consumer group of the notification service.
pub const NOTIFICATIONS_GROUP: &str = "notifications-consumer-group";

/// Running saga consumers.
pub struct SagaRuntime {
    handles: Vec<JoinHandle<()>>,
}

impl SagaRuntime {
    /// Subscribes and spawns every consumer:
    ///
    /// | topic             | group           | handler                  |
    /// |-------------------|-----------------|--------------------------|
    /// | `order.created`   | billing         | payment service          |
    /// | `billing.dlq`     | billing         | dead-letter recorder     |
    /// | `payment.failed`  | orders          | compensation coordinator |
    /// | `billing.dlq`     | orders          | compensation coordinator |
    /// | `order.created`, `payment.created`, `order.cancelled` | notifications | notification service |
    pub async fn start<B, OL, U, PL, G, DS, A, N>(
        bus: &B,
        orders: Arc<OrderService<B, OL, U>>,
        payments: Arc<PaymentService<B, PL, G>>,
        dead_letters: DS,
        alerter: A,
        notifier: N,
    ) -> Result<Self>
    where
        B: EventBus,
        OL: OrderLedger + 'static,
        U: UserDirectory + 'static,
        PL: PaymentLedger + 'static,
        G: PaymentGateway,
        DS: DeadLetterStore + 'static,
        A: Alerter,
        N: Notifier,
    {
        let mut runtime = Self {
            handles: Vec::new(),
        };

        let payment_consumer = Arc::new(PaymentConsumer::new(payments));
        runtime
            .spawn(bus, topics::ORDER_CREATED, BILLING_GROUP, payment_consumer)
            .await?;

        let recorder = Arc::new(DeadLetterRecorder::new(dead_letters, alerter));
        runtime
            .spawn(bus, topics::BILLING_DLQ, BILLING_GROUP, recorder)
            .await?;

        let compensation = Arc::new(CompensationCoordinator::new(orders));
        for topic in [topics::PAYMENT_FAILED, topics::BILLING_DLQ] {
            runtime
                .spawn(bus, topic, ORDERS_GROUP, compensation.clone())
                .await?;
        }

        let notifications = Arc::new(NotificationService::new(notifier));
        for topic in [
            topics::ORDER_CREATED,
            topics::PAYMENT_CREATED,
            topics::ORDER_CANCELLED,
        ] {
            runtime
                .spawn(bus, topic, NOTIFICATIONS_GROUP, notifications.clone())
                .await?;
        }

        tracing::info!(consumers = runtime.handles.len(), "saga runtime started");
        Ok(runtime)
    }

    async fn spawn<B: EventBus, H: MessageHandler>(
        &mut self,
        bus: &B,
        topic: &str,
        group: &str,
        handler: Arc<H>,
    ) -> Result<()> {
        let subscription = bus.subscribe(topic, group).await?;
        self.handles
            .push(ConsumerLoop::new(subscription, handler).spawn());
        Ok(())
    }

    /// Returns the number of running consumers.
    pub fn consumer_count(&self) -> usize {
        self.handles.len()
    }

    /// Stops every consumer.
    ///
    /// In-flight payment chains run on their own tasks and are not
    /// interrupted; their records stay uncommitted if the process exits
    /// first.
    pub fn shutdown(self) {
        for handle in self.handles {
            handle.abort();
        }
        tracing::info!("saga runtime stopped");
    }
}
