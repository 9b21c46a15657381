//! Payment service: capture with bounded retry, escalation to the
//! dead-letter topic on exhaustion.
//!
//! A capture is never repeated once it succeeded: later attempts of the
//! same chain only persist and announce the payment.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, PaymentId};
use domain::{DeadLetterRecord, FailureDetail, Order, Payment, PaymentFailed, SagaEvent};
use event_bus::{Ack, Delivery, EventBus, MessageHandler, Record};
use ledger::PaymentLedger;
use thiserror::Error;

use crate::error::{Result, SagaError};
use crate::gateway::{CaptureError, PaymentGateway};
use crate::retry::RetryPolicy;

/// How a capture sequence for one order ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    /// Capture succeeded and `payment.created` was published.
    Captured { payment: Payment, attempts: u32 },

    /// A PAID payment already existed; `payment.created` was re-published
    /// and no capture was attempted.
    AlreadyPaid(Payment),

    /// Every attempt failed before any capture succeeded; `payment.failed`
    /// and the dead letter were published.
    Exhausted { attempts: u32, error: String },

    /// The order is paid but `payment.created` could not be published
    /// before retries ran out. Nothing was escalated; redelivering the
    /// `order.created` record re-publishes the stored payment.
    Unannounced {
        payment: Payment,
        attempts: u32,
        error: String,
    },
}

/// A PAID payment the chain knows about and must not capture again.
#[derive(Debug, Clone)]
enum Settled {
    /// Captured by this chain.
    Captured(Payment),
    /// Already in the ledger when the chain looked.
    Found(Payment),
}

impl Settled {
    fn payment(&self) -> &Payment {
        match self {
            Settled::Captured(payment) | Settled::Found(payment) => payment,
        }
    }
}

#[derive(Debug, Error)]
enum AttemptError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Saga(#[from] SagaError),
}

impl AttemptError {
    fn kind(&self) -> &'static str {
        match self {
            AttemptError::Capture(e) => e.kind(),
            AttemptError::Saga(SagaError::Ledger(_)) => "LedgerError",
            AttemptError::Saga(SagaError::Bus(_)) => "BusError",
            AttemptError::Saga(_) => "SagaError",
        }
    }

    fn detail(&self) -> FailureDetail {
        let mut chain = Vec::new();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }

        FailureDetail {
            message: self.to_string(),
            kind: self.kind().to_string(),
            detail: (!chain.is_empty()).then(|| chain.join(": ")),
        }
    }
}

/// Owns the payment ledger and captures payments for new orders.
pub struct PaymentService<B, L, G>
where
    B: EventBus,
    L: PaymentLedger,
    G: PaymentGateway,
{
    bus: B,
    ledger: L,
    gateway: G,
    policy: RetryPolicy,
}

impl<B, L, G> PaymentService<B, L, G>
where
    B: EventBus,
    L: PaymentLedger,
    G: PaymentGateway,
{
    /// Creates a new payment service.
    pub fn new(bus: B, ledger: L, gateway: G, policy: RetryPolicy) -> Self {
        Self {
            bus,
            ledger,
            gateway,
            policy,
        }
    }

    /// Returns the retry policy in use.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Returns the underlying ledger.
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Runs the full capture sequence for `order`.
    ///
    /// `original` is the `order.created` record being processed; it is
    /// carried through every retry and wrapped into the dead letter on
    /// exhaustion. Never fails: every error becomes a retry or, at the end,
    /// an escalation. Escalation only happens when no payment exists for
    /// the order.
    #[tracing::instrument(skip(self, order, original), fields(order_id = %order.id, offset = original.offset))]
    pub async fn create_payment(&self, order: &Order, original: &Record) -> PaymentOutcome {
        let started = Instant::now();
        let outcome = self.run_chain(order, original).await;
        metrics::histogram!("payment_chain_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        outcome
    }

    async fn run_chain(&self, order: &Order, original: &Record) -> PaymentOutcome {
        let mut settled = None;
        let mut retry = 0;
        loop {
            metrics::counter!("payment_attempts_total").increment(1);
            let attempts = retry + 1;

            match self.attempt(order, &mut settled).await {
                Ok(Settled::Found(payment)) => return PaymentOutcome::AlreadyPaid(payment),
                Ok(Settled::Captured(payment)) => {
                    tracing::info!(payment_id = %payment.id, attempts, "payment captured");
                    return PaymentOutcome::Captured { payment, attempts };
                }
                Err(e) => {
                    tracing::error!(error = %e, retry, "failed to create payment");

                    if !self.policy.should_retry(retry) {
                        return match settled {
                            Some(known) => {
                                metrics::counter!("payments_unannounced_total").increment(1);
                                tracing::error!(
                                    payment_id = %known.payment().id,
                                    "order is paid but payment.created could not be published"
                                );
                                PaymentOutcome::Unannounced {
                                    payment: known.payment().clone(),
                                    attempts,
                                    error: e.to_string(),
                                }
                            }
                            None => {
                                self.escalate(order, original, &e).await;
                                PaymentOutcome::Exhausted {
                                    attempts,
                                    error: e.to_string(),
                                }
                            }
                        };
                    }

                    let delay = self.policy.delay_before_retry(retry);
                    tracing::warn!(?delay, "retrying payment creation");
                    metrics::counter!("payment_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
            }
        }
    }

    /// One attempt: find or capture the payment, persist it, announce it.
    ///
    /// `settled` survives failed attempts, so a payment captured earlier in
    /// the chain is persisted and announced again instead of re-captured.
    async fn attempt(
        &self,
        order: &Order,
        settled: &mut Option<Settled>,
    ) -> std::result::Result<Settled, AttemptError> {
        let known = match settled.take() {
            Some(known) => known,
            None => self.settle(order).await?,
        };
        let known = settled.insert(known);

        if let Settled::Captured(payment) = known {
            *payment = self
                .ledger
                .upsert_payment(payment)
                .await
                .map_err(SagaError::from)?;
        }

        self.publish(SagaEvent::PaymentCreated(known.payment().clone()))
            .await?;
        Ok(known.clone())
    }

    /// Returns the order's PAID payment, capturing only if there is none.
    async fn settle(&self, order: &Order) -> std::result::Result<Settled, AttemptError> {
        let existing = self
            .ledger
            .find_paid_for_order(order.id)
            .await
            .map_err(SagaError::from)?;
        if let Some(existing) = existing {
            tracing::info!(payment_id = %existing.id, "order already paid, re-publishing payment.created");
            return Ok(Settled::Found(existing));
        }

        let receipt = self.gateway.capture(order).await?;
        metrics::counter!("payments_captured_total").increment(1);
        tracing::debug!(reference = %receipt.reference, "capture approved");
        Ok(Settled::Captured(Payment::paid_for(order, Utc::now())))
    }

    async fn escalate(&self, order: &Order, original: &Record, error: &AttemptError) {
        metrics::counter!("payments_failed_total").increment(1);
        let failed_at = Utc::now();

        let failed = SagaEvent::PaymentFailed(PaymentFailed {
            order: order.clone(),
            error: error.to_string(),
            failed_at,
        });
        if let Err(e) = self.publish(failed).await {
            tracing::error!(error = %e, "failed to publish payment.failed");
        }

        let dead_letter = SagaEvent::DeadLettered(DeadLetterRecord {
            original_message: original.clone(),
            error: error.detail(),
            failed_at,
            retry_count: self.policy.max_retries,
        });
        match self.publish(dead_letter).await {
            Ok(()) => tracing::warn!(retries = self.policy.max_retries, "message sent to dead-letter topic"),
            Err(e) => tracing::error!(error = %e, "failed to send message to dead-letter topic"),
        }
    }

    async fn publish(&self, event: SagaEvent) -> Result<()> {
        self.bus.publish(event.to_message()?).await?;
        Ok(())
    }

    /// Returns every payment, oldest first.
    pub async fn find_all_payments(&self) -> Result<Vec<Payment>> {
        Ok(self.ledger.list_payments().await?)
    }

    /// Returns one payment.
    pub async fn find_by_id(&self, id: PaymentId) -> Result<Payment> {
        self.ledger
            .get_payment(id)
            .await?
            .ok_or(SagaError::PaymentNotFound(id))
    }
}

/// Consumes `order.created` and hands each order to its own capture task.
///
/// The record is committed when its capture sequence ends, so backoff for
/// one order never holds up the others on the same partition. A chain that
/// ends [`PaymentOutcome::Unannounced`] leaves its record uncommitted so a
/// restart replays it. A duplicate delivery for an order whose chain is
/// still running is committed without starting a second chain.
pub struct PaymentConsumer<B, L, G>
where
    B: EventBus,
    L: PaymentLedger,
    G: PaymentGateway,
{
    service: Arc<PaymentService<B, L, G>>,
    in_flight: Arc<Mutex<HashSet<OrderId>>>,
}

impl<B, L, G> PaymentConsumer<B, L, G>
where
    B: EventBus,
    L: PaymentLedger,
    G: PaymentGateway,
{
    /// Creates a consumer driving `service`.
    pub fn new(service: Arc<PaymentService<B, L, G>>) -> Self {
        Self {
            service,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

/// Returns false if a chain for `order_id` is already running.
fn claim(in_flight: &Mutex<HashSet<OrderId>>, order_id: OrderId) -> bool {
    in_flight
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(order_id)
}

fn release(in_flight: &Mutex<HashSet<OrderId>>, order_id: OrderId) {
    in_flight
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&order_id);
}

#[async_trait]
impl<B, L, G> MessageHandler for PaymentConsumer<B, L, G>
where
    B: EventBus,
    L: PaymentLedger + 'static,
    G: PaymentGateway,
{
    type Error = SagaError;

    fn name(&self) -> &'static str {
        "payments"
    }

    async fn handle(&self, delivery: &Delivery) -> Result<Ack> {
        let order = match SagaEvent::decode(delivery.record())? {
            SagaEvent::OrderCreated(order) => order,
            other => return Err(other.unexpected(self.name()).into()),
        };

        if !claim(&self.in_flight, order.id) {
            tracing::info!(order_id = %order.id, "capture already running for order, skipping duplicate");
            return Ok(Ack::Commit);
        }

        let service = self.service.clone();
        let in_flight = self.in_flight.clone();
        let original = delivery.record().clone();
        let token = delivery.commit_token();
        tokio::spawn(async move {
            let outcome = service.create_payment(&order, &original).await;
            release(&in_flight, order.id);
            if !matches!(outcome, PaymentOutcome::Unannounced { .. }) {
                token.commit();
            }
        });

        Ok(Ack::Deferred)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use domain::{CreateOrder, topics};
    use event_bus::InMemoryEventBus;
    use ledger::InMemoryLedger;

    use super::*;
    use crate::gateway::ScriptedGateway;
    use crate::testing::FlakyBus;

    type TestService = PaymentService<InMemoryEventBus, InMemoryLedger, ScriptedGateway>;

    fn setup(gateway: ScriptedGateway) -> (TestService, InMemoryEventBus, InMemoryLedger) {
        let bus = InMemoryEventBus::new(3);
        let ledger = InMemoryLedger::new();
        let service = PaymentService::new(
            bus.clone(),
            ledger.clone(),
            gateway,
            RetryPolicy::new(3, Duration::from_millis(1000)),
        );
        (service, bus, ledger)
    }

    async fn created(bus: &InMemoryEventBus) -> (Order, Record) {
        let order = CreateOrder::new("100.00", "pending", "user1")
            .validate()
            .unwrap()
            .into_order(Utc::now());
        let record = bus
            .publish(SagaEvent::OrderCreated(order.clone()).to_message().unwrap())
            .await
            .unwrap();
        (order, record)
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_success() {
        let (service, bus, ledger) = setup(ScriptedGateway::new());
        let (order, record) = created(&bus).await;

        let outcome = service.create_payment(&order, &record).await;

        let PaymentOutcome::Captured { payment, attempts } = outcome.clone() else {
            panic!("expected capture, got {outcome:?}");
        };
        assert_eq!(attempts, 1);
        assert_eq!(payment.amount, order.total_amount);
        assert_eq!(ledger.payment_count().await, 1);
        assert_eq!(bus.published_on(topics::PAYMENT_CREATED).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_declines() {
        let gateway = ScriptedGateway::new();
        gateway.decline_times(2);
        let (service, bus, _) = setup(gateway.clone());
        let (order, record) = created(&bus).await;

        let outcome = service.create_payment(&order, &record).await;

        assert!(matches!(outcome, PaymentOutcome::Captured { attempts: 3, .. }));
        assert_eq!(gateway.attempts(), 3);
        assert!(bus.published_on(topics::PAYMENT_FAILED).is_empty());
        assert!(bus.published_on(topics::BILLING_DLQ).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_publishes_failure_then_dead_letter() {
        let gateway = ScriptedGateway::always_declining();
        let (service, bus, ledger) = setup(gateway.clone());
        let (order, record) = created(&bus).await;

        let outcome = service.create_payment(&order, &record).await;

        assert!(matches!(outcome, PaymentOutcome::Exhausted { attempts: 4, .. }));
        assert_eq!(gateway.attempts(), 4);
        assert_eq!(ledger.payment_count().await, 0);

        let topics_seen: Vec<_> = bus
            .published()
            .into_iter()
            .map(|r| r.topic)
            .filter(|t| t != topics::ORDER_CREATED)
            .collect();
        assert_eq!(topics_seen, vec![topics::PAYMENT_FAILED, topics::BILLING_DLQ]);

        let dlq = &bus.published_on(topics::BILLING_DLQ)[0];
        assert_eq!(dlq.key, record.key);
        assert_eq!(dlq.value["retryCount"], 3);
        assert_eq!(dlq.value["error"]["kind"], "CaptureDeclined");
        assert_eq!(dlq.value["originalMessage"]["offset"], record.offset);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_between_attempts() {
        let gateway = ScriptedGateway::always_declining();
        let (service, bus, _) = setup(gateway);
        let (order, record) = created(&bus).await;

        let started = tokio::time::Instant::now();
        service.create_payment(&order, &record).await;

        assert_eq!(started.elapsed(), Duration::from_millis(1000 + 2000 + 4000));
    }

    #[tokio::test(start_paused = true)]
    async fn already_paid_order_is_not_captured_again() {
        let gateway = ScriptedGateway::new();
        let (service, bus, ledger) = setup(gateway.clone());
        let (order, record) = created(&bus).await;
        let existing = ledger
            .upsert_payment(&Payment::paid_for(&order, Utc::now()))
            .await
            .unwrap();

        let outcome = service.create_payment(&order, &record).await;

        assert_eq!(outcome, PaymentOutcome::AlreadyPaid(existing.clone()));
        assert_eq!(gateway.attempts(), 0);
        let republished = bus.published_on(topics::PAYMENT_CREATED);
        assert_eq!(republished.len(), 1);
        assert_eq!(republished[0].value["id"], existing.id.to_string());
    }

    fn flaky_setup(
        gateway: ScriptedGateway,
        failures: usize,
    ) -> (
        PaymentService<FlakyBus, InMemoryLedger, ScriptedGateway>,
        InMemoryEventBus,
        InMemoryLedger,
        FlakyBus,
    ) {
        let bus = InMemoryEventBus::new(3);
        let flaky = FlakyBus::failing(bus.clone(), topics::PAYMENT_CREATED, failures);
        let ledger = InMemoryLedger::new();
        let service = PaymentService::new(
            flaky.clone(),
            ledger.clone(),
            gateway,
            RetryPolicy::new(3, Duration::from_millis(1000)),
        );
        (service, bus, ledger, flaky)
    }

    fn assert_not_escalated(bus: &InMemoryEventBus) {
        assert!(bus.published_on(topics::PAYMENT_FAILED).is_empty());
        assert!(bus.published_on(topics::BILLING_DLQ).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_announcement_is_retried_without_recapture() {
        let gateway = ScriptedGateway::new();
        let (service, bus, ledger, _) = flaky_setup(gateway.clone(), 2);
        let (order, record) = created(&bus).await;

        let outcome = service.create_payment(&order, &record).await;

        let PaymentOutcome::Captured { payment, attempts } = outcome.clone() else {
            panic!("expected capture, got {outcome:?}");
        };
        assert_eq!(attempts, 3);
        assert_eq!(gateway.attempts(), 1);
        assert_eq!(ledger.payment_count().await, 1);
        let announced = bus.published_on(topics::PAYMENT_CREATED);
        assert_eq!(announced.len(), 1);
        assert_eq!(announced[0].value["id"], payment.id.to_string());
        assert_not_escalated(&bus);
    }

    #[tokio::test(start_paused = true)]
    async fn paid_order_is_never_escalated_when_announcing_keeps_failing() {
        let gateway = ScriptedGateway::new();
        let (service, bus, ledger, flaky) = flaky_setup(gateway.clone(), 4);
        let (order, record) = created(&bus).await;

        let outcome = service.create_payment(&order, &record).await;

        let PaymentOutcome::Unannounced { payment, attempts, .. } = outcome.clone() else {
            panic!("expected an unannounced payment, got {outcome:?}");
        };
        assert_eq!(attempts, 4);
        assert_eq!(gateway.attempts(), 1);
        assert_eq!(ledger.payment_count().await, 1);
        assert!(bus.published_on(topics::PAYMENT_CREATED).is_empty());
        assert_not_escalated(&bus);

        // Redelivery once the bus is healthy announces the stored payment.
        assert_eq!(flaky.remaining_failures(), 0);
        let replayed = service.create_payment(&order, &record).await;

        assert_eq!(replayed, PaymentOutcome::AlreadyPaid(payment.clone()));
        assert_eq!(gateway.attempts(), 1);
        let announced = bus.published_on(topics::PAYMENT_CREATED);
        assert_eq!(announced.len(), 1);
        assert_eq!(announced[0].value["id"], payment.id.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn ledger_failure_after_capture_is_retried_without_recapture() {
        let gateway = ScriptedGateway::new();
        let (service, bus, ledger) = setup(gateway.clone());
        let (order, record) = created(&bus).await;
        ledger.set_fail_writes(true);

        let outcome = service.create_payment(&order, &record).await;

        assert!(matches!(outcome, PaymentOutcome::Unannounced { attempts: 4, .. }));
        assert_eq!(gateway.attempts(), 1);
        assert!(bus.published_on(topics::PAYMENT_CREATED).is_empty());
        assert_not_escalated(&bus);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_delivery_during_backoff_starts_no_second_chain() {
        let gateway = ScriptedGateway::new();
        gateway.decline_times(1);
        let (service, bus, ledger) = setup(gateway.clone());
        let consumer = PaymentConsumer::new(Arc::new(service));
        let mut sub = bus.subscribe(topics::ORDER_CREATED, "billing").await.unwrap();

        let (order, record) = created(&bus).await;
        bus.publish(SagaEvent::OrderCreated(order.clone()).to_message().unwrap())
            .await
            .unwrap();
        let first = sub.next_delivery().await.unwrap();
        let duplicate = sub.next_delivery().await.unwrap();

        assert_eq!(consumer.handle(&first).await.unwrap(), Ack::Deferred);
        assert_eq!(consumer.handle(&duplicate).await.unwrap(), Ack::Commit);
        duplicate.commit();

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(gateway.attempts(), 2);
        assert_eq!(ledger.payment_count().await, 1);
        assert_eq!(bus.published_on(topics::PAYMENT_CREATED).len(), 1);
        assert!(first.is_committed());
        assert_eq!(
            bus.committed_offset(topics::ORDER_CREATED, "billing", record.partition),
            Some(2)
        );

        // Once the chain is over, a later redelivery is handled again.
        let late = bus
            .publish(SagaEvent::OrderCreated(order.clone()).to_message().unwrap())
            .await
            .unwrap();
        let redelivered = sub.next_delivery().await.unwrap();
        assert_eq!(redelivered.record().offset, late.offset);
        assert_eq!(consumer.handle(&redelivered).await.unwrap(), Ack::Deferred);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(gateway.attempts(), 2);
        assert_eq!(bus.published_on(topics::PAYMENT_CREATED).len(), 2);
    }

    #[tokio::test]
    async fn find_by_id_missing_is_not_found() {
        let (service, _, _) = setup(ScriptedGateway::new());
        let id = PaymentId::new();
        assert!(matches!(
            service.find_by_id(id).await,
            Err(SagaError::PaymentNotFound(missing)) if missing == id
        ));
    }
}
