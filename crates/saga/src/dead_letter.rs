//! Dead-letter recorder: audit copy plus an operational alert.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::DeadLetterId;
use domain::{DeadLetterRecord, SagaEvent};
use event_bus::{Ack, Delivery, MessageHandler};
use ledger::DeadLetterStore;

use crate::error::{Result, SagaError};

/// What operators are told about a dead-lettered record.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterAlert {
    /// Audit id, when the record was stored.
    pub audit_id: Option<DeadLetterId>,
    pub topic: String,
    pub key: Option<String>,
    pub error: String,
    pub retry_count: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterAlert {
    fn new(record: &DeadLetterRecord, audit_id: Option<DeadLetterId>) -> Self {
        Self {
            audit_id,
            topic: record.original_message.topic.clone(),
            key: record.original_message.key.clone(),
            error: record.error.message.clone(),
            retry_count: record.retry_count,
            failed_at: record.failed_at,
        }
    }
}

/// Raises operational alerts (pager, chat, monitoring).
#[async_trait]
pub trait Alerter: Send + Sync + 'static {
    async fn raise(&self, alert: &DeadLetterAlert);
}

/// Alerter that logs at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAlerter;

#[async_trait]
impl Alerter for LoggingAlerter {
    async fn raise(&self, alert: &DeadLetterAlert) {
        tracing::error!(
            audit_id = ?alert.audit_id,
            topic = %alert.topic,
            key = ?alert.key,
            error = %alert.error,
            retry_count = alert.retry_count,
            "dead letter alert"
        );
    }
}

/// Alerter that keeps alerts in memory, for tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingAlerter {
    alerts: Arc<Mutex<Vec<DeadLetterAlert>>>,
}

impl RecordingAlerter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every alert raised so far.
    pub fn alerts(&self) -> Vec<DeadLetterAlert> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Alerter for RecordingAlerter {
    async fn raise(&self, alert: &DeadLetterAlert) {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(alert.clone());
    }
}

/// Persists every `billing.dlq` record and raises an alert for it.
///
/// Never publishes and never touches order or payment state. A failed write
/// is logged and the record is not retried; the bus still holds it.
pub struct DeadLetterRecorder<S: DeadLetterStore, A: Alerter> {
    store: S,
    alerter: A,
}

impl<S: DeadLetterStore, A: Alerter> DeadLetterRecorder<S, A> {
    /// Creates a recorder writing to `store`.
    pub fn new(store: S, alerter: A) -> Self {
        Self { store, alerter }
    }

    /// Stores the record and raises its alert.
    ///
    /// The alert is raised even when the write fails.
    #[tracing::instrument(skip(self, record), fields(key = ?record.original_key()))]
    pub async fn record(&self, record: &DeadLetterRecord) -> Result<DeadLetterId> {
        let stored = self.store.append_dead_letter(record).await;

        let audit_id = stored.as_ref().ok().copied();
        self.alerter
            .raise(&DeadLetterAlert::new(record, audit_id))
            .await;

        let id = stored?;
        metrics::counter!("dead_letters_recorded_total").increment(1);
        tracing::info!(%id, "dead letter recorded");
        Ok(id)
    }
}

#[async_trait]
impl<S, A> MessageHandler for DeadLetterRecorder<S, A>
where
    S: DeadLetterStore + 'static,
    A: Alerter,
{
    type Error = SagaError;

    fn name(&self) -> &'static str {
        "dead-letters"
    }

    async fn handle(&self, delivery: &Delivery) -> Result<Ack> {
        match SagaEvent::decode(delivery.record())? {
            SagaEvent::DeadLettered(record) => {
                self.record(&record).await?;
                Ok(Ack::Commit)
            }
            other => Err(other.unexpected(self.name()).into()),
        }
    }
}
