//! Best-effort customer notifications.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use domain::SagaEvent;
use event_bus::{Ack, Delivery, MessageHandler};
use thiserror::Error;

use crate::error::{Result, SagaError};

/// Which notification to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    OrderPlaced,
    PaymentConfirmed,
    OrderCancelled,
}

impl NotificationKind {
    /// Returns the notification for a saga event, if it warrants one.
    pub fn for_event(event: &SagaEvent) -> Option<Self> {
        match event {
            SagaEvent::OrderCreated(_) => Some(NotificationKind::OrderPlaced),
            SagaEvent::PaymentCreated(_) => Some(NotificationKind::PaymentConfirmed),
            SagaEvent::OrderCancelled(_) => Some(NotificationKind::OrderCancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::OrderPlaced => "order_placed",
            NotificationKind::PaymentConfirmed => "payment_confirmed",
            NotificationKind::OrderCancelled => "order_cancelled",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery failure reported by a [`Notifier`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Delivers notifications (email, SMS, push).
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(
        &self,
        kind: NotificationKind,
        payload: &serde_json::Value,
    ) -> std::result::Result<(), NotifyError>;
}

/// Notifier that only writes a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(
        &self,
        kind: NotificationKind,
        payload: &serde_json::Value,
    ) -> std::result::Result<(), NotifyError> {
        tracing::info!(%kind, id = %payload.get("id").unwrap_or(&serde_json::Value::Null), "notification sent");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RecordingState {
    sent: Vec<(NotificationKind, serde_json::Value)>,
    fail_on_notify: bool,
}

/// Notifier that keeps every notification in memory, for tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingNotifier {
    /// Creates an empty recording notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the notifier to fail every delivery.
    pub fn set_fail_on_notify(&self, fail: bool) {
        self.lock().fail_on_notify = fail;
    }

    /// Returns the kinds delivered so far, in order.
    pub fn sent_kinds(&self) -> Vec<NotificationKind> {
        self.lock().sent.iter().map(|(kind, _)| *kind).collect()
    }

    /// Returns the number of delivered notifications.
    pub fn sent_count(&self) -> usize {
        self.lock().sent.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        kind: NotificationKind,
        payload: &serde_json::Value,
    ) -> std::result::Result<(), NotifyError> {
        let mut state = self.lock();
        if state.fail_on_notify {
            return Err(NotifyError(format!("{kind} delivery refused")));
        }
        state.sent.push((kind, payload.clone()));
        Ok(())
    }
}

/// Sends one notification per `order.created`, `payment.created` and
/// `order.cancelled` record.
///
/// Delivery failures are logged and swallowed; nothing is published back.
pub struct NotificationService<N: Notifier> {
    notifier: N,
}

impl<N: Notifier> NotificationService<N> {
    /// Creates a service delivering through `notifier`.
    pub fn new(notifier: N) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl<N: Notifier> MessageHandler for NotificationService<N> {
    type Error = SagaError;

    fn name(&self) -> &'static str {
        "notifications"
    }

    async fn handle(&self, delivery: &Delivery) -> Result<Ack> {
        let record = delivery.record();
        let event = SagaEvent::decode(record)?;
        let Some(kind) = NotificationKind::for_event(&event) else {
            return Err(event.unexpected(self.name()).into());
        };

        match self.notifier.notify(kind, &record.value).await {
            Ok(()) => {
                metrics::counter!("notifications_sent_total", "kind" => kind.as_str()).increment(1);
            }
            Err(e) => {
                metrics::counter!("notifications_failed_total", "kind" => kind.as_str())
                    .increment(1);
                tracing::warn!(error = %e, %kind, order_id = ?event.order_id(), "notification failed");
            }
        }
        Ok(Ack::Commit)
    }
}
