//! Choreographed order saga.
//!
//! There is no central coordinator: each service reacts to the topics it
//! cares about and publishes its own follow-up or compensating events.
//!
//! ```text
//! OrderService ── order.created ──▶ PaymentService ── payment.created ──▶ notifications
//!                        │                 │
//!                        ▼                 └─ payment.failed + billing.dlq
//!                  notifications                    │
//!                                                   ▼
//!                         CompensationCoordinator ── order.cancelled ──▶ notifications
//!                         DeadLetterRecorder (audit + alert)
//! ```
//!
//! Payment capture is retried with exponential backoff (3 retries, 1 s base)
//! on a task of its own; the `order.created` record is committed once the
//! chain resolves.

pub mod compensation;
pub mod dead_letter;
pub mod error;
pub mod gateway;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod retry;
pub mod runtime;
pub mod users;

#[cfg(test)]
pub(crate) mod testing;

pub use compensation::CompensationCoordinator;
pub use dead_letter::{Alerter, DeadLetterAlert, DeadLetterRecorder, LoggingAlerter, RecordingAlerter};
pub use error::{Result, SagaError};
pub use gateway::{
    ApprovingGateway, CaptureError, CaptureLimitGateway, CaptureReceipt, PaymentGateway,
    ScriptedGateway,
};
pub use notifications::{
    LoggingNotifier, NotificationKind, NotificationService, Notifier, NotifyError,
    RecordingNotifier,
};
pub use orders::OrderService;
pub use payments::{PaymentConsumer, PaymentOutcome, PaymentService};
pub use retry::RetryPolicy;
pub use runtime::{BILLING_GROUP, NOTIFICATIONS_GROUP, ORDERS_GROUP, SagaRuntime};
pub use users::{BusUserDirectory, InMemoryUserDirectory, UserDirectory, serve_user_directory};
