//! Saga error types.

use common::{OrderId, PaymentId, UserId};
use domain::{DecodeError, ValidationError};
use event_bus::BusError;
use ledger::LedgerError;
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The creation request was rejected before anything was persisted.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The user directory has no such user, or did not answer in time.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Payment not found.
    #[error("Payment not found: {0}")]
    PaymentNotFound(PaymentId),

    /// A consumed record could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Event bus error.
    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    /// Ledger error.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns true for errors caused by the caller's input.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SagaError::Validation(_)
                | SagaError::UserNotFound(_)
                | SagaError::OrderNotFound(_)
                | SagaError::PaymentNotFound(_)
        )
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
