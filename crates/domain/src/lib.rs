//! Domain layer for the order saga.
//!
//! This crate provides the data exchanged between services:
//! - Order and Payment records with their status rules
//! - the validated `CreateOrder` request
//! - dead-letter records wrapping a failed bus record
//! - `SagaEvent`, the typed union of every payload carried on a saga topic

pub mod dead_letter;
pub mod error;
pub mod events;
pub mod order;
pub mod payment;
pub mod topics;
pub mod user;
pub mod value_objects;

pub use dead_letter::{DeadLetterRecord, FailureDetail};
pub use error::{DecodeError, ValidationError};
pub use events::{OrderCancelled, PaymentFailed, SagaEvent};
pub use order::{CreateOrder, NewOrder, Order, OrderStatus};
pub use payment::{Payment, PaymentStatus};
pub use user::User;
pub use value_objects::Amount;
