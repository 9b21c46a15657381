//! Identifier types shared by every service in the order saga.

mod types;

pub use types::{DeadLetterId, OrderId, PaymentId, UserId};
