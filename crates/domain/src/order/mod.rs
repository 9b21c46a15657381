//! Orders and their lifecycle.

mod commands;
mod model;
mod status;

pub use commands::{CreateOrder, NewOrder};
pub use model::Order;
pub use status::OrderStatus;
