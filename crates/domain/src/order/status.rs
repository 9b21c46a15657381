//! Order status.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The status of an order in its lifecycle.
///
/// ```text
/// PENDING ──┬──► COMPLETED ──► SHIPPED ──► DELIVERED
///           │        │            │           │
///           └────────┴────────────┴───────────┴──► CANCELLED
/// ```
///
/// Only the transition to CANCELLED is driven by the saga; the others
/// belong to fulfillment flows outside it. CANCELLED is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum OrderStatus {
    /// Order accepted, payment outstanding.
    #[default]
    Pending,

    /// Payment settled.
    Completed,

    /// Order was cancelled (terminal state).
    Cancelled,

    /// Handed to the carrier.
    Shipped,

    /// Received by the customer.
    Delivered,
}

impl OrderStatus {
    /// Returns true if the order can still be cancelled.
    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled)
    }

    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = ValidationError;

    /// Parses a status name, ignoring case (`"pending"` and `"PENDING"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "SHIPPED" => Ok(OrderStatus::Shipped),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            _ => Err(ValidationError::UnknownStatus(s.to_string())),
        }
    }
}

impl TryFrom<String> for OrderStatus {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OrderStatus> for String {
    fn from(status: OrderStatus) -> Self {
        status.as_str().to_string()
    }
}
