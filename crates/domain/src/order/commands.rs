//! Order creation request.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use super::{Order, OrderStatus};
use crate::error::ValidationError;
use crate::value_objects::Amount;

/// Request to create an order, as received from callers.
///
/// Fields stay raw strings until [`CreateOrder::validate`] runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrder {
    pub total_amount: String,
    pub status: String,
    pub user_id: String,
}

impl CreateOrder {
    /// Creates a new CreateOrder request.
    pub fn new(
        total_amount: impl Into<String>,
        status: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            total_amount: total_amount.into(),
            status: status.into(),
            user_id: user_id.into(),
        }
    }

    /// Checks every field, returning the first problem found.
    pub fn validate(&self) -> Result<NewOrder, ValidationError> {
        if self.total_amount.trim().is_empty() {
            return Err(ValidationError::Empty {
                field: "totalAmount",
            });
        }
        if self.status.trim().is_empty() {
            return Err(ValidationError::Empty { field: "status" });
        }
        let user_id = UserId::new(self.user_id.trim());
        if user_id.is_blank() {
            return Err(ValidationError::Empty { field: "userId" });
        }

        Ok(NewOrder {
            total_amount: Amount::parse(self.total_amount.as_str())?,
            status: self.status.parse()?,
            user_id,
        })
    }
}

/// A validated creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub total_amount: Amount,
    pub status: OrderStatus,
    pub user_id: UserId,
}

impl NewOrder {
    /// Allocates the order record with a fresh id.
    pub fn into_order(self, now: DateTime<Utc>) -> Order {
        Order {
            id: OrderId::new(),
            total_amount: self.total_amount,
            status: self.status,
            user_id: self.user_id,
            created_at: now,
            updated_at: now,
        }
    }
}
