//! The order record.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use super::OrderStatus;
use crate::value_objects::Amount;

/// An order as owned by the order ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub total_amount: Amount,
    pub status: OrderStatus,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Returns true if the order has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.status == OrderStatus::Cancelled
    }

    /// Moves the order to CANCELLED.
    ///
    /// Returns false, leaving the order untouched, if it was already
    /// cancelled.
    pub fn cancel(&mut self, at: DateTime<Utc>) -> bool {
        if !self.status.can_cancel() {
            return false;
        }
        self.status = OrderStatus::Cancelled;
        self.updated_at = at;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Order {
        let now = Utc::now();
        Order {
            id: OrderId::new(),
            total_amount: Amount::parse("100.00").unwrap(),
            status: OrderStatus::Pending,
            user_id: UserId::new("user1"),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn cancel_transitions_once() {
        let mut order = order();
        let first = Utc::now() + chrono::Duration::seconds(1);
        let second = first + chrono::Duration::seconds(1);

        assert!(order.cancel(first));
        assert!(order.is_cancelled());
        assert_eq!(order.updated_at, first);

        assert!(!order.cancel(second));
        assert_eq!(order.updated_at, first);
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let json = serde_json::to_value(order()).unwrap();
        assert_eq!(json["totalAmount"], "100.00");
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["userId"], "user1");
        assert!(json.get("createdAt").is_some());
    }
}
