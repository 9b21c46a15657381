//! Payment records.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId};
use serde::{Deserialize, Serialize};

use crate::order::Order;
use crate::value_objects::Amount;

/// Outcome recorded on a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Paid,
    Failed,
}

impl PaymentStatus {
    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A payment captured against exactly one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub amount: Amount,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Records a successful capture of the full order amount.
    pub fn paid_for(order: &Order, at: DateTime<Utc>) -> Self {
        Self {
            id: PaymentId::new(),
            order_id: order.id,
            amount: order.total_amount.clone(),
            status: PaymentStatus::Paid,
            created_at: at,
            updated_at: None,
        }
    }

    /// Returns true if the payment was captured.
    pub fn is_paid(&self) -> bool {
        self.status == PaymentStatus::Paid
    }
}
