//! Topic names shared by every service.

/// Published by the order service after an order is persisted.
pub const ORDER_CREATED: &str = "order.created";

/// Published by the payment service after a successful capture.
pub const PAYMENT_CREATED: &str = "payment.created";

/// Published by the payment service when retries are exhausted.
pub const PAYMENT_FAILED: &str = "payment.failed";

/// Published by the order service after a compensating cancellation.
pub const ORDER_CANCELLED: &str = "order.cancelled";

/// Dead-letter topic for order.created records the payment service gave up on.
pub const BILLING_DLQ: &str = "billing.dlq";

/// Request topic of the user directory lookup.
pub const USER_GET_USER: &str = "user.getUser";

/// Every topic carrying a [`crate::SagaEvent`].
pub const SAGA_TOPICS: [&str; 5] = [
    ORDER_CREATED,
    PAYMENT_CREATED,
    PAYMENT_FAILED,
    ORDER_CANCELLED,
    BILLING_DLQ,
];
