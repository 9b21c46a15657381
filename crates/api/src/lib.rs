//! HTTP API server and process bootstrap for the order saga.
//!
//! Exposes order creation and read endpoints over the saga services, plus
//! health and Prometheus metrics, with structured logging (tracing).

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use event_bus::InMemoryEventBus;
use ledger::{DeadLetterStore, OrderLedger, PaymentLedger};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    BusUserDirectory, LoggingAlerter, LoggingNotifier, OrderService, PaymentGateway,
    PaymentService, SagaRuntime,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Consumer group the order service uses for `user.getUser` replies.
pub const USER_REPLY_GROUP: &str = "orders-user-replies";

/// Storage that backs orders, payments and dead letters at once.
pub trait SagaLedger: OrderLedger + PaymentLedger + DeadLetterStore + Clone + 'static {}

impl<T> SagaLedger for T where T: OrderLedger + PaymentLedger + DeadLetterStore + Clone + 'static {}

/// Order service as wired in the server.
pub type Orders<L> = OrderService<InMemoryEventBus, L, BusUserDirectory<InMemoryEventBus>>;

/// Payment service as wired in the server.
pub type Payments<L, G> = PaymentService<InMemoryEventBus, L, G>;

/// Shared application state accessible from all handlers.
pub struct AppState<L: SagaLedger, G: PaymentGateway> {
    pub orders: Arc<Orders<L>>,
    pub payments: Arc<Payments<L, G>>,
}

/// Registers descriptions for the metrics the saga services emit.
///
/// Call once, after the recorder is installed.
pub fn describe_metrics() {
    use metrics::{describe_counter, describe_histogram};

    describe_counter!("orders_created_total", "Orders persisted and announced");
    describe_counter!("orders_cancelled_total", "Orders moved to CANCELLED by compensation");
    describe_counter!("payment_attempts_total", "Payment capture attempts");
    describe_counter!("payment_retries_total", "Capture attempts that were retries");
    describe_counter!("payments_captured_total", "Captures approved by the gateway");
    describe_counter!("payments_failed_total", "Orders whose capture retries ran out");
    describe_counter!(
        "payments_unannounced_total",
        "Paid orders whose payment.created publish retries ran out"
    );
    describe_counter!("dead_letters_recorded_total", "Dead letters written to the audit store");
    describe_counter!("notifications_sent_total", "Notifications delivered");
    describe_counter!("notifications_failed_total", "Notifications that could not be delivered");
    describe_counter!("bus_messages_published_total", "Records appended to the bus");
    describe_counter!("bus_messages_committed_total", "Records committed by consumer groups");
    describe_counter!("consumer_handler_errors_total", "Records a consumer failed to handle");
    describe_histogram!(
        "payment_chain_duration_seconds",
        metrics::Unit::Seconds,
        "Time from first capture attempt to the final outcome"
    );
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<L: SagaLedger, G: PaymentGateway>(
    state: Arc<AppState<L, G>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/orders",
            get(routes::orders::list::<L, G>).post(routes::orders::create::<L, G>),
        )
        .route("/orders/{id}", get(routes::orders::get::<L, G>))
        .route("/payments", get(routes::payments::list::<L, G>))
        .route("/payments/{id}", get(routes::payments::get::<L, G>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Builds the services over `ledger` and starts every saga consumer.
///
/// The `user.getUser` responder is not started here; it belongs to the
/// user directory, which runs on its own.
pub async fn create_default_state<L: SagaLedger, G: PaymentGateway>(
    bus: &InMemoryEventBus,
    ledger: L,
    gateway: G,
    config: &Config,
) -> saga::Result<(Arc<AppState<L, G>>, SagaRuntime)> {
    let users = BusUserDirectory::connect(
        bus.clone(),
        USER_REPLY_GROUP,
        config.bus.request_timeout,
    )
    .await?;

    let orders = Arc::new(OrderService::new(bus.clone(), ledger.clone(), users));
    let payments = Arc::new(PaymentService::new(
        bus.clone(),
        ledger.clone(),
        gateway,
        config.retry,
    ));

    let runtime = SagaRuntime::start(
        bus,
        orders.clone(),
        payments.clone(),
        ledger,
        LoggingAlerter,
        LoggingNotifier,
    )
    .await?;

    Ok((Arc::new(AppState { orders, payments }), runtime))
}
