//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p ledger --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{OrderId, PaymentId, UserId};
use domain::{
    Amount, DeadLetterRecord, FailureDetail, Order, OrderStatus, Payment, PaymentStatus,
};
use event_bus::{Headers, Record};
use ledger::{DeadLetterStore, LedgerError, OrderLedger, PaymentLedger, PostgresLedger};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_saga_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh ledger with its own pool and cleared tables
async fn get_test_ledger() -> PostgresLedger {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE orders, payments, dead_letters")
        .execute(&pool)
        .await
        .unwrap();

    PostgresLedger::new(pool)
}

/// Postgres keeps microseconds; trim so round-tripped records compare equal.
fn now() -> chrono::DateTime<Utc> {
    let now = Utc::now();
    now - Duration::nanoseconds(i64::from(now.timestamp_subsec_nanos() % 1_000))
}

fn create_test_order(amount: &str) -> Order {
    let at = now();
    Order {
        id: OrderId::new(),
        total_amount: Amount::parse(amount).unwrap(),
        status: OrderStatus::Pending,
        user_id: UserId::new("user1"),
        created_at: at,
        updated_at: at,
    }
}

fn create_test_payment(order: &Order) -> Payment {
    Payment::paid_for(order, now())
}

#[tokio::test]
#[serial]
async fn upsert_and_get_order() {
    let ledger = get_test_ledger().await;
    let order = create_test_order("100.00");

    ledger.upsert_order(&order).await.unwrap();

    let stored = ledger.get_order(order.id).await.unwrap();
    assert_eq!(stored, Some(order));
}

#[tokio::test]
#[serial]
async fn get_missing_order_returns_none() {
    let ledger = get_test_ledger().await;
    assert_eq!(ledger.get_order(OrderId::new()).await.unwrap(), None);
}

#[tokio::test]
#[serial]
async fn upsert_overwrites_status() {
    let ledger = get_test_ledger().await;
    let mut order = create_test_order("5.00");
    ledger.upsert_order(&order).await.unwrap();

    assert!(order.cancel(now()));
    ledger.upsert_order(&order).await.unwrap();

    let stored = ledger.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Cancelled);
    assert_eq!(ledger.list_orders().await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn remove_order_deletes_row() {
    let ledger = get_test_ledger().await;
    let order = create_test_order("7.50");
    ledger.upsert_order(&order).await.unwrap();

    assert!(ledger.remove_order(order.id).await.unwrap());
    assert!(!ledger.remove_order(order.id).await.unwrap());
    assert_eq!(ledger.get_order(order.id).await.unwrap(), None);
}

#[tokio::test]
#[serial]
async fn list_orders_oldest_first() {
    let ledger = get_test_ledger().await;
    let mut older = create_test_order("1.00");
    older.created_at = older.created_at - Duration::seconds(60);
    let newer = create_test_order("2.00");

    ledger.upsert_order(&newer).await.unwrap();
    ledger.upsert_order(&older).await.unwrap();

    let ids: Vec<_> = ledger
        .list_orders()
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.id)
        .collect();
    assert_eq!(ids, vec![older.id, newer.id]);
}

#[tokio::test]
#[serial]
async fn payment_round_trip() {
    let ledger = get_test_ledger().await;
    let order = create_test_order("42.00");
    let payment = create_test_payment(&order);

    let stored = ledger.upsert_payment(&payment).await.unwrap();
    assert_eq!(stored, payment);

    assert_eq!(ledger.get_payment(payment.id).await.unwrap(), Some(payment.clone()));
    assert_eq!(
        ledger.find_paid_for_order(order.id).await.unwrap(),
        Some(payment)
    );
    assert_eq!(ledger.get_payment(PaymentId::new()).await.unwrap(), None);
}

#[tokio::test]
#[serial]
async fn second_paid_payment_returns_existing() {
    let ledger = get_test_ledger().await;
    let order = create_test_order("42.00");
    let first = create_test_payment(&order);
    let second = create_test_payment(&order);

    ledger.upsert_payment(&first).await.unwrap();
    let stored = ledger.upsert_payment(&second).await.unwrap();

    assert_eq!(stored.id, first.id);
    assert_eq!(ledger.list_payments().await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn failed_payments_do_not_block_a_paid_one() {
    let ledger = get_test_ledger().await;
    let order = create_test_order("42.00");
    let mut failed = create_test_payment(&order);
    failed.status = PaymentStatus::Failed;
    let paid = create_test_payment(&order);

    ledger.upsert_payment(&failed).await.unwrap();
    ledger.upsert_payment(&paid).await.unwrap();

    assert_eq!(ledger.list_payments().await.unwrap().len(), 2);
    assert_eq!(
        ledger.find_paid_for_order(order.id).await.unwrap().map(|p| p.id),
        Some(paid.id)
    );
}

#[tokio::test]
#[serial]
async fn dead_letters_are_appended_in_order() {
    let ledger = get_test_ledger().await;

    let mut ids = Vec::new();
    for i in 0..3u64 {
        let order = create_test_order("9.99");
        let record = DeadLetterRecord {
            original_message: Record {
                topic: "order.created".to_string(),
                partition: 0,
                offset: i,
                key: Some(order.id.to_string()),
                value: serde_json::to_value(&order).unwrap(),
                headers: Headers::new(),
                timestamp: now(),
            },
            error: FailureDetail {
                message: "card declined".to_string(),
                kind: "CaptureDeclined".to_string(),
                detail: Some("gateway returned 402".to_string()),
            },
            failed_at: now(),
            retry_count: 3,
        };
        ids.push(ledger.append_dead_letter(&record).await.unwrap());
    }

    let stored = ledger.list_dead_letters().await.unwrap();
    assert_eq!(stored.iter().map(|d| d.id).collect::<Vec<_>>(), ids);
    assert_eq!(stored[2].record.original_message.offset, 2);
    assert!(stored[0].record.original_order().is_some());
}

#[tokio::test]
#[serial]
async fn corrupt_rows_are_reported() {
    let ledger = get_test_ledger().await;
    let id = uuid::Uuid::new_v4();

    sqlx::query(
        "INSERT INTO orders (id, total_amount, status, user_id, created_at, updated_at) \
         VALUES ($1, 'lots', 'PENDING', 'user1', NOW(), NOW())",
    )
    .bind(id)
    .execute(ledger.pool())
    .await
    .unwrap();

    let result = ledger.get_order(OrderId::from_uuid(id)).await;
    assert!(matches!(result, Err(LedgerError::Corrupt { table: "orders", .. })));
}
