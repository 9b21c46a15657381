use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{DeadLetterId, OrderId, PaymentId, UserId};
use domain::{Amount, DeadLetterRecord, Order, OrderStatus, Payment, PaymentStatus};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    LedgerError, Result,
    store::{DeadLetterStore, OrderLedger, PaymentLedger, StoredDeadLetter},
};

const ONE_PAID_PER_ORDER: &str = "payments_one_paid_per_order";

/// PostgreSQL-backed ledger implementation.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Creates a new PostgreSQL ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and returns a ledger over a fresh pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let id = OrderId::from_uuid(row.try_get::<Uuid, _>("id")?);
        let corrupt = |reason: String| LedgerError::Corrupt {
            table: "orders",
            id: id.to_string(),
            reason,
        };

        Ok(Order {
            id,
            total_amount: Amount::parse(row.try_get::<String, _>("total_amount")?)
                .map_err(|e| corrupt(e.to_string()))?,
            status: row
                .try_get::<String, _>("status")?
                .parse::<OrderStatus>()
                .map_err(|e| corrupt(e.to_string()))?,
            user_id: UserId::new(row.try_get::<String, _>("user_id")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let id = PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?);
        let corrupt = |reason: String| LedgerError::Corrupt {
            table: "payments",
            id: id.to_string(),
            reason,
        };

        let status = match row.try_get::<String, _>("status")?.as_str() {
            "PAID" => PaymentStatus::Paid,
            "FAILED" => PaymentStatus::Failed,
            other => return Err(corrupt(format!("unknown payment status {other:?}"))),
        };

        Ok(Payment {
            id,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            amount: Amount::parse(row.try_get::<String, _>("amount")?)
                .map_err(|e| corrupt(e.to_string()))?,
            status,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get::<Option<DateTime<Utc>>, _>("updated_at")?,
        })
    }
}

#[async_trait]
impl OrderLedger for PostgresLedger {
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, total_amount, status, user_id, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    #[tracing::instrument(skip(self, order), fields(order_id = %order.id, status = %order.status))]
    async fn upsert_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, total_amount, status, user_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                total_amount = EXCLUDED.total_amount,
                status = EXCLUDED.status,
                user_id = EXCLUDED.user_id,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.total_amount.as_str())
        .bind(order.status.as_str())
        .bind(order.user_id.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn remove_order(&self, id: OrderId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, total_amount, status, user_id, created_at, updated_at
            FROM orders
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }
}

#[async_trait]
impl PaymentLedger for PostgresLedger {
    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, order_id, amount, status, created_at, updated_at
            FROM payments
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn find_paid_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, order_id, amount, status, created_at, updated_at
            FROM payments
            WHERE order_id = $1 AND status = 'PAID'
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }

    #[tracing::instrument(skip(self, payment), fields(payment_id = %payment.id, order_id = %payment.order_id))]
    async fn upsert_payment(&self, payment: &Payment) -> Result<Payment> {
        let result = sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, amount, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                amount = EXCLUDED.amount,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(payment.amount.as_str())
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(payment.clone()),
            Err(sqlx::Error::Database(ref db_err))
                if db_err.constraint() == Some(ONE_PAID_PER_ORDER) =>
            {
                tracing::debug!("order already has a PAID payment, keeping the stored one");
                self.find_paid_for_order(payment.order_id)
                    .await?
                    .ok_or_else(|| LedgerError::Corrupt {
                        table: "payments",
                        id: payment.id.to_string(),
                        reason: "unique PAID conflict without a PAID row".to_string(),
                    })
            }
            Err(e) => Err(LedgerError::Database(e)),
        }
    }

    async fn list_payments(&self) -> Result<Vec<Payment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, amount, status, created_at, updated_at
            FROM payments
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_payment).collect()
    }
}

#[async_trait]
impl DeadLetterStore for PostgresLedger {
    #[tracing::instrument(skip(self, record), fields(key = ?record.original_key()))]
    async fn append_dead_letter(&self, record: &DeadLetterRecord) -> Result<DeadLetterId> {
        let id = DeadLetterId::new();
        let body = serde_json::to_value(record)?;

        sqlx::query(
            r#"
            INSERT INTO dead_letters (id, order_key, record)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(id.as_uuid())
        .bind(record.original_key())
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn list_dead_letters(&self) -> Result<Vec<StoredDeadLetter>> {
        let rows = sqlx::query(
            r#"
            SELECT id, record, recorded_at
            FROM dead_letters
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let body: serde_json::Value = row.try_get("record")?;
                Ok(StoredDeadLetter {
                    id: DeadLetterId::from_uuid(row.try_get::<Uuid, _>("id")?),
                    record: serde_json::from_value(body)?,
                    recorded_at: row.try_get("recorded_at")?,
                })
            })
            .collect()
    }
}
