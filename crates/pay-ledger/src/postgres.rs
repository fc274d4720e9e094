//! # PostgreSQL Ledger
//!
//! `apply_callback` runs in one database transaction: the order row is
//! locked with `SELECT ... FOR UPDATE`, its transactions are read, the
//! settlement is planned and written, then the whole unit commits. The
//! partial unique index on `payment_transactions` backs the
//! one-success-per-trade rule if a second writer ever bypasses the lock.
//!
//! Tables carry a `payment_` prefix; the catalog application that owns the
//! `skills` table keeps its own `orders` and `transactions` in the same
//! database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pay_core::{
    log_plan, plan_settlement, CallbackResult, Currency, LedgerStore, Order, OrderItem, OrderNo,
    OrderStatus, Page, PageRequest, PaymentError, PaymentResult, PaymentType, Price,
    SettlementReport, Transaction, TransactionStatus,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};
use tracing::{error, info, instrument};
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, order_no, user_id, total_amount, currency, payment_method, \
                             status, created_at, paid_at";

const TRANSACTION_COLUMNS: &str = "id, order_id, payment_channel, external_transaction_id, \
                                   amount, currency, status, raw_response, created_at, updated_at";

fn storage(e: sqlx::Error) -> PaymentError {
    PaymentError::Storage(e.to_string())
}

/// Open a pool and apply the bundled migrations.
pub async fn connect(database_url: &str, max_connections: u32) -> PaymentResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(storage)?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| PaymentError::Storage(format!("migration failed: {}", e)))?;

    info!("Ledger database ready");
    Ok(pool)
}

/// Ledger backed by the `payment_orders`, `payment_order_items` and
/// `payment_transactions` tables
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
    /// Bump `skills.purchases_count` when an order is paid
    count_purchases: bool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            count_purchases: true,
        }
    }

    /// Builder: skip the purchase counter (no shared `skills` table)
    pub fn without_purchase_counter(mut self) -> Self {
        self.count_purchases = false;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_items<'e, E>(executor: E, order_id: Uuid) -> PaymentResult<Vec<OrderItem>>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let rows = sqlx::query(
            "SELECT id, order_id, skill_id, price, currency, quantity \
             FROM payment_order_items WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(executor)
        .await
        .map_err(storage)?;

        rows.iter().map(item_from_row).collect()
    }

    async fn with_items(&self, row: Option<PgRow>) -> PaymentResult<Option<Order>> {
        match row {
            Some(row) => {
                let mut order = order_from_row(&row)?;
                order.items = Self::load_items(&self.pool, order.id).await?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }
}

fn currency_column(row: &PgRow, column: &str) -> PaymentResult<Currency> {
    let raw: String = row.try_get(column).map_err(storage)?;
    raw.parse()
        .map_err(|e: PaymentError| PaymentError::Storage(e.to_string()))
}

/// `INTEGER` value for a line quantity
fn quantity_column(quantity: u32) -> PaymentResult<i32> {
    i32::try_from(quantity)
        .map_err(|_| PaymentError::InvalidRequest(format!("quantity {} too large", quantity)))
}

fn order_from_row(row: &PgRow) -> PaymentResult<Order> {
    let currency = currency_column(row, "currency")?;
    let payment_method: Option<String> = row.try_get("payment_method").map_err(storage)?;
    let status: String = row.try_get("status").map_err(storage)?;

    Ok(Order {
        id: row.try_get("id").map_err(storage)?,
        order_no: OrderNo::from(row.try_get::<String, _>("order_no").map_err(storage)?),
        user_id: row.try_get("user_id").map_err(storage)?,
        total_amount: Price::from_minor(row.try_get("total_amount").map_err(storage)?, currency),
        payment_method: payment_method
            .map(|m| m.parse::<PaymentType>())
            .transpose()
            .map_err(|e| PaymentError::Storage(e.to_string()))?,
        status: OrderStatus::parse(&status)?,
        created_at: row.try_get("created_at").map_err(storage)?,
        paid_at: row.try_get("paid_at").map_err(storage)?,
        items: Vec::new(),
    })
}

fn item_from_row(row: &PgRow) -> PaymentResult<OrderItem> {
    let quantity: i32 = row.try_get("quantity").map_err(storage)?;
    Ok(OrderItem {
        id: row.try_get("id").map_err(storage)?,
        order_id: row.try_get("order_id").map_err(storage)?,
        skill_id: row.try_get("skill_id").map_err(storage)?,
        price: Price::from_minor(
            row.try_get("price").map_err(storage)?,
            currency_column(row, "currency")?,
        ),
        quantity: u32::try_from(quantity)
            .map_err(|_| PaymentError::Storage(format!("negative quantity {}", quantity)))?,
    })
}

fn transaction_from_row(row: &PgRow) -> PaymentResult<Transaction> {
    let channel: String = row.try_get("payment_channel").map_err(storage)?;
    let status: String = row.try_get("status").map_err(storage)?;

    Ok(Transaction {
        id: row.try_get("id").map_err(storage)?,
        order_id: row.try_get("order_id").map_err(storage)?,
        payment_channel: channel
            .parse()
            .map_err(|e: PaymentError| PaymentError::Storage(e.to_string()))?,
        external_transaction_id: row.try_get("external_transaction_id").map_err(storage)?,
        amount: Price::from_minor(
            row.try_get("amount").map_err(storage)?,
            currency_column(row, "currency")?,
        ),
        status: TransactionStatus::parse(&status)?,
        raw_response: row.try_get("raw_response").map_err(storage)?,
        created_at: row.try_get("created_at").map_err(storage)?,
        updated_at: row.try_get("updated_at").map_err(storage)?,
    })
}

#[async_trait]
impl LedgerStore for PgLedger {
    #[instrument(skip(self, order), fields(order_no = %order.order_no))]
    async fn create_order(&self, order: &Order) -> PaymentResult<()> {
        if order.items_total()? != order.total_amount {
            return Err(PaymentError::InvalidAmount {
                message: "order total does not match its items".to_string(),
            });
        }

        let mut tx = self.pool.begin().await.map_err(storage)?;

        sqlx::query(
            r#"
            INSERT INTO payment_orders (id, order_no, user_id, total_amount, currency, payment_method, status, created_at, paid_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(order.id)
        .bind(order.order_no.as_str())
        .bind(order.user_id)
        .bind(order.total_amount.amount)
        .bind(order.total_amount.currency.as_str())
        .bind(order.payment_method.map(|m| m.as_str()))
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.paid_at)
        .execute(tx.as_mut())
        .await
        .map_err(storage)?;

        for item in &order.items {
            let quantity = quantity_column(item.quantity)?;
            sqlx::query(
                r#"
                INSERT INTO payment_order_items (id, order_id, skill_id, price, currency, quantity)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(item.id)
            .bind(item.order_id)
            .bind(item.skill_id)
            .bind(item.price.amount)
            .bind(item.price.currency.as_str())
            .bind(quantity)
            .execute(tx.as_mut())
            .await
            .map_err(storage)?;
        }

        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    async fn find_order(&self, order_id: Uuid) -> PaymentResult<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {} FROM payment_orders WHERE id = $1", ORDER_COLUMNS))
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        self.with_items(row).await
    }

    async fn find_order_for_user(
        &self,
        order_id: Uuid,
        user_id: Uuid,
    ) -> PaymentResult<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payment_orders WHERE id = $1 AND user_id = $2",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        self.with_items(row).await
    }

    async fn find_order_by_no(&self, order_no: &OrderNo) -> PaymentResult<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payment_orders WHERE order_no = $1",
            ORDER_COLUMNS
        ))
        .bind(order_no.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        self.with_items(row).await
    }

    async fn list_orders_for_user(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> PaymentResult<Page<Order>> {
        let page = page.normalized();

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payment_orders WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM payment_orders WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .bind(i64::from(page.page_size))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut list = Vec::with_capacity(rows.len());
        for row in rows {
            let mut order = order_from_row(&row)?;
            order.items = Self::load_items(&self.pool, order.id).await?;
            list.push(order);
        }

        Ok(Page {
            list,
            total: total.max(0) as u64,
            page: page.page,
            page_size: page.page_size,
        })
    }

    async fn has_paid_for_skill(&self, user_id: Uuid, skill_id: Uuid) -> PaymentResult<bool> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM payment_orders o
                JOIN payment_order_items i ON i.order_id = o.id
                WHERE o.user_id = $1 AND i.skill_id = $2 AND o.status = 'paid'
            )
            "#,
        )
        .bind(user_id)
        .bind(skill_id)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)
    }

    #[instrument(skip(self, result), fields(order_no = %result.order_no, provider = %result.payment_type))]
    async fn apply_callback(&self, result: &CallbackResult) -> PaymentResult<SettlementReport> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM payment_orders WHERE order_no = $1 FOR UPDATE",
            ORDER_COLUMNS
        ))
        .bind(result.order_no.as_str())
        .fetch_optional(tx.as_mut())
        .await
        .map_err(storage)?;

        let mut order = match row {
            Some(row) => order_from_row(&row)?,
            None => {
                error!("reconciliation alert: callback for unknown order");
                tx.rollback().await.map_err(storage)?;
                return Err(PaymentError::OrderNotFound {
                    reference: result.order_no.to_string(),
                });
            }
        };
        order.items = Self::load_items(tx.as_mut(), order.id).await?;

        let existing = sqlx::query(&format!(
            "SELECT {} FROM payment_transactions WHERE order_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(order.id)
        .fetch_all(tx.as_mut())
        .await
        .map_err(storage)?
        .iter()
        .map(transaction_from_row)
        .collect::<PaymentResult<Vec<_>>>()?;

        let now: DateTime<Utc> = Utc::now();
        let plan = plan_settlement(&order, &existing, result, now);
        log_plan(&plan, &order, result.payment_type);

        if !plan.changes_order() && plan.transaction.is_none() {
            tx.rollback().await.map_err(storage)?;
            return Ok(SettlementReport::new(&order, plan));
        }

        let was_pending = order.is_pending();
        plan.apply_to(&mut order);

        sqlx::query("UPDATE payment_orders SET status = $2, paid_at = $3, payment_method = $4 WHERE id = $1")
            .bind(order.id)
            .bind(order.status.as_str())
            .bind(order.paid_at)
            .bind(order.payment_method.map(|m| m.as_str()))
            .execute(tx.as_mut())
            .await
            .map_err(storage)?;

        if let Some(t) = &plan.transaction {
            sqlx::query(
                r#"
                INSERT INTO payment_transactions (
                    id, order_id, payment_channel, external_transaction_id, amount, currency,
                    status, raw_response, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(t.id)
            .bind(t.order_id)
            .bind(t.payment_channel.as_str())
            .bind(&t.external_transaction_id)
            .bind(t.amount.amount)
            .bind(t.amount.currency.as_str())
            .bind(t.status.as_str())
            .bind(&t.raw_response)
            .bind(t.created_at)
            .bind(t.updated_at)
            .execute(tx.as_mut())
            .await
            .map_err(storage)?;
        }

        if self.count_purchases && was_pending && order.status == OrderStatus::Paid {
            for item in &order.items {
                let quantity = quantity_column(item.quantity)?;
                sqlx::query(
                    "UPDATE skills SET purchases_count = purchases_count + $2 WHERE id = $1",
                )
                .bind(item.skill_id)
                .bind(quantity)
                .execute(tx.as_mut())
                .await
                .map_err(storage)?;
            }
        }

        tx.commit().await.map_err(storage)?;
        Ok(SettlementReport::new(&order, plan))
    }

    async fn transactions_for_order(&self, order_id: Uuid) -> PaymentResult<Vec<Transaction>> {
        sqlx::query(&format!(
            "SELECT {} FROM payment_transactions WHERE order_id = $1 ORDER BY created_at",
            TRANSACTION_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?
        .iter()
        .map(transaction_from_row)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_column_rejects_overflow() {
        assert_eq!(quantity_column(3).unwrap(), 3);
        assert_eq!(quantity_column(i32::MAX as u32).unwrap(), i32::MAX);
        assert!(matches!(
            quantity_column(i32::MAX as u32 + 1),
            Err(PaymentError::InvalidRequest(_))
        ));
    }
}
