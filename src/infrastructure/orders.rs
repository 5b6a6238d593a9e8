//! Checkout into order snapshots, order reads and reservation release.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::carts::load_lines;
use super::{lock_owner, EventPublisher, ItemScope};
use crate::domain::aggregates::order::{
    plan_checkout, CheckoutForm, Order, OrderLineSnapshot, OrderProduct, OrderStatus, Payment, PaymentStatus,
    StockTarget, PAYMENT_METHOD,
};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{CartOwner, OrderNumber};
use crate::{Result, StoreError};

const PAYMENT_COLUMNS: &str = "id, order_id, user_id, payment_id, payment_method, amount_paid, status";

/// An order with its line snapshots and payment record.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    pub order: Order,
    pub lines: Vec<OrderProduct>,
    pub payment: Option<Payment>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseSummary {
    /// Pending orders whose payment window lapsed.
    pub expired: usize,
    /// Failed orders whose stock went back on the shelf.
    pub released: usize,
}

/// Decrement stock for one snapshot line; a shortfall aborts the checkout.
async fn take_stock(conn: &mut PgConnection, line: &OrderLineSnapshot) -> Result<()> {
    let (sql, id) = match line.stock_target() {
        StockTarget::Variant(id) => ("UPDATE product_variants SET stock = stock - $2 WHERE id = $1 AND stock >= $2", id),
        StockTarget::Product(id) => {
            ("UPDATE products SET stock = stock - $2, updated_at = NOW() WHERE id = $1 AND stock >= $2", id)
        }
    };
    let affected = sqlx::query(sql).bind(id).bind(line.quantity).execute(&mut *conn).await?.rows_affected();
    if affected == 0 {
        return Err(StoreError::OutOfStock { label: line.stock_label() });
    }
    Ok(())
}

async fn order_lines(conn: &mut PgConnection, order_id: Uuid) -> Result<Vec<OrderProduct>> {
    let lines = sqlx::query_as::<_, OrderProduct>(
        r#"
        SELECT id, order_id, payment_id, product_id, product_name, variant_id, variant_details,
               quantity, product_price, ordered
        FROM order_products
        WHERE order_id = $1
        ORDER BY created_at, id
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(lines)
}

pub(crate) async fn order_payment(conn: &mut PgConnection, order_id: Uuid) -> Result<Option<Payment>> {
    let payment = sqlx::query_as::<_, Payment>(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1"))
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(payment)
}

pub(crate) async fn owned_order(conn: &mut PgConnection, user_id: Uuid, order_id: Uuid) -> Result<Order> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 AND user_id = $2")
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(StoreError::NotFound("order"))
}

#[derive(Clone)]
pub struct PgOrderService {
    pool: PgPool,
    events: EventPublisher,
}

impl PgOrderService {
    pub fn new(pool: PgPool, events: EventPublisher) -> Self { Self { pool, events } }

    /// Turn the user's cart into an order awaiting payment.
    ///
    /// Snapshots, stock decrements, cart clearing and the pending payment row
    /// commit together or not at all.
    pub async fn place_order(&self, user_id: Uuid, form: CheckoutForm, ip: Option<String>) -> Result<OrderDetail> {
        form.validate()?;

        let mut tx = self.pool.begin().await?;
        lock_owner(&mut *tx, &CartOwner::User(user_id)).await?;

        let lines = load_lines(&mut *tx, ItemScope::User(user_id)).await?;
        let plan = plan_checkout(&lines)?;

        let order_id = Uuid::now_v7();
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO orders (id, user_id, first_name, last_name, phone, email, delivery_method,
                                estate, city, order_note, order_total, tax, grand_total, status, ip)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING seq
            "#,
        )
        .bind(order_id)
        .bind(user_id)
        .bind(form.first_name.trim())
        .bind(form.last_name.trim())
        .bind(form.phone.trim())
        .bind(form.email.trim())
        .bind(form.delivery_method.as_str())
        .bind(&form.estate)
        .bind(&form.city)
        .bind(&form.order_note)
        .bind(plan.order_total.amount())
        .bind(plan.tax.amount())
        .bind(plan.grand_total.amount())
        .bind(OrderStatus::Draft.as_str())
        .bind(ip)
        .fetch_one(&mut *tx)
        .await?;

        let order_number = OrderNumber::generate(Utc::now().date_naive(), seq);
        sqlx::query("UPDATE orders SET order_number = $2 WHERE id = $1")
            .bind(order_id)
            .bind(order_number.as_str())
            .execute(&mut *tx)
            .await?;

        for line in &plan.lines {
            sqlx::query(
                r#"
                INSERT INTO order_products (id, order_id, user_id, product_id, product_name, variant_id,
                                            variant_details, quantity, product_price)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(order_id)
            .bind(user_id)
            .bind(line.product_id)
            .bind(&line.product_name)
            .bind(line.variant_id)
            .bind(&line.variant_details)
            .bind(line.quantity)
            .bind(line.unit_price.amount())
            .execute(&mut *tx)
            .await?;
        }
        for line in plan.lines_in_stock_order() {
            take_stock(&mut *tx, line).await?;
        }

        sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let payment_id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, user_id, payment_method, amount_paid, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(payment_id)
        .bind(order_id)
        .bind(user_id)
        .bind(PAYMENT_METHOD)
        .bind(plan.grand_total.amount())
        .bind(PaymentStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?;

        let status = OrderStatus::Draft.transition(OrderStatus::PendingPayment)?;
        sqlx::query("UPDATE orders SET payment_id = $2, status = $3, updated_at = NOW() WHERE id = $1")
            .bind(order_id)
            .bind(payment_id)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await?;

        let order = owned_order(&mut *tx, user_id, order_id).await?;
        let lines = order_lines(&mut *tx, order_id).await?;
        let payment = order_payment(&mut *tx, order_id).await?;
        tx.commit().await?;

        info!(%order_id, order_number = %order_number, total = %plan.grand_total, "order placed");
        self.events
            .publish(DomainEvent::Order(OrderEvent::Placed {
                order_id,
                order_number: order_number.into_string(),
                total: plan.grand_total,
            }))
            .await;
        Ok(OrderDetail { order, lines, payment })
    }

    pub async fn review(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderDetail> {
        let mut conn = self.pool.acquire().await?;
        let order = owned_order(&mut conn, user_id, order_id).await?;
        let lines = order_lines(&mut conn, order_id).await?;
        let payment = order_payment(&mut conn, order_id).await?;
        Ok(OrderDetail { order, lines, payment })
    }

    /// Only available once the payment has been confirmed.
    pub async fn receipt(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderDetail> {
        let detail = self.review(user_id, order_id).await?;
        if !detail.order.is_ordered {
            return Err(StoreError::NotFound("receipt"));
        }
        Ok(detail)
    }

    pub async fn history(&self, user_id: Uuid) -> Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(orders)
    }

    /// Fail orders stuck awaiting payment for longer than `timeout`, then put
    /// back the stock of every failed order that still holds it.
    pub async fn release_reservations(&self, timeout: Duration) -> Result<ReleaseSummary> {
        let cutoff: DateTime<Utc> = Utc::now() - timeout;

        let mut tx = self.pool.begin().await?;
        let expired: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE orders SET status = $1, updated_at = NOW()
            WHERE status = $2 AND created_at < $3
            RETURNING id
            "#,
        )
        .bind(OrderStatus::Failed.as_str())
        .bind(OrderStatus::PendingPayment.as_str())
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;
        if !expired.is_empty() {
            sqlx::query(
                r#"
                UPDATE mpesa_transactions
                SET status = 'Failed', result_desc = COALESCE(result_desc, 'Payment window expired'), updated_at = NOW()
                WHERE order_id = ANY($1) AND status = 'Pending'
                "#,
            )
            .bind(&expired)
            .execute(&mut *tx)
            .await?;
            sqlx::query("UPDATE payments SET status = $2, updated_at = NOW() WHERE order_id = ANY($1) AND status = $3")
                .bind(&expired)
                .bind(PaymentStatus::Failed.as_str())
                .bind(PaymentStatus::Pending.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        if !expired.is_empty() {
            warn!(count = expired.len(), %cutoff, "expired unpaid orders");
        }

        let failed: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM orders WHERE status = $1 AND NOT stock_released")
            .bind(OrderStatus::Failed.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut released = 0;
        for order_id in failed {
            if self.release_order_stock(order_id).await? {
                released += 1;
                self.events.publish(DomainEvent::Order(OrderEvent::ReservationReleased { order_id })).await;
            }
        }

        info!(expired = expired.len(), released, "reservation release finished");
        Ok(ReleaseSummary { expired: expired.len(), released })
    }

    /// Returns false when another worker already released this order.
    async fn release_order_stock(&self, order_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let claimed = sqlx::query(
            "UPDATE orders SET stock_released = TRUE, updated_at = NOW() WHERE id = $1 AND status = $2 AND NOT stock_released",
        )
        .bind(order_id)
        .bind(OrderStatus::Failed.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if claimed == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE product_variants v
            SET stock = v.stock + r.quantity
            FROM (
                SELECT variant_id, SUM(quantity)::INTEGER AS quantity
                FROM order_products
                WHERE order_id = $1 AND variant_id IS NOT NULL
                GROUP BY variant_id
            ) r
            WHERE v.id = r.variant_id
            "#,
        )
        .bind(order_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            UPDATE products p
            SET stock = p.stock + r.quantity, updated_at = NOW()
            FROM (
                SELECT product_id, SUM(quantity)::INTEGER AS quantity
                FROM order_products
                WHERE order_id = $1 AND variant_id IS NULL AND variant_details IS NULL AND product_id IS NOT NULL
                GROUP BY product_id
            ) r
            WHERE p.id = r.product_id
            "#,
        )
        .bind(order_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(%order_id, "reserved stock released");
        Ok(true)
    }
}
