//! STK push initiation and callback reconciliation.

use std::sync::Arc;

use serde::Serialize;
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::orders::owned_order;
use super::EventPublisher;
use crate::domain::aggregates::order::{Order, OrderStatus, PaymentStatus, PAYMENT_METHOD};
use crate::domain::aggregates::payment::{
    parse_callback, reconcile, CallbackAck, CallbackError, CallbackOutcome, MpesaTransaction, PaymentProgress,
    Reconciliation, TransactionStatus,
};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::Msisdn;
use crate::gateway::{PaymentGateway, StkPushAccepted, StkPushRequest};
use crate::{Result, StoreError};

pub const PUSH_SENT: &str = "STK push sent. Please check your phone to complete the payment.";
pub const PUSH_IN_FLIGHT: &str = "A payment request for this order is already awaiting your response.";

#[derive(Debug, Clone, Serialize)]
pub struct PushStarted {
    pub order_id: Uuid,
    pub checkout_request_id: String,
    pub message: &'static str,
}

/// Send the push, turning every gateway failure into a customer-facing error.
pub(crate) async fn request_push(gateway: &dyn PaymentGateway, request: &StkPushRequest) -> Result<StkPushAccepted> {
    gateway.stk_push(request).await.map_err(|e| {
        warn!(error = %e, reference = %request.account_reference, "STK push not accepted");
        StoreError::Gateway(e.customer_message())
    })
}

pub(crate) fn push_request(order: &Order) -> Result<StkPushRequest> {
    Ok(StkPushRequest {
        phone: Msisdn::parse(&order.phone)?,
        amount: order.grand_total.whole_units(),
        account_reference: order.seq.to_string(),
        description: format!("Payment for Order #{}", order.seq),
    })
}

#[derive(Clone)]
pub struct PgPaymentService {
    pool: PgPool,
    gateway: Arc<dyn PaymentGateway>,
    events: EventPublisher,
}

impl PgPaymentService {
    pub fn new(pool: PgPool, gateway: Arc<dyn PaymentGateway>, events: EventPublisher) -> Self {
        Self { pool, gateway, events }
    }

    /// Prompt the customer's phone for an order awaiting payment.
    ///
    /// The order row stays locked until the transaction is recorded, and a
    /// second push is refused while an earlier one is still unanswered.
    pub async fn initiate(&self, user_id: Uuid, order_id: Uuid) -> Result<PushStarted> {
        let mut tx = self.pool.begin().await?;
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 AND user_id = $2 FOR UPDATE")
            .bind(order_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("order"))?;
        if order.status() != Some(OrderStatus::PendingPayment) {
            return Err(StoreError::Validation("Order is not awaiting payment".to_string()));
        }
        let in_flight: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM mpesa_transactions WHERE order_id = $1 AND status = $2)",
        )
        .bind(order.id)
        .bind(TransactionStatus::Pending.as_str())
        .fetch_one(&mut *tx)
        .await?;
        if in_flight {
            return Err(StoreError::Validation(PUSH_IN_FLIGHT.to_string()));
        }

        let request = push_request(&order)?;
        let accepted = request_push(self.gateway.as_ref(), &request).await?;

        sqlx::query(
            r#"
            INSERT INTO mpesa_transactions (id, order_id, checkout_request_id, amount, status, phone_number)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(order.id)
        .bind(&accepted.checkout_request_id)
        .bind(order.grand_total.amount())
        .bind(TransactionStatus::Pending.as_str())
        .bind(request.phone.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(%order_id, checkout_request_id = %accepted.checkout_request_id, "STK push sent");
        Ok(PushStarted { order_id, checkout_request_id: accepted.checkout_request_id, message: PUSH_SENT })
    }

    /// Apply a gateway callback. The gateway always gets the same acknowledgement.
    pub async fn handle_callback(&self, raw: &[u8]) -> CallbackAck {
        match self.apply_callback(raw).await {
            Ok(Some(event)) => self.events.publish(event).await,
            Ok(None) => {}
            Err(StoreError::Callback(reason)) => warn!(%reason, "callback ignored"),
            Err(e) => error!(error = %e, "callback could not be applied"),
        }
        CallbackAck::accepted()
    }

    async fn apply_callback(&self, raw: &[u8]) -> Result<Option<DomainEvent>> {
        let callback = parse_callback(raw).map_err(|e| StoreError::Callback(e.to_string()))?;
        let outcome = callback.outcome();

        let mut tx = self.pool.begin().await?;
        let txn = sqlx::query_as::<_, MpesaTransaction>(
            "SELECT * FROM mpesa_transactions WHERE checkout_request_id = $1 FOR UPDATE",
        )
        .bind(&callback.checkout_request_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::Callback(CallbackError::UnknownCheckout(callback.checkout_request_id.clone()).to_string()))?;

        let target = match reconcile(txn.status(), &outcome) {
            Reconciliation::Apply(target) => target,
            Reconciliation::AlreadySettled(status) => {
                info!(checkout_request_id = %txn.checkout_request_id, status = status.as_str(), "duplicate callback ignored");
                return Ok(None);
            }
        };

        let receipt = match &outcome {
            CallbackOutcome::Paid { receipt } => receipt.clone(),
            CallbackOutcome::Declined { .. } => None,
        };
        let swapped = sqlx::query(
            r#"
            UPDATE mpesa_transactions
            SET status = $2, mpesa_receipt_number = $3, result_desc = $4, updated_at = NOW()
            WHERE id = $1 AND status = $5
            "#,
        )
        .bind(txn.id)
        .bind(target.as_str())
        .bind(&receipt)
        .bind(&callback.result_desc)
        .bind(TransactionStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if swapped == 0 {
            return Ok(None);
        }

        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(txn.order_id)
            .fetch_one(&mut *tx)
            .await?;
        let next = order
            .status()
            .ok_or_else(|| StoreError::Validation(format!("unknown order status {}", order.status)))
            .and_then(|current| current.transition(outcome.order_status()).map_err(StoreError::from));
        let next = match next {
            Ok(next) => next,
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "callback settled a transaction for an order no longer awaiting payment");
                tx.commit().await?;
                return Ok(None);
            }
        };

        let event = match outcome {
            CallbackOutcome::Paid { receipt } => {
                if receipt.is_none() {
                    warn!(order_id = %order.id, "successful callback carried no receipt number");
                }
                sqlx::query("UPDATE orders SET status = $2, is_ordered = TRUE, updated_at = NOW() WHERE id = $1")
                    .bind(order.id)
                    .bind(next.as_str())
                    .execute(&mut *tx)
                    .await?;

                let payment_id: Uuid = sqlx::query_scalar(
                    r#"
                    INSERT INTO payments (id, order_id, user_id, payment_id, payment_method, amount_paid, status)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (order_id) DO UPDATE
                    SET payment_id = EXCLUDED.payment_id, status = EXCLUDED.status, updated_at = NOW()
                    RETURNING id
                    "#,
                )
                .bind(Uuid::now_v7())
                .bind(order.id)
                .bind(order.user_id)
                .bind(&receipt)
                .bind(PAYMENT_METHOD)
                .bind(txn.amount.amount())
                .bind(PaymentStatus::Completed.as_str())
                .fetch_one(&mut *tx)
                .await?;

                sqlx::query("UPDATE orders SET payment_id = $2 WHERE id = $1")
                    .bind(order.id)
                    .bind(payment_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("UPDATE order_products SET payment_id = $2, ordered = TRUE WHERE order_id = $1")
                    .bind(order.id)
                    .bind(payment_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
                    .bind(order.user_id)
                    .execute(&mut *tx)
                    .await?;

                info!(order_id = %order.id, receipt = ?receipt, "payment confirmed");
                DomainEvent::Order(OrderEvent::Paid { order_id: order.id, receipt })
            }
            CallbackOutcome::Declined { code, description } => {
                sqlx::query("UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1")
                    .bind(order.id)
                    .bind(next.as_str())
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("UPDATE payments SET status = $2, updated_at = NOW() WHERE order_id = $1 AND status = $3")
                    .bind(order.id)
                    .bind(PaymentStatus::Failed.as_str())
                    .bind(PaymentStatus::Pending.as_str())
                    .execute(&mut *tx)
                    .await?;

                warn!(order_id = %order.id, code, description = ?description, "payment declined");
                DomainEvent::Order(OrderEvent::PaymentFailed { order_id: order.id, code })
            }
        };

        tx.commit().await?;
        Ok(Some(event))
    }

    /// Where an order's payment stands, for polling clients.
    pub async fn order_status(&self, user_id: Uuid, order_id: Uuid) -> Result<PaymentProgress> {
        let mut conn = self.pool.acquire().await?;
        let order = owned_order(&mut conn, user_id, order_id).await?;
        let receipt: Option<Option<String>> = sqlx::query_scalar(
            r#"
            SELECT mpesa_receipt_number FROM mpesa_transactions
            WHERE order_id = $1 AND status = $2
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(order.id)
        .bind(TransactionStatus::Successful.as_str())
        .fetch_optional(&mut *conn)
        .await?;
        Ok(PaymentProgress::of(order.status(), order.is_ordered, receipt.flatten()))
    }
}
