//! Order Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;
use validator::{Validate, ValidationError};
use crate::domain::aggregates::cart::CartLine;
use crate::domain::value_objects::{Money, Msisdn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus { Draft, PendingPayment, Paid, Failed }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::PendingPayment => "PENDING_PAYMENT",
            Self::Paid => "PAID",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "DRAFT" => Some(Self::Draft),
            "PENDING_PAYMENT" => Some(Self::PendingPayment),
            "PAID" => Some(Self::Paid),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// `DRAFT -> PENDING_PAYMENT -> PAID | FAILED`; nothing leaves PAID or FAILED.
    pub fn transition(self, to: OrderStatus) -> Result<OrderStatus, OrderError> {
        use OrderStatus::*;
        match (self, to) {
            (Draft, PendingPayment) | (PendingPayment, Paid) | (PendingPayment, Failed) => Ok(to),
            _ => Err(OrderError::InvalidTransition { from: self, to }),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    #[default]
    Delivery,
    Pickup,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Delivery => "delivery", Self::Pickup => "pickup" }
    }
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_delivery_address", skip_on_field_errors = false))]
pub struct CheckoutForm {
    #[validate(length(min = 1, max = 50))]
    pub first_name: String,
    #[validate(length(min = 1, max = 50))]
    pub last_name: String,
    #[validate(custom = "validate_phone")]
    pub phone: String,
    #[validate(email)]
    pub email: String,
    #[serde(default)]
    pub delivery_method: DeliveryMethod,
    #[validate(length(max = 100))]
    pub estate: Option<String>,
    #[validate(length(max = 100))]
    pub city: Option<String>,
    #[validate(length(max = 500))]
    pub order_note: Option<String>,
}

fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    Msisdn::parse(phone).map(|_| ()).map_err(|_| ValidationError::new("phone"))
}

fn validate_delivery_address(form: &CheckoutForm) -> Result<(), ValidationError> {
    if form.delivery_method == DeliveryMethod::Pickup { return Ok(()); }
    let blank = |field: &Option<String>| field.as_deref().map_or(true, |v| v.trim().is_empty());
    if blank(&form.estate) || blank(&form.city) {
        return Err(ValidationError::new("address_required_for_delivery"));
    }
    Ok(())
}

/// Where an order line's stock is taken from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum StockTarget {
    Variant(Uuid),
    Product(Uuid),
}

/// Point-in-time copy of a cart line, written as one `order_products` row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderLineSnapshot {
    pub product_id: Uuid,
    pub product_name: String,
    pub variant_id: Option<Uuid>,
    pub variant_details: Option<String>,
    pub quantity: i32,
    pub unit_price: Money,
}

impl OrderLineSnapshot {
    pub fn capture(line: &CartLine) -> Self {
        let variant = line.primary_variant();
        Self {
            product_id: line.product_id,
            product_name: line.product_name.clone(),
            variant_id: variant.map(|v| v.id),
            variant_details: variant.map(|v| v.describe(&line.product_name)),
            quantity: line.quantity,
            unit_price: line.unit_price(),
        }
    }
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
    pub fn stock_target(&self) -> StockTarget {
        self.variant_id.map(StockTarget::Variant).unwrap_or(StockTarget::Product(self.product_id))
    }
    pub fn stock_label(&self) -> String {
        self.variant_details.clone().unwrap_or_else(|| self.product_name.clone())
    }
}

/// Everything checkout writes, computed before touching the database.
#[derive(Clone, Debug)]
pub struct CheckoutPlan {
    pub lines: Vec<OrderLineSnapshot>,
    pub order_total: Money,
    pub tax: Money,
    pub grand_total: Money,
}

impl CheckoutPlan {
    /// Lines ordered by the stock row they decrement, variants first.
    pub fn lines_in_stock_order(&self) -> Vec<&OrderLineSnapshot> {
        let mut lines: Vec<&OrderLineSnapshot> = self.lines.iter().collect();
        lines.sort_by_key(|line| line.stock_target());
        lines
    }
}

pub fn plan_checkout(lines: &[CartLine]) -> Result<CheckoutPlan, OrderError> {
    if lines.is_empty() { return Err(OrderError::EmptyCart); }
    let snapshots: Vec<OrderLineSnapshot> = lines.iter().map(OrderLineSnapshot::capture).collect();
    let order_total: Money = snapshots.iter().map(OrderLineSnapshot::line_total).sum();
    let tax = Money::zero();
    Ok(CheckoutPlan { lines: snapshots, order_total, tax, grand_total: order_total + tax })
}

#[derive(Clone, Debug, Serialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub seq: i64,
    pub user_id: Uuid,
    pub order_number: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub email: String,
    pub delivery_method: String,
    pub estate: Option<String>,
    pub city: Option<String>,
    pub order_note: Option<String>,
    #[sqlx(try_from = "Decimal")]
    pub order_total: Money,
    #[sqlx(try_from = "Decimal")]
    pub tax: Money,
    #[sqlx(try_from = "Decimal")]
    pub grand_total: Money,
    pub status: String,
    pub is_ordered: bool,
    pub payment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn status(&self) -> Option<OrderStatus> { OrderStatus::parse(&self.status) }
}

#[derive(Clone, Debug, Serialize, FromRow)]
pub struct OrderProduct {
    pub id: Uuid,
    pub order_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub product_name: String,
    pub variant_id: Option<Uuid>,
    pub variant_details: Option<String>,
    pub quantity: i32,
    #[sqlx(try_from = "Decimal")]
    pub product_price: Money,
    pub ordered: bool,
}

impl OrderProduct {
    pub fn line_total(&self) -> Money { self.product_price.multiply(self.quantity) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PaymentStatus { Pending, Completed, Failed }

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "Pending", Self::Completed => "Completed", Self::Failed => "Failed" }
    }
}

pub const PAYMENT_METHOD: &str = "M-Pesa";

#[derive(Clone, Debug, Serialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub payment_id: Option<String>,
    pub payment_method: String,
    #[sqlx(try_from = "Decimal")]
    pub amount_paid: Money,
    pub status: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("Cannot place an order from an empty cart")]
    EmptyCart,
    #[error("Order cannot move from {} to {}", .from.as_str(), .to.as_str())]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::product::ProductVariant;
    use rust_decimal_macros::dec;

    fn form(method: DeliveryMethod, estate: Option<&str>) -> CheckoutForm {
        CheckoutForm {
            first_name: "Wanjiru".into(),
            last_name: "Kamau".into(),
            phone: "0712345678".into(),
            email: "wanjiru@example.com".into(),
            delivery_method: method,
            estate: estate.map(Into::into),
            city: estate.map(|_| "Nairobi".to_string()),
            order_note: None,
        }
    }

    fn line(quantity: i32, variant_price: Option<rust_decimal::Decimal>) -> CartLine {
        let product_id = Uuid::now_v7();
        let variants = variant_price
            .map(|p| vec![ProductVariant { id: Uuid::now_v7(), product_id, size_label: "500ml".into(), price: Money::new(p), stock: 9, is_active: true }])
            .unwrap_or_default();
        CartLine::new(Uuid::now_v7(), product_id, "Aloe Gel".into(), "aloe-gel".into(), quantity, variants, Money::new(dec!(100)))
    }

    #[test]
    fn test_order_workflow() {
        let status = OrderStatus::Draft.transition(OrderStatus::PendingPayment).unwrap();
        assert_eq!(status.transition(OrderStatus::Paid), Ok(OrderStatus::Paid));
        assert_eq!(status.transition(OrderStatus::Failed), Ok(OrderStatus::Failed));
        assert!(OrderStatus::Paid.transition(OrderStatus::Failed).is_err());
        assert!(OrderStatus::Draft.transition(OrderStatus::Paid).is_err());
        assert_eq!(OrderStatus::parse("PENDING_PAYMENT"), Some(OrderStatus::PendingPayment));
    }

    #[test]
    fn test_checkout_form_validation() {
        assert!(form(DeliveryMethod::Delivery, Some("Kilimani")).validate().is_ok());
        assert!(form(DeliveryMethod::Pickup, None).validate().is_ok());
        assert!(form(DeliveryMethod::Delivery, None).validate().is_err());
        assert!(form(DeliveryMethod::Delivery, Some("  ")).validate().is_err());

        let mut bad = form(DeliveryMethod::Pickup, None);
        bad.email = "not-an-email".into();
        bad.phone = "12345".into();
        let errors = bad.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("email"));
        assert!(errors.field_errors().contains_key("phone"));
    }

    #[test]
    fn test_checkout_plan_snapshots_prices() {
        let lines = vec![line(2, Some(dec!(500))), line(5, None)];
        let plan = plan_checkout(&lines).unwrap();
        assert_eq!(plan.grand_total.to_fixed(), "1500.00");
        let sum: Money = plan.lines.iter().map(OrderLineSnapshot::line_total).sum();
        assert_eq!(sum, plan.order_total);

        let first = &plan.lines[0];
        assert_eq!(first.variant_details.as_deref(), Some("Aloe Gel - 500ml"));
        assert!(matches!(first.stock_target(), StockTarget::Variant(_)));
        assert_eq!(plan.lines[1].stock_target(), StockTarget::Product(lines[1].product_id));
        assert_eq!(plan.lines[1].stock_label(), "Aloe Gel");
    }

    #[test]
    fn test_stock_is_taken_in_row_order() {
        let lines = vec![line(1, None), line(1, Some(dec!(300))), line(1, Some(dec!(200))), line(1, None)];
        let plan = plan_checkout(&lines).unwrap();
        let targets: Vec<StockTarget> = plan.lines_in_stock_order().iter().map(|l| l.stock_target()).collect();

        let mut expected: Vec<StockTarget> = plan.lines.iter().map(OrderLineSnapshot::stock_target).collect();
        expected.sort();
        assert_eq!(targets, expected);
        assert!(matches!(targets[..2], [StockTarget::Variant(_), StockTarget::Variant(_)]));
        assert!(matches!(targets[2..], [StockTarget::Product(_), StockTarget::Product(_)]));

        let reversed = plan_checkout(&lines.iter().rev().cloned().collect::<Vec<_>>()).unwrap();
        let again: Vec<StockTarget> = reversed.lines_in_stock_order().iter().map(|l| l.stock_target()).collect();
        assert_eq!(again, targets);
    }

    #[test]
    fn test_empty_cart_cannot_check_out() {
        assert_eq!(plan_checkout(&[]).unwrap_err(), OrderError::EmptyCart);
    }
}
