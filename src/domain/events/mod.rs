//! Domain events
use crate::domain::value_objects::Money;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "aggregate", content = "event")]
pub enum DomainEvent {
    Cart(CartEvent),
    Order(OrderEvent),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum CartEvent {
    Merged { user_id: Uuid, combined: usize, reassigned: usize },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum OrderEvent {
    Placed { order_id: Uuid, order_number: String, total: Money },
    Paid { order_id: Uuid, receipt: Option<String> },
    PaymentFailed { order_id: Uuid, code: i64 },
    ReservationReleased { order_id: Uuid },
}

impl DomainEvent {
    /// Subject the event is published on.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Cart(CartEvent::Merged { .. }) => "storefront.cart.merged",
            Self::Order(OrderEvent::Placed { .. }) => "storefront.order.placed",
            Self::Order(OrderEvent::Paid { .. }) => "storefront.order.paid",
            Self::Order(OrderEvent::PaymentFailed { .. }) => "storefront.order.payment_failed",
            Self::Order(OrderEvent::ReservationReleased { .. }) => "storefront.order.reservation_released",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_event_payload() {
        let event = DomainEvent::Order(OrderEvent::Placed { order_id: Uuid::nil(), order_number: "20261018-000001".into(), total: Money::new(dec!(1500)) });
        assert_eq!(event.subject(), "storefront.order.placed");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["aggregate"], "Order");
        assert_eq!(json["event"]["type"], "Placed");
        assert_eq!(json["event"]["total"], "1500.00");
    }
}
