//! M-Pesa transaction aggregate and STK callback handling

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;
use crate::domain::aggregates::order::OrderStatus;
use crate::domain::value_objects::Money;

pub const RECEIPT_KEY: &str = "MpesaReceiptNumber";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TransactionStatus { Pending, Successful, Failed }

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "Pending", Self::Successful => "Successful", Self::Failed => "Failed" }
    }
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Pending" => Some(Self::Pending),
            "Successful" => Some(Self::Successful),
            "Failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, FromRow)]
pub struct MpesaTransaction {
    pub id: Uuid,
    pub order_id: Uuid,
    pub checkout_request_id: String,
    #[sqlx(try_from = "Decimal")]
    pub amount: Money,
    pub mpesa_receipt_number: Option<String>,
    pub status: String,
    pub phone_number: String,
    pub result_desc: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MpesaTransaction {
    /// Unknown status text is treated as settled so it is never overwritten.
    pub fn status(&self) -> TransactionStatus {
        TransactionStatus::parse(&self.status).unwrap_or(TransactionStatus::Failed)
    }
}

// =============================================================================
// Callback payload
// =============================================================================

#[derive(Debug, Deserialize)]
struct CallbackEnvelope {
    #[serde(rename = "Body")]
    body: CallbackBody,
}

#[derive(Debug, Deserialize)]
struct CallbackBody {
    #[serde(rename = "stkCallback")]
    stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode", deserialize_with = "lenient_code")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata", default)]
    pub metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<Value>,
}

/// Result codes arrive as numbers, occasionally as numeric strings.
fn lenient_code<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().ok_or_else(|| de::Error::custom("ResultCode out of range")),
        Value::String(s) => s.trim().parse().map_err(de::Error::custom),
        other => Err(de::Error::custom(format!("unexpected ResultCode {other}"))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Paid { receipt: Option<String> },
    Declined { code: i64, description: Option<String> },
}

impl CallbackOutcome {
    pub fn target_status(&self) -> TransactionStatus {
        match self {
            Self::Paid { .. } => TransactionStatus::Successful,
            Self::Declined { .. } => TransactionStatus::Failed,
        }
    }
    pub fn order_status(&self) -> OrderStatus {
        match self {
            Self::Paid { .. } => OrderStatus::Paid,
            Self::Declined { .. } => OrderStatus::Failed,
        }
    }
}

impl StkCallback {
    pub fn metadata_value(&self, name: &str) -> Option<&Value> {
        self.metadata.as_ref()?.items.iter().find(|item| item.name == name)?.value.as_ref()
    }

    pub fn receipt_number(&self) -> Option<String> {
        self.metadata_value(RECEIPT_KEY).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn outcome(&self) -> CallbackOutcome {
        if self.result_code == 0 {
            CallbackOutcome::Paid { receipt: self.receipt_number() }
        } else {
            CallbackOutcome::Declined { code: self.result_code, description: self.result_desc.clone() }
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallbackError {
    #[error("malformed callback payload: {0}")]
    Malformed(String),
    #[error("no transaction for CheckoutRequestID {0}")]
    UnknownCheckout(String),
}

pub fn parse_callback(raw: &[u8]) -> Result<StkCallback, CallbackError> {
    serde_json::from_slice::<CallbackEnvelope>(raw)
        .map(|envelope| envelope.body.stk_callback)
        .map_err(|e| CallbackError::Malformed(e.to_string()))
}

/// What to do with a callback given the transaction's current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Apply(TransactionStatus),
    AlreadySettled(TransactionStatus),
}

/// Only a Pending transaction may be settled; repeats are no-ops.
pub fn reconcile(current: TransactionStatus, outcome: &CallbackOutcome) -> Reconciliation {
    match current {
        TransactionStatus::Pending => Reconciliation::Apply(outcome.target_status()),
        settled => Reconciliation::AlreadySettled(settled),
    }
}

/// The fixed acknowledgement the gateway expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: &'static str,
}

impl CallbackAck {
    pub fn accepted() -> Self { Self { result_code: 0, result_desc: "Accepted" } }
}

/// Read-only view of where an order's payment stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentProgress {
    Paid { receipt: Option<String> },
    PendingPayment,
    Failed,
}

impl PaymentProgress {
    pub fn of(status: Option<OrderStatus>, is_ordered: bool, receipt: Option<String>) -> Self {
        match status {
            Some(OrderStatus::Paid) => Self::Paid { receipt },
            _ if is_ordered => Self::Paid { receipt },
            Some(OrderStatus::Failed) => Self::Failed,
            _ => Self::PendingPayment,
        }
    }
}
