//! Outbound payment gateway.
//!
//! The checkout pipeline only talks to [`PaymentGateway`]; [`mpesa::MpesaClient`]
//! is the Daraja STK push implementation used by the binary.

pub mod mpesa;

use async_trait::async_trait;
use thiserror::Error;
use crate::domain::value_objects::Msisdn;

pub use mpesa::MpesaClient;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StkPushRequest {
    pub phone: Msisdn,
    /// Whole currency units.
    pub amount: i64,
    pub account_reference: String,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StkPushAccepted {
    pub checkout_request_id: String,
    pub merchant_request_id: Option<String>,
    pub customer_message: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Failed to authenticate with M-PESA: {0}")]
    Auth(String),
    #[error("STK Push Connection Failed: {0}")]
    Transport(String),
    #[error("{message}")]
    Rejected { code: String, message: String },
}

impl GatewayError {
    /// Text safe to show the customer.
    pub fn customer_message(&self) -> String {
        match self {
            Self::Auth(_) => "Failed to authenticate with M-PESA.".to_string(),
            Self::Transport(_) => "STK Push Connection Failed".to_string(),
            Self::Rejected { message, .. } => message.clone(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Prompt the customer's phone to approve a payment.
    async fn stk_push(&self, request: &StkPushRequest) -> Result<StkPushAccepted, GatewayError>;
}
