//! Safaricom Daraja STK push client

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{GatewayError, PaymentGateway, StkPushAccepted, StkPushRequest};
use crate::config::MpesaConfig;

const TRANSACTION_TYPE: &str = "CustomerPayBillOnline";
const NAIROBI_UTC_OFFSET_HOURS: i64 = 3;

#[derive(Clone)]
pub struct MpesaClient {
    http: reqwest::Client,
    config: MpesaConfig,
}

impl MpesaClient {
    pub fn new(config: MpesaConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        let url = format!("{}/oauth/v1/generate?grant_type=client_credentials", self.config.api_url);
        let response = self
            .http
            .get(url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| GatewayError::Auth(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| GatewayError::Auth(e.to_string()))?;
        if !status.is_success() {
            warn!(%status, body = %body, "M-Pesa token request rejected");
            return Err(GatewayError::Auth(format!("token endpoint returned {status}")));
        }
        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| GatewayError::Auth(e.to_string()))?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl PaymentGateway for MpesaClient {
    async fn stk_push(&self, request: &StkPushRequest) -> Result<StkPushAccepted, GatewayError> {
        let token = self.access_token().await?;
        let timestamp = timestamp(Utc::now());
        let password = stk_password(&self.config.shortcode, &self.config.passkey, &timestamp);
        let payload = StkPushPayload::new(&self.config, request, &password, &timestamp);

        let url = format!("{}/mpesa/stkpush/v1/processrequest", self.config.api_url);
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| GatewayError::Transport(e.to_string()))?;
        debug!(%status, body = %body, "STK push response");

        let parsed: StkPushResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::Transport(format!("unreadable response ({status}): {e}")))?;
        parsed.into_result()
    }
}

/// `yyyyMMddHHmmss` in Nairobi time, as Daraja expects.
pub fn timestamp(now: DateTime<Utc>) -> String {
    (now + chrono::Duration::hours(NAIROBI_UTC_OFFSET_HOURS)).naive_utc().format("%Y%m%d%H%M%S").to_string()
}

pub fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{shortcode}{passkey}{timestamp}"))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushPayload<'a> {
    business_short_code: &'a str,
    password: &'a str,
    timestamp: &'a str,
    transaction_type: &'static str,
    amount: i64,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    call_back_url: &'a str,
    account_reference: &'a str,
    transaction_desc: &'a str,
}

impl<'a> StkPushPayload<'a> {
    fn new(config: &'a MpesaConfig, request: &'a StkPushRequest, password: &'a str, timestamp: &'a str) -> Self {
        Self {
            business_short_code: &config.shortcode,
            password,
            timestamp,
            transaction_type: TRANSACTION_TYPE,
            amount: request.amount,
            party_a: request.phone.as_str(),
            party_b: &config.shortcode,
            phone_number: request.phone.as_str(),
            call_back_url: &config.callback_url,
            account_reference: &request.account_reference,
            transaction_desc: &request.description,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "ResponseCode", default)]
    response_code: Option<String>,
    #[serde(rename = "CheckoutRequestID", default)]
    checkout_request_id: Option<String>,
    #[serde(rename = "MerchantRequestID", default)]
    merchant_request_id: Option<String>,
    #[serde(rename = "CustomerMessage", default)]
    customer_message: Option<String>,
    #[serde(rename = "ResponseDescription", default)]
    response_description: Option<String>,
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
    #[serde(rename = "errorMessage", default)]
    error_message: Option<String>,
}

impl StkPushResponse {
    fn into_result(self) -> Result<StkPushAccepted, GatewayError> {
        match (self.response_code.as_deref(), self.checkout_request_id) {
            (Some("0"), Some(checkout_request_id)) => Ok(StkPushAccepted {
                checkout_request_id,
                merchant_request_id: self.merchant_request_id,
                customer_message: self.customer_message.unwrap_or_else(|| "Success. Request accepted for processing".to_string()),
            }),
            (code, _) => Err(GatewayError::Rejected {
                code: code.map(str::to_string).or(self.error_code).unwrap_or_else(|| "1".to_string()),
                message: self
                    .customer_message
                    .or(self.error_message)
                    .or(self.response_description)
                    .unwrap_or_else(|| "Payment request was not accepted".to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::Msisdn;
    use chrono::TimeZone;

    fn config() -> MpesaConfig {
        MpesaConfig {
            consumer_key: "key".into(),
            consumer_secret: "secret".into(),
            passkey: "passkey".into(),
            shortcode: "174379".into(),
            api_url: "https://sandbox.safaricom.co.ke".into(),
            callback_url: "https://shop.example.com/mpesa/callback/".into(),
        }
    }

    #[test]
    fn test_timestamp_is_nairobi_time() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 21, 30, 5).unwrap();
        assert_eq!(timestamp(now), "20261019003005");
    }

    #[test]
    fn test_password_encoding() {
        let password = stk_password("174379", "passkey", "20261018120000");
        let decoded = STANDARD.decode(password).unwrap();
        assert_eq!(decoded, b"174379passkey20261018120000");
    }

    #[test]
    fn test_payload_field_names() {
        let config = config();
        let request = StkPushRequest {
            phone: Msisdn::parse("0712345678").unwrap(),
            amount: 1500,
            account_reference: "42".into(),
            description: "Payment for Order #42".into(),
        };
        let payload = StkPushPayload::new(&config, &request, "pw", "20261018120000");
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["BusinessShortCode"], "174379");
        assert_eq!(json["TransactionType"], "CustomerPayBillOnline");
        assert_eq!(json["PartyA"], "254712345678");
        assert_eq!(json["PhoneNumber"], "254712345678");
        assert_eq!(json["CallBackURL"], "https://shop.example.com/mpesa/callback/");
        assert_eq!(json["AccountReference"], "42");
        assert_eq!(json["Amount"], 1500);
    }

    #[test]
    fn test_accepted_response() {
        let raw = r#"{"MerchantRequestID":"29115-34620561-1","CheckoutRequestID":"ws_CO_191220191020363925","ResponseCode":"0","ResponseDescription":"Success. Request accepted for processing","CustomerMessage":"Success. Request accepted for processing"}"#;
        let accepted = serde_json::from_str::<StkPushResponse>(raw).unwrap().into_result().unwrap();
        assert_eq!(accepted.checkout_request_id, "ws_CO_191220191020363925");
        assert_eq!(accepted.merchant_request_id.as_deref(), Some("29115-34620561-1"));
    }

    #[test]
    fn test_rejected_responses() {
        let raw = r#"{"requestId":"1","errorCode":"400.002.02","errorMessage":"Bad Request - Invalid PhoneNumber"}"#;
        let err = serde_json::from_str::<StkPushResponse>(raw).unwrap().into_result().unwrap_err();
        assert_eq!(err, GatewayError::Rejected { code: "400.002.02".into(), message: "Bad Request - Invalid PhoneNumber".into() });

        let raw = r#"{"ResponseCode":"1","CustomerMessage":"Insufficient balance"}"#;
        let err = serde_json::from_str::<StkPushResponse>(raw).unwrap().into_result().unwrap_err();
        assert_eq!(err.customer_message(), "Insufficient balance");
    }
}
