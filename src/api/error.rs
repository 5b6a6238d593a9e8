//! Mapping from [`StoreError`] to HTTP responses.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::StoreError;

/// Where an empty checkout sends the shopper.
pub const EMPTY_CART_REDIRECT: &str = "/store";

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        match &self {
            Self::Validation(message) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"error": message}))).into_response()
            }
            Self::OutOfStock { .. } | Self::QuantityExceeded(_) => {
                (StatusCode::CONFLICT, Json(json!({"warning": self.to_string()}))).into_response()
            }
            Self::EmptyCart => (
                StatusCode::SEE_OTHER,
                [(header::LOCATION, EMPTY_CART_REDIRECT)],
                Json(json!({"error": self.to_string(), "redirect": EMPTY_CART_REDIRECT})),
            )
                .into_response(),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, Json(json!({"error": self.to_string()}))).into_response(),
            Self::MissingIdentity => {
                (StatusCode::UNAUTHORIZED, Json(json!({"error": self.to_string()}))).into_response()
            }
            Self::Forbidden => (StatusCode::FORBIDDEN, Json(json!({"error": self.to_string()}))).into_response(),
            Self::Gateway(message) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": "Payment request failed", "message": message})),
            )
                .into_response(),
            Self::Callback(reason) => (StatusCode::BAD_REQUEST, Json(json!({"error": reason}))).into_response(),
            Self::Database(e) => {
                error!(error = %e, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "Internal server error"}))).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (StoreError::Validation("bad".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (StoreError::OutOfStock { label: "250ml".into() }, StatusCode::CONFLICT),
            (StoreError::QuantityExceeded("too many".into()), StatusCode::CONFLICT),
            (StoreError::EmptyCart, StatusCode::SEE_OTHER),
            (StoreError::NotFound("product"), StatusCode::NOT_FOUND),
            (StoreError::MissingIdentity, StatusCode::UNAUTHORIZED),
            (StoreError::Forbidden, StatusCode::FORBIDDEN),
            (StoreError::Gateway("down".into()), StatusCode::BAD_GATEWAY),
            (StoreError::Database(sqlx::Error::RowNotFound), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_empty_cart_redirects_to_store() {
        let response = StoreError::EmptyCart.into_response();
        assert_eq!(response.headers()[header::LOCATION], "/store");
    }
}
