//! Azara Storefront
//!
//! Self-hosted storefront backed by Postgres with M-Pesa mobile-money checkout.
//!
//! ## Features
//! - Product catalog browsing, search and category trees
//! - Guest (session) and customer carts with a per-variant hoarding limit
//! - Guest cart merge at login
//! - Checkout into immutable order snapshots with stock reservation
//! - STK push initiation and idempotent callback reconciliation

pub mod api;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod infrastructure;

use thiserror::Error;

use crate::domain::aggregates::{CartError, OrderError};
use crate::domain::value_objects::PhoneError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),

    #[error("This {label} is currently out of stock.")]
    OutOfStock { label: String },

    #[error("{0}")]
    QuantityExceeded(String),

    #[error("Your cart is empty")]
    EmptyCart,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("No cart identity supplied")]
    MissingIdentity,

    #[error("Internal endpoint requires a valid token")]
    Forbidden,

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Callback rejected: {0}")]
    Callback(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<CartError> for StoreError {
    fn from(err: CartError) -> Self {
        match err {
            CartError::OutOfStock { label } => Self::OutOfStock { label },
            CartError::QuantityExceeded(limit) => Self::QuantityExceeded(limit.to_string()),
            CartError::InvalidQuantity(_) => Self::Validation(err.to_string()),
        }
    }
}

impl From<OrderError> for StoreError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::EmptyCart => Self::EmptyCart,
            OrderError::InvalidTransition { .. } => Self::Validation(err.to_string()),
        }
    }
}

impl From<PhoneError> for StoreError {
    fn from(err: PhoneError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<validator::ValidationErrors> for StoreError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
