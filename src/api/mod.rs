//! HTTP surface.

pub mod cart;
pub mod catalog;
pub mod error;
pub mod identity;
pub mod orders;
pub mod payments;

use std::sync::Arc;

use axum::{routing::{get, post}, Json, Router};
use chrono::Duration;
use sqlx::PgPool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::gateway::PaymentGateway;
use crate::infrastructure::{CatalogRepository, EventPublisher, PgCartService, PgOrderService, PgPaymentService};

#[derive(Clone)]
pub struct AppState {
    pub catalog: CatalogRepository,
    pub carts: PgCartService,
    pub orders: PgOrderService,
    pub payments: PgPaymentService,
    pub reservation_timeout: Duration,
    pub internal_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(db: PgPool, gateway: Arc<dyn PaymentGateway>, events: EventPublisher, reservation_timeout: Duration) -> Self {
        Self {
            catalog: CatalogRepository::new(db.clone()),
            carts: PgCartService::new(db.clone(), events.clone()),
            orders: PgOrderService::new(db.clone(), events.clone()),
            payments: PgPaymentService::new(db, gateway, events),
            reservation_timeout,
            internal_token: None,
        }
    }

    pub fn with_internal_token(mut self, token: Option<String>) -> Self {
        self.internal_token = token.map(Arc::from);
        self
    }
}

/// Operator endpoints, each guarded by [`identity::InternalCaller`].
fn internal_routes() -> Router<AppState> {
    Router::new()
        .route("/internal/stock/sync", post(catalog::sync_stock))
        .route("/internal/reservations/release", post(orders::release))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "azara-storefront"})) }))
        .route("/api/v1/categories", get(catalog::categories))
        .route("/api/v1/home/:parent_slug", get(catalog::home))
        .route("/api/v1/store", get(catalog::store))
        .route("/api/v1/store/:category_slug", get(catalog::store_category))
        .route("/api/v1/store/:category_slug/:product_slug", get(catalog::product))
        .route("/api/v1/search", get(catalog::search))
        .route("/api/v1/cart", get(cart::view))
        .route("/api/v1/cart/count", get(cart::count))
        .route("/api/v1/cart/add/:product_id", post(cart::add))
        .route("/api/v1/cart/remove/:product_id/:item_id", post(cart::remove_one))
        .route("/api/v1/cart/remove_item/:product_id/:item_id", post(cart::remove_item))
        .route("/api/v1/cart/merge", post(cart::merge))
        .route("/api/v1/checkout", get(cart::checkout))
        .route("/api/v1/orders", get(orders::history))
        .route("/api/v1/orders/place", post(orders::place))
        .route("/api/v1/orders/:id/review", get(orders::review))
        .route("/api/v1/orders/:id/receipt", get(orders::receipt))
        .route("/api/v1/orders/:id/complete", get(payments::complete))
        .route("/mpesa/stk_push/:order_id", post(payments::stk_push))
        .route("/mpesa/callback/", post(payments::callback))
        .merge(internal_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
