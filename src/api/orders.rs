use axum::{extract::{Path, State}, http::{HeaderMap, StatusCode}, Json};
use uuid::Uuid;

use super::identity::{CurrentUser, InternalCaller};
use super::AppState;
use crate::domain::aggregates::{CheckoutForm, Order};
use crate::infrastructure::orders::{OrderDetail, ReleaseSummary};
use crate::Result;

/// Client address as reported by the reverse proxy.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers.get("x-forwarded-for")?.to_str().ok()?;
    forwarded.split(',').next().map(str::trim).filter(|ip| !ip.is_empty()).map(str::to_string)
}

pub async fn place(
    State(s): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    headers: HeaderMap,
    Json(form): Json<CheckoutForm>,
) -> Result<(StatusCode, Json<OrderDetail>)> {
    let detail = s.orders.place_order(user_id, form, client_ip(&headers)).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn history(State(s): State<AppState>, CurrentUser(user_id): CurrentUser) -> Result<Json<Vec<Order>>> {
    Ok(Json(s.orders.history(user_id).await?))
}

pub async fn review(
    State(s): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderDetail>> {
    Ok(Json(s.orders.review(user_id, id).await?))
}

pub async fn receipt(
    State(s): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderDetail>> {
    Ok(Json(s.orders.receipt(user_id, id).await?))
}

pub async fn release(_: InternalCaller, State(s): State<AppState>) -> Result<Json<ReleaseSummary>> {
    Ok(Json(s.orders.release_reservations(s.reservation_timeout).await?))
}
