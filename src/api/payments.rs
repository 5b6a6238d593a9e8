use axum::{body::Bytes, extract::{Path, State}, Json};
use uuid::Uuid;

use super::identity::CurrentUser;
use super::AppState;
use crate::domain::aggregates::{CallbackAck, PaymentProgress};
use crate::infrastructure::payments::PushStarted;
use crate::Result;

pub async fn stk_push(
    State(s): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<PushStarted>> {
    Ok(Json(s.payments.initiate(user_id, order_id).await?))
}

/// Gateway webhook. The body is read raw so that bad payloads still get acknowledged.
pub async fn callback(State(s): State<AppState>, body: Bytes) -> Json<CallbackAck> {
    Json(s.payments.handle_callback(&body).await)
}

pub async fn complete(
    State(s): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<PaymentProgress>> {
    Ok(Json(s.payments.order_status(user_id, order_id).await?))
}
