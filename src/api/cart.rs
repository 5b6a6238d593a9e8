use axum::{extract::{Path, State}, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::identity::{CurrentUser, Owner};
use super::AppState;
use crate::domain::aggregates::CartView;
use crate::infrastructure::carts::MergeSummary;
use crate::Result;

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub variant_id: Option<Uuid>,
    #[serde(default = "one")]
    pub quantity: i32,
}

fn one() -> i32 { 1 }

impl Default for AddItemRequest {
    fn default() -> Self { Self { variant_id: None, quantity: one() } }
}

#[derive(Debug, Serialize)]
pub struct AddItemResponse {
    pub message: &'static str,
    pub item_id: Uuid,
    pub quantity: i32,
    pub cart_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct MergeRequest { pub session_id: String }

pub async fn view(State(s): State<AppState>, Owner(owner): Owner) -> Result<Json<CartView>> {
    Ok(Json(s.carts.view(&owner).await?))
}

pub async fn count(State(s): State<AppState>, Owner(owner): Owner) -> Result<Json<Value>> {
    Ok(Json(json!({"count": s.carts.count(&owner).await?})))
}

pub async fn add(
    State(s): State<AppState>,
    Owner(owner): Owner,
    Path(product_id): Path<Uuid>,
    body: Option<Json<AddItemRequest>>,
) -> Result<Json<AddItemResponse>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let item = s.carts.add_item(&owner, product_id, request.variant_id, request.quantity).await?;
    let cart_count = s.carts.count(&owner).await?;
    Ok(Json(AddItemResponse { message: "Item added to cart", item_id: item.id, quantity: item.quantity, cart_count }))
}

pub async fn remove_one(
    State(s): State<AppState>,
    Owner(owner): Owner,
    Path((product_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CartView>> {
    s.carts.remove_one(&owner, product_id, item_id).await?;
    Ok(Json(s.carts.view(&owner).await?))
}

pub async fn remove_item(
    State(s): State<AppState>,
    Owner(owner): Owner,
    Path((product_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CartView>> {
    s.carts.remove_item(&owner, product_id, item_id).await?;
    Ok(Json(s.carts.view(&owner).await?))
}

/// Called by the login flow with the session id the guest shopped under.
pub async fn merge(
    State(s): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(r): Json<MergeRequest>,
) -> Result<Json<MergeSummary>> {
    Ok(Json(s.carts.merge_guest_cart(&r.session_id, user_id).await?))
}

pub async fn checkout(State(s): State<AppState>, CurrentUser(user_id): CurrentUser) -> Result<Json<CartView>> {
    Ok(Json(s.carts.checkout_preview(user_id).await?))
}
