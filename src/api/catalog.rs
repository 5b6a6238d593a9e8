use axum::{extract::{Path, Query, State}, Json};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use super::identity::InternalCaller;
use super::AppState;
use crate::domain::aggregates::{Category, ProductCard};
use crate::infrastructure::catalog::{ProductDetail, ProductListing, SearchFilter};
use crate::Result;

#[derive(Debug, Default, Deserialize)]
pub struct PageParams { pub page: Option<String> }

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub keyword: Option<String>,
    pub brand: Option<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub page: Option<String>,
}

fn price(raw: Option<&str>) -> Option<Decimal> {
    raw.and_then(|v| v.trim().parse().ok())
}

impl SearchParams {
    pub fn filter(&self) -> SearchFilter {
        SearchFilter {
            keyword: self.keyword.clone(),
            brand: self.brand.clone(),
            min_price: price(self.min_price.as_deref()),
            max_price: price(self.max_price.as_deref()),
        }
    }
}

pub async fn categories(State(s): State<AppState>) -> Result<Json<Vec<Category>>> {
    Ok(Json(s.catalog.list_categories().await?))
}

pub async fn home(State(s): State<AppState>, Path(parent_slug): Path<String>) -> Result<Json<Vec<ProductCard>>> {
    Ok(Json(s.catalog.home_picks(&parent_slug).await?))
}

pub async fn store(State(s): State<AppState>, Query(p): Query<PageParams>) -> Result<Json<ProductListing>> {
    Ok(Json(s.catalog.browse(None, p.page.as_deref()).await?))
}

pub async fn store_category(
    State(s): State<AppState>,
    Path(category_slug): Path<String>,
    Query(p): Query<PageParams>,
) -> Result<Json<ProductListing>> {
    Ok(Json(s.catalog.browse(Some(&category_slug), p.page.as_deref()).await?))
}

pub async fn product(
    State(s): State<AppState>,
    Path((category_slug, product_slug)): Path<(String, String)>,
) -> Result<Json<ProductDetail>> {
    Ok(Json(s.catalog.product_detail(&category_slug, &product_slug).await?))
}

pub async fn search(State(s): State<AppState>, Query(p): Query<SearchParams>) -> Result<Json<ProductListing>> {
    Ok(Json(s.catalog.search(&p.filter(), p.page.as_deref()).await?))
}

pub async fn sync_stock(_: InternalCaller, State(s): State<AppState>) -> Result<Json<Value>> {
    let updated = s.catalog.sync_product_stock().await?;
    Ok(Json(json!({"updated": updated})))
}
