//! Catalog Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;
use crate::domain::value_objects::Money;

/// Products shown per catalog page.
pub const PAGE_SIZE: i64 = 6;
/// Products picked per parent category on the home page.
pub const HOME_PICKS: usize = 4;

#[derive(Clone, Debug, Serialize, FromRow)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Clone, Debug, Serialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub category_id: Uuid,
    pub brand_id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub image: Option<String>,
    pub stock: i32,
    pub available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, FromRow)]
pub struct ProductVariant {
    pub id: Uuid,
    pub product_id: Uuid,
    pub size_label: String,
    #[sqlx(try_from = "Decimal")]
    pub price: Money,
    pub stock: i32,
    pub is_active: bool,
}

impl ProductVariant {
    /// Text kept on order snapshots, e.g. `Shea Butter - 250ml`.
    pub fn describe(&self, product_name: &str) -> String {
        format!("{} - {}", product_name, self.size_label)
    }
}

/// Cheapest active variant; the first one listed wins a price tie.
pub fn display_variant(variants: &[ProductVariant]) -> Option<&ProductVariant> {
    variants.iter().filter(|v| v.is_active).min_by(|a, b| a.price.cmp(&b.price))
}

pub fn display_price(variants: &[ProductVariant]) -> Money {
    display_variant(variants).map(|v| v.price).unwrap_or_default()
}

pub fn display_size(variants: &[ProductVariant]) -> String {
    display_variant(variants).map(|v| v.size_label.clone()).unwrap_or_else(|| "N/A".to_string())
}

/// Listing row with price and size derived from the product's variants.
#[derive(Clone, Debug, Serialize, FromRow)]
pub struct ProductCard {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub category_slug: String,
    pub brand_name: String,
    pub image: Option<String>,
    #[sqlx(try_from = "Decimal")]
    pub display_price: Money,
    pub display_size: String,
    pub created_at: DateTime<Utc>,
}

/// Stock a cart request is checked against, with the label used in warnings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StockLevel {
    pub available: i32,
    pub label: String,
}

impl StockLevel {
    pub fn of_variant(variant: &ProductVariant) -> Self {
        Self { available: variant.stock, label: variant.size_label.clone() }
    }
    pub fn of_product(product: &Product) -> Self {
        Self { available: product.stock, label: "item".to_string() }
    }
    pub fn is_empty(&self) -> bool { self.available <= 0 }
}

/// Page selection for catalog listings. Out of range requests land on the
/// nearest valid page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub page_count: i64,
    pub total: i64,
    pub has_next: bool,
    pub has_previous: bool,
}

impl Pagination {
    pub fn resolve(requested: Option<&str>, total: i64) -> Self {
        let page_count = ((total + PAGE_SIZE - 1) / PAGE_SIZE).max(1);
        let page = requested
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(1)
            .clamp(1, page_count);
        Self { page, page_count, total, has_next: page < page_count, has_previous: page > 1 }
    }
    pub fn offset(&self) -> i64 { (self.page - 1) * PAGE_SIZE }
    pub fn limit(&self) -> i64 { PAGE_SIZE }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn variant(size: &str, price: Decimal, active: bool) -> ProductVariant {
        ProductVariant { id: Uuid::now_v7(), product_id: Uuid::nil(), size_label: size.into(), price: Money::new(price), stock: 3, is_active: active }
    }

    #[test]
    fn test_display_price_uses_cheapest_active_variant() {
        let variants = vec![
            variant("1l", dec!(1200), true),
            variant("50ml", dec!(150), false),
            variant("250ml", dec!(450), true),
        ];
        assert_eq!(display_price(&variants).to_fixed(), "450.00");
        assert_eq!(display_size(&variants), "250ml");
    }

    #[test]
    fn test_display_price_without_variants() {
        assert_eq!(display_price(&[]).to_fixed(), "0.00");
        assert_eq!(display_size(&[variant("x", dec!(1), false)]), "N/A");
    }

    #[test]
    fn test_describe_variant() {
        assert_eq!(variant("250ml", dec!(450), true).describe("Shea Butter"), "Shea Butter - 250ml");
    }

    #[test]
    fn test_pagination_clamps() {
        let p = Pagination::resolve(Some("3"), 13);
        assert_eq!((p.page, p.page_count, p.offset()), (3, 3, 12));
        assert!(!p.has_next && p.has_previous);
        assert_eq!(Pagination::resolve(Some("99"), 13).page, 3);
        assert_eq!(Pagination::resolve(Some("abc"), 13).page, 1);
        assert_eq!(Pagination::resolve(Some("0"), 13).page, 1);
        let empty = Pagination::resolve(None, 0);
        assert_eq!((empty.page, empty.page_count), (1, 1));
    }
}
