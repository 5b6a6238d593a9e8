//! Catalog queries

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use crate::domain::aggregates::product::{
    display_price, display_size, Category, Pagination, Product, ProductCard, ProductVariant, HOME_PICKS,
};
use crate::domain::value_objects::Money;
use crate::{Result, StoreError};

/// Card columns; display price and size come from the cheapest active variant.
const CARD_SELECT: &str = r#"
    SELECT p.id, p.name, p.slug, c.slug AS category_slug, b.name AS brand_name, p.image,
           COALESCE(dv.price, 0) AS display_price,
           COALESCE(dv.size_label, 'N/A') AS display_size,
           p.created_at
    FROM products p
    JOIN categories c ON c.id = p.category_id
    JOIN brands b ON b.id = p.brand_id
    LEFT JOIN LATERAL (
        SELECT v.price, v.size_label
        FROM product_variants v
        WHERE v.product_id = p.id AND v.is_active
        ORDER BY v.price
        LIMIT 1
    ) dv ON TRUE
"#;

#[derive(Debug, Serialize)]
pub struct ProductListing {
    pub heading: String,
    pub products: Vec<ProductCard>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct ProductDetail {
    pub product: Product,
    pub category: Category,
    pub display_price: Money,
    pub display_size: String,
    pub variants: Vec<ProductVariant>,
}

#[derive(Debug, Default, Clone)]
pub struct SearchFilter {
    pub keyword: Option<String>,
    pub brand: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
}

impl SearchFilter {
    fn keyword(&self) -> Option<&str> {
        self.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
    fn brand(&self) -> Option<&str> {
        self.brand.as_deref().map(str::trim).filter(|b| !b.is_empty())
    }
    fn is_empty(&self) -> bool {
        self.keyword().is_none() && self.brand().is_none() && self.min_price.is_none() && self.max_price.is_none()
    }
    fn heading(&self) -> String {
        match self.keyword() {
            Some(keyword) => format!("Search results for: '{keyword}'"),
            None => "All Products".to_string(),
        }
    }

    fn push_conditions(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" WHERE p.available");
        if let Some(keyword) = self.keyword() {
            let pattern = format!("%{keyword}%");
            qb.push(" AND (p.name ILIKE ").push_bind(pattern.clone())
                .push(" OR p.description ILIKE ").push_bind(pattern.clone())
                .push(" OR c.name ILIKE ").push_bind(pattern)
                .push(")");
        }
        if let Some(brand) = self.brand() {
            qb.push(" AND b.name ILIKE ").push_bind(brand.to_string());
        }
        if let Some(min) = self.min_price {
            qb.push(" AND COALESCE(dv.price, 0) >= ").push_bind(min);
        }
        if let Some(max) = self.max_price {
            qb.push(" AND COALESCE(dv.price, 0) <= ").push_bind(max);
        }
    }
}

#[derive(Clone)]
pub struct CatalogRepository {
    pool: PgPool,
}

impl CatalogRepository {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn list_categories(&self) -> Result<Vec<Category>> {
        let categories = sqlx::query_as::<_, Category>("SELECT id, name, slug, parent_id FROM categories ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(categories)
    }

    async fn category_by_slug(&self, slug: &str) -> Result<Option<Category>> {
        let category = sqlx::query_as::<_, Category>("SELECT id, name, slug, parent_id FROM categories WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(category)
    }

    /// Available products of a category and its direct children, or of the
    /// whole store when no slug is given.
    pub async fn browse(&self, category_slug: Option<&str>, page: Option<&str>) -> Result<ProductListing> {
        let (heading, category_id) = match category_slug {
            Some(slug) => {
                let category = self.category_by_slug(slug).await?.ok_or(StoreError::NotFound("category"))?;
                (category.name, Some(category.id))
            }
            None => ("All Products".to_string(), None),
        };

        let scope = "(p.category_id = $1 OR c.parent_id = $1)";
        let total: i64 = match category_id {
            Some(id) => {
                sqlx::query_scalar(&format!(
                    "SELECT COUNT(*) FROM products p JOIN categories c ON c.id = p.category_id WHERE p.available AND {scope}"
                ))
                .bind(id)
                .fetch_one(&self.pool)
                .await?
            }
            None => sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE available").fetch_one(&self.pool).await?,
        };
        let pagination = Pagination::resolve(page, total);

        let products = match category_id {
            Some(id) => {
                sqlx::query_as::<_, ProductCard>(&format!(
                    "{CARD_SELECT} WHERE p.available AND {scope} ORDER BY p.created_at DESC LIMIT $2 OFFSET $3"
                ))
                .bind(id)
                .bind(pagination.limit())
                .bind(pagination.offset())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ProductCard>(&format!(
                    "{CARD_SELECT} WHERE p.available ORDER BY p.created_at DESC LIMIT $1 OFFSET $2"
                ))
                .bind(pagination.limit())
                .bind(pagination.offset())
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(ProductListing { heading, products, pagination })
    }

    pub async fn product_detail(&self, category_slug: &str, product_slug: &str) -> Result<ProductDetail> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT p.*
            FROM products p
            JOIN categories c ON c.id = p.category_id
            WHERE c.slug = $1 AND p.slug = $2 AND p.available
            "#,
        )
        .bind(category_slug)
        .bind(product_slug)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("product"))?;

        let category = sqlx::query_as::<_, Category>("SELECT id, name, slug, parent_id FROM categories WHERE id = $1")
            .bind(product.category_id)
            .fetch_one(&self.pool)
            .await?;

        let variants = sqlx::query_as::<_, ProductVariant>(
            "SELECT * FROM product_variants WHERE product_id = $1 AND is_active ORDER BY price, size_label",
        )
        .bind(product.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ProductDetail {
            display_price: display_price(&variants),
            display_size: display_size(&variants),
            product,
            category,
            variants,
        })
    }

    pub async fn search(&self, filter: &SearchFilter, page: Option<&str>) -> Result<ProductListing> {
        let heading = filter.heading();

        let mut count = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM ({CARD_SELECT}"));
        filter.push_conditions(&mut count);
        count.push(") matches");
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;
        let pagination = Pagination::resolve(page, total);

        let mut select = QueryBuilder::<Postgres>::new(CARD_SELECT);
        filter.push_conditions(&mut select);
        select
            .push(" ORDER BY p.created_at DESC LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());
        let products = select.build_query_as::<ProductCard>().fetch_all(&self.pool).await?;

        if filter.is_empty() {
            info!(total, "search without filters, listing all products");
        }
        Ok(ProductListing { heading, products, pagination })
    }

    /// Up to four picks for a parent category: the newest product of each
    /// child first, then the newest remaining products across the family.
    pub async fn home_picks(&self, parent_slug: &str) -> Result<Vec<ProductCard>> {
        let Some(parent) = self.category_by_slug(parent_slug).await? else {
            return Ok(Vec::new());
        };

        let children = sqlx::query_as::<_, Category>(
            "SELECT id, name, slug, parent_id FROM categories WHERE parent_id = $1 ORDER BY name",
        )
        .bind(parent.id)
        .fetch_all(&self.pool)
        .await?;

        let mut picks: Vec<ProductCard> = Vec::with_capacity(HOME_PICKS);
        for child in &children {
            if picks.len() >= HOME_PICKS { break; }
            let newest = sqlx::query_as::<_, ProductCard>(&format!(
                "{CARD_SELECT} WHERE p.available AND p.category_id = $1 ORDER BY p.created_at DESC LIMIT 1"
            ))
            .bind(child.id)
            .fetch_optional(&self.pool)
            .await?;
            picks.extend(newest);
        }

        if picks.len() < HOME_PICKS {
            let picked: Vec<Uuid> = picks.iter().map(|p| p.id).collect();
            let extras = sqlx::query_as::<_, ProductCard>(&format!(
                r#"{CARD_SELECT}
                WHERE p.available
                  AND (p.category_id = $1 OR c.parent_id = $1)
                  AND NOT (p.id = ANY($2))
                ORDER BY p.created_at DESC
                LIMIT $3"#
            ))
            .bind(parent.id)
            .bind(&picked)
            .bind((HOME_PICKS - picks.len()) as i64)
            .fetch_all(&self.pool)
            .await?;
            picks.extend(extras);
        }

        Ok(picks)
    }

    /// Set each product's own stock to the sum of its variants' stock.
    pub async fn sync_product_stock(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE products p
            SET stock = totals.stock, updated_at = NOW()
            FROM (
                SELECT product_id, SUM(stock)::INTEGER AS stock
                FROM product_variants
                GROUP BY product_id
            ) totals
            WHERE p.id = totals.product_id
            "#,
        )
        .execute(&self.pool)
        .await?;
        info!(updated = result.rows_affected(), "product stock synced from variants");
        Ok(result.rows_affected())
    }

    /// Delete a product together with the variants it owns.
    pub async fn delete_product(&self, product_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let variants = sqlx::query("DELETE FROM product_variants WHERE product_id = $1")
            .bind(product_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let deleted = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(product_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(StoreError::NotFound("product"));
        }
        tx.commit().await?;
        info!(%product_id, variants, "product deleted");
        Ok(())
    }
}
