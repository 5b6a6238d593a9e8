//! Cart persistence: add/remove, views and the login-time merge.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::{debug, info};
use uuid::Uuid;

use super::{lock_owner, EventPublisher, ItemScope};
use crate::domain::aggregates::cart::{evaluate_add, plan_merge, AddDecision, CartItem, CartLine, CartView, MergeStep};
use crate::domain::aggregates::product::{Product, ProductVariant, StockLevel};
use crate::domain::events::{CartEvent, DomainEvent};
use crate::domain::value_objects::{CartOwner, Money, VariantSet};
use crate::{Result, StoreError};

#[derive(FromRow)]
struct ItemRow {
    id: Uuid,
    product_id: Uuid,
    quantity: i32,
    variant_ids: Vec<Uuid>,
}

impl From<ItemRow> for CartItem {
    fn from(row: ItemRow) -> Self {
        CartItem { id: row.id, product_id: row.product_id, variants: VariantSet::new(row.variant_ids), quantity: row.quantity }
    }
}

#[derive(FromRow)]
struct LineRow {
    item_id: Uuid,
    product_id: Uuid,
    product_name: String,
    product_slug: String,
    quantity: i32,
    display_price: Decimal,
}

#[derive(FromRow)]
struct ItemVariantRow {
    cart_item_id: Uuid,
    #[sqlx(flatten)]
    variant: ProductVariant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub combined: usize,
    pub reassigned: usize,
}

/// Where the owner's items live, if anywhere yet.
pub(crate) async fn find_scope(conn: &mut PgConnection, owner: &CartOwner) -> Result<Option<ItemScope>> {
    match owner {
        CartOwner::User(id) => Ok(Some(ItemScope::User(*id))),
        CartOwner::Session(key) => {
            let cart_id: Option<Uuid> = sqlx::query_scalar("SELECT id FROM carts WHERE session_key = $1")
                .bind(key)
                .fetch_optional(&mut *conn)
                .await?;
            Ok(cart_id.map(ItemScope::Cart))
        }
    }
}

async fn load_items(conn: &mut PgConnection, scope: ItemScope, product_id: Option<Uuid>) -> Result<Vec<CartItem>> {
    let rows = sqlx::query_as::<_, ItemRow>(&format!(
        r#"
        SELECT ci.id, ci.product_id, ci.quantity,
               COALESCE(array_agg(civ.variant_id) FILTER (WHERE civ.variant_id IS NOT NULL), '{{}}'::uuid[]) AS variant_ids
        FROM cart_items ci
        LEFT JOIN cart_item_variants civ ON civ.cart_item_id = ci.id
        WHERE ci.{} = $1 AND ci.is_active AND ($2::uuid IS NULL OR ci.product_id = $2)
        GROUP BY ci.id
        ORDER BY ci.created_at, ci.id
        "#,
        scope.column()
    ))
    .bind(scope.id())
    .bind(product_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(CartItem::from).collect())
}

/// Active items of a scope joined with product and variant data.
pub(crate) async fn load_lines(conn: &mut PgConnection, scope: ItemScope) -> Result<Vec<CartLine>> {
    let rows = sqlx::query_as::<_, LineRow>(&format!(
        r#"
        SELECT ci.id AS item_id, ci.product_id, p.name AS product_name, p.slug AS product_slug, ci.quantity,
               COALESCE(dv.price, 0) AS display_price
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        LEFT JOIN LATERAL (
            SELECT v.price FROM product_variants v
            WHERE v.product_id = p.id AND v.is_active
            ORDER BY v.price
            LIMIT 1
        ) dv ON TRUE
        WHERE ci.{} = $1 AND ci.is_active
        ORDER BY ci.created_at, ci.id
        "#,
        scope.column()
    ))
    .bind(scope.id())
    .fetch_all(&mut *conn)
    .await?;

    let item_ids: Vec<Uuid> = rows.iter().map(|r| r.item_id).collect();
    let attached = sqlx::query_as::<_, ItemVariantRow>(
        r#"
        SELECT civ.cart_item_id, v.id, v.product_id, v.size_label, v.price, v.stock, v.is_active
        FROM cart_item_variants civ
        JOIN product_variants v ON v.id = civ.variant_id
        WHERE civ.cart_item_id = ANY($1)
        "#,
    )
    .bind(&item_ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_item: HashMap<Uuid, Vec<ProductVariant>> = HashMap::new();
    for row in attached {
        by_item.entry(row.cart_item_id).or_default().push(row.variant);
    }

    Ok(rows
        .into_iter()
        .map(|r| {
            let variants = by_item.remove(&r.item_id).unwrap_or_default();
            CartLine::new(r.item_id, r.product_id, r.product_name, r.product_slug, r.quantity, variants, Money::new(r.display_price))
        })
        .collect())
}

async fn ensure_product(conn: &mut PgConnection, product_id: Uuid) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM products WHERE id = $1)")
        .bind(product_id)
        .fetch_one(&mut *conn)
        .await?;
    if exists { Ok(()) } else { Err(StoreError::NotFound("product")) }
}

#[derive(Clone)]
pub struct PgCartService {
    pool: PgPool,
    events: EventPublisher,
}

impl PgCartService {
    pub fn new(pool: PgPool, events: EventPublisher) -> Self { Self { pool, events } }

    /// Add `quantity` units of a product (optionally one of its variants) to the owner's cart.
    pub async fn add_item(
        &self,
        owner: &CartOwner,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        quantity: i32,
    ) -> Result<CartItem> {
        let mut tx = self.pool.begin().await?;
        lock_owner(&mut *tx, owner).await?;

        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("product"))?;

        let variant = match variant_id {
            Some(id) => {
                sqlx::query_as::<_, ProductVariant>("SELECT * FROM product_variants WHERE id = $1 AND product_id = $2")
                .bind(id)
                .bind(product.id)
                .fetch_optional(&mut *tx)
                .await?
            }
            None => None,
        };
        if variant_id.is_some() && variant.is_none() {
            debug!(%product_id, ?variant_id, "variant does not belong to product, ignoring it");
        }

        let stock = variant.as_ref().map(StockLevel::of_variant).unwrap_or_else(|| StockLevel::of_product(&product));
        let requested: VariantSet = variant.iter().map(|v| v.id).collect();

        let scope = find_scope(&mut *tx, owner).await?;
        let existing = match scope {
            Some(scope) => load_items(&mut *tx, scope, Some(product.id)).await?,
            None => Vec::new(),
        };

        let item = match evaluate_add(&existing, &requested, quantity, &stock)? {
            AddDecision::Increment { item_id, quantity } => {
                sqlx::query("UPDATE cart_items SET quantity = $2 WHERE id = $1")
                    .bind(item_id)
                    .bind(quantity)
                    .execute(&mut *tx)
                    .await?;
                CartItem { id: item_id, product_id: product.id, variants: requested, quantity }
            }
            AddDecision::Create { quantity } => {
                let scope = match scope {
                    Some(scope) => scope,
                    None => self.open_cart(&mut *tx, owner).await?,
                };
                let item_id = Uuid::now_v7();
                let (user_id, cart_id) = match scope {
                    ItemScope::User(id) => (Some(id), None),
                    ItemScope::Cart(id) => (None, Some(id)),
                };
                sqlx::query(
                    "INSERT INTO cart_items (id, user_id, cart_id, product_id, quantity) VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(item_id)
                .bind(user_id)
                .bind(cart_id)
                .bind(product.id)
                .bind(quantity)
                .execute(&mut *tx)
                .await?;
                sqlx::query(
                    "INSERT INTO cart_item_variants (cart_item_id, variant_id) SELECT $1, UNNEST($2::uuid[]) ON CONFLICT DO NOTHING",
                )
                .bind(item_id)
                .bind(requested.ids())
                .execute(&mut *tx)
                .await?;
                CartItem { id: item_id, product_id: product.id, variants: requested, quantity }
            }
        };

        tx.commit().await?;
        info!(owner = %owner.lock_key(), %product_id, quantity = item.quantity, "cart item saved");
        Ok(item)
    }

    /// A guest's Cart row, created on first add.
    async fn open_cart(&self, conn: &mut PgConnection, owner: &CartOwner) -> Result<ItemScope> {
        match owner {
            CartOwner::User(id) => Ok(ItemScope::User(*id)),
            CartOwner::Session(key) => {
                let cart_id: Uuid = sqlx::query_scalar(
                    r#"
                    INSERT INTO carts (id, session_key) VALUES ($1, $2)
                    ON CONFLICT (session_key) DO UPDATE SET session_key = EXCLUDED.session_key
                    RETURNING id
                    "#,
                )
                .bind(Uuid::now_v7())
                .bind(key)
                .fetch_one(&mut *conn)
                .await?;
                Ok(ItemScope::Cart(cart_id))
            }
        }
    }

    /// Take one unit off an item, deleting it at one. Missing or foreign items are ignored.
    pub async fn remove_one(&self, owner: &CartOwner, product_id: Uuid, item_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        lock_owner(&mut *tx, owner).await?;
        ensure_product(&mut *tx, product_id).await?;
        let Some(scope) = find_scope(&mut *tx, owner).await? else { return Ok(()) };

        let column = scope.column();
        let decremented = sqlx::query(&format!(
            "UPDATE cart_items SET quantity = quantity - 1 WHERE id = $1 AND product_id = $2 AND {column} = $3 AND quantity > 1"
        ))
        .bind(item_id)
        .bind(product_id)
        .bind(scope.id())
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if decremented == 0 {
            sqlx::query(&format!("DELETE FROM cart_items WHERE id = $1 AND product_id = $2 AND {column} = $3"))
                .bind(item_id)
                .bind(product_id)
                .bind(scope.id())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Delete an item outright. Missing or foreign items are ignored.
    pub async fn remove_item(&self, owner: &CartOwner, product_id: Uuid, item_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        lock_owner(&mut *tx, owner).await?;
        ensure_product(&mut *tx, product_id).await?;
        if let Some(scope) = find_scope(&mut *tx, owner).await? {
            sqlx::query(&format!(
                "DELETE FROM cart_items WHERE id = $1 AND product_id = $2 AND {} = $3",
                scope.column()
            ))
            .bind(item_id)
            .bind(product_id)
            .bind(scope.id())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn view(&self, owner: &CartOwner) -> Result<CartView> {
        let mut conn = self.pool.acquire().await?;
        let lines = match find_scope(&mut conn, owner).await? {
            Some(scope) => load_lines(&mut conn, scope).await?,
            None => Vec::new(),
        };
        Ok(CartView::of(lines))
    }

    pub async fn count(&self, owner: &CartOwner) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        let Some(scope) = find_scope(&mut conn, owner).await? else { return Ok(0) };
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COALESCE(SUM(quantity), 0)::BIGINT FROM cart_items WHERE {} = $1 AND is_active",
            scope.column()
        ))
        .bind(scope.id())
        .fetch_one(&mut *conn)
        .await?;
        Ok(count)
    }

    pub async fn checkout_preview(&self, user_id: Uuid) -> Result<CartView> {
        let view = self.view(&CartOwner::User(user_id)).await?;
        if view.is_empty() {
            return Err(StoreError::EmptyCart);
        }
        Ok(view)
    }

    /// Fold the guest cart for `session_key` into the user's cart and delete it.
    pub async fn merge_guest_cart(&self, session_key: &str, user_id: Uuid) -> Result<MergeSummary> {
        let guest_owner = CartOwner::Session(session_key.to_string());
        let user_owner = CartOwner::User(user_id);

        let mut tx = self.pool.begin().await?;
        lock_owner(&mut *tx, &user_owner).await?;
        lock_owner(&mut *tx, &guest_owner).await?;

        let Some(guest_scope) = find_scope(&mut *tx, &guest_owner).await? else {
            return Ok(MergeSummary::default());
        };
        let guest = load_items(&mut *tx, guest_scope, None).await?;
        let user = load_items(&mut *tx, ItemScope::User(user_id), None).await?;

        let mut summary = MergeSummary::default();
        for step in plan_merge(&guest, &user) {
            match step {
                MergeStep::Combine { guest_item, user_item, quantity } => {
                    sqlx::query("UPDATE cart_items SET quantity = $2 WHERE id = $1")
                        .bind(user_item)
                        .bind(quantity)
                        .execute(&mut *tx)
                        .await?;
                    sqlx::query("DELETE FROM cart_items WHERE id = $1")
                        .bind(guest_item)
                        .execute(&mut *tx)
                        .await?;
                    summary.combined += 1;
                }
                MergeStep::Reassign { guest_item } => {
                    sqlx::query("UPDATE cart_items SET user_id = $2, cart_id = NULL WHERE id = $1")
                        .bind(guest_item)
                        .bind(user_id)
                        .execute(&mut *tx)
                        .await?;
                    summary.reassigned += 1;
                }
            }
        }

        sqlx::query("DELETE FROM carts WHERE id = $1")
            .bind(guest_scope.id())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(%user_id, combined = summary.combined, reassigned = summary.reassigned, "guest cart merged");
        self.events
            .publish(DomainEvent::Cart(CartEvent::Merged { user_id, combined: summary.combined, reassigned: summary.reassigned }))
            .await;
        Ok(summary)
    }
}
