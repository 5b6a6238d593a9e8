//! Cart Aggregate

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;
use crate::domain::aggregates::product::{ProductVariant, StockLevel};
use crate::domain::value_objects::{Money, VariantSet};

/// Most units of one variant a single cart may hold.
pub const HOARDING_LIMIT: i32 = 5;

/// A cart item as seen by the add and merge policies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CartItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variants: VariantSet,
    pub quantity: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddDecision {
    Increment { item_id: Uuid, quantity: i32 },
    Create { quantity: i32 },
}

/// Which cap a rejected add ran into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuantityLimit {
    Stock(i32),
    Hoarding(i32),
}

impl QuantityLimit {
    fn for_stock(available: i32) -> Self {
        if available < HOARDING_LIMIT { Self::Stock(available) } else { Self::Hoarding(HOARDING_LIMIT) }
    }
    pub fn cap(&self) -> i32 {
        match self { Self::Stock(n) | Self::Hoarding(n) => *n }
    }
}

impl std::fmt::Display for QuantityLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stock(n) => write!(f, "Quantity exceeded available stock. Please select {n} items or less."),
            Self::Hoarding(n) => write!(f, "To avoid hoarding, you can only order {n} items of the same variant."),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CartError {
    #[error("Quantity must be at least 1, got {0}")]
    InvalidQuantity(i32),
    #[error("This {label} is currently out of stock.")]
    OutOfStock { label: String },
    #[error("{0}")]
    QuantityExceeded(QuantityLimit),
}

/// Decide how a request to add `quantity` units with `requested` variants
/// applies to the owner's existing items for the same product.
pub fn evaluate_add(
    existing: &[CartItem],
    requested: &VariantSet,
    quantity: i32,
    stock: &StockLevel,
) -> Result<AddDecision, CartError> {
    if quantity <= 0 { return Err(CartError::InvalidQuantity(quantity)); }
    if stock.is_empty() { return Err(CartError::OutOfStock { label: stock.label.clone() }); }

    let limit = QuantityLimit::for_stock(stock.available);
    match existing.iter().find(|item| &item.variants == requested) {
        Some(item) => {
            let future = item.quantity + quantity;
            if future > limit.cap() { return Err(CartError::QuantityExceeded(limit)); }
            Ok(AddDecision::Increment { item_id: item.id, quantity: future })
        }
        None => {
            if quantity > limit.cap() { return Err(CartError::QuantityExceeded(limit)); }
            Ok(AddDecision::Create { quantity })
        }
    }
}

/// A cart item joined with the catalog data needed to price it.
#[derive(Clone, Debug, Serialize)]
pub struct CartLine {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub product_slug: String,
    pub quantity: i32,
    pub variants: Vec<ProductVariant>,
    #[serde(skip)]
    pub display_price: Money,
}

impl CartLine {
    pub fn new(
        item_id: Uuid,
        product_id: Uuid,
        product_name: String,
        product_slug: String,
        quantity: i32,
        mut variants: Vec<ProductVariant>,
        display_price: Money,
    ) -> Self {
        variants.sort_by_key(|v| v.id);
        Self { item_id, product_id, product_name, product_slug, quantity, variants, display_price }
    }

    /// The variant that prices the line. Only one meaningful variant per item is assumed.
    pub fn primary_variant(&self) -> Option<&ProductVariant> { self.variants.first() }

    pub fn variant_set(&self) -> VariantSet { self.variants.iter().map(|v| v.id).collect() }

    pub fn unit_price(&self) -> Money {
        self.primary_variant().map(|v| v.price).unwrap_or(self.display_price)
    }

    pub fn sub_total(&self) -> Money { self.unit_price().multiply(self.quantity) }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CartTotals {
    pub sub_total: Money,
    pub grand_total: Money,
    pub quantity: i32,
}

pub fn totals(lines: &[CartLine]) -> CartTotals {
    let sub_total: Money = lines.iter().map(CartLine::sub_total).sum();
    CartTotals { sub_total, grand_total: sub_total, quantity: lines.iter().map(|l| l.quantity).sum() }
}

#[derive(Clone, Debug, Serialize)]
pub struct PricedLine {
    #[serde(flatten)]
    pub line: CartLine,
    pub unit_price: Money,
    pub sub_total: Money,
}

/// Cart contents as shown on the cart and checkout pages.
#[derive(Clone, Debug, Serialize)]
pub struct CartView {
    pub items: Vec<PricedLine>,
    #[serde(flatten)]
    pub totals: CartTotals,
}

impl CartView {
    pub fn of(lines: Vec<CartLine>) -> Self {
        let totals = totals(&lines);
        let items = lines
            .into_iter()
            .map(|line| PricedLine { unit_price: line.unit_price(), sub_total: line.sub_total(), line })
            .collect();
        Self { items, totals }
    }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
}

/// One step of folding a guest cart into a user's cart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeStep {
    /// Add the guest quantity onto a user item (`quantity` is the new total) and drop the guest item.
    Combine { guest_item: Uuid, user_item: Uuid, quantity: i32 },
    /// Hand the guest item over to the user.
    Reassign { guest_item: Uuid },
}

/// Plan the login-time merge. Items match on product and variant set; a guest
/// item reassigned earlier in the plan can absorb later duplicates.
pub fn plan_merge(guest: &[CartItem], user: &[CartItem]) -> Vec<MergeStep> {
    let mut owned: Vec<CartItem> = user.to_vec();
    let mut steps = Vec::with_capacity(guest.len());
    for item in guest {
        let target = owned.iter_mut().find(|u| u.product_id == item.product_id && u.variants == item.variants);
        match target {
            Some(existing) => {
                existing.quantity += item.quantity;
                steps.push(MergeStep::Combine { guest_item: item.id, user_item: existing.id, quantity: existing.quantity });
            }
            None => {
                owned.push(item.clone());
                steps.push(MergeStep::Reassign { guest_item: item.id });
            }
        }
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn stock(n: i32) -> StockLevel { StockLevel { available: n, label: "250ml".into() } }

    fn item(product_id: Uuid, variants: &[Uuid], quantity: i32) -> CartItem {
        CartItem { id: Uuid::now_v7(), product_id, variants: VariantSet::new(variants.iter().copied()), quantity }
    }

    fn variant(price: rust_decimal::Decimal) -> ProductVariant {
        ProductVariant { id: Uuid::now_v7(), product_id: Uuid::nil(), size_label: "250ml".into(), price: Money::new(price), stock: 10, is_active: true }
    }

    #[test]
    fn test_out_of_stock_creates_nothing() {
        let err = evaluate_add(&[], &VariantSet::empty(), 1, &stock(0)).unwrap_err();
        assert_eq!(err, CartError::OutOfStock { label: "250ml".into() });
        assert_eq!(err.to_string(), "This 250ml is currently out of stock.");
    }

    #[test]
    fn test_stock_constrained_scenario() {
        let product = Uuid::now_v7();
        let v = Uuid::now_v7();
        let requested = VariantSet::new([v]);
        assert_eq!(evaluate_add(&[], &requested, 2, &stock(3)).unwrap(), AddDecision::Create { quantity: 2 });

        let existing = vec![item(product, &[v], 2)];
        let err = evaluate_add(&existing, &requested, 2, &stock(3)).unwrap_err();
        assert_eq!(err, CartError::QuantityExceeded(QuantityLimit::Stock(3)));
        assert_eq!(err.to_string(), "Quantity exceeded available stock. Please select 3 items or less.");
    }

    #[test]
    fn test_hoarding_constrained() {
        let product = Uuid::now_v7();
        let existing = vec![item(product, &[], 4)];
        let err = evaluate_add(&existing, &VariantSet::empty(), 2, &stock(40)).unwrap_err();
        assert_eq!(err.to_string(), "To avoid hoarding, you can only order 5 items of the same variant.");
        let ok = evaluate_add(&existing, &VariantSet::empty(), 1, &stock(40)).unwrap();
        assert_eq!(ok, AddDecision::Increment { item_id: existing[0].id, quantity: 5 });
    }

    #[test]
    fn test_new_quantity_checked_alone() {
        let err = evaluate_add(&[], &VariantSet::empty(), 6, &stock(40)).unwrap_err();
        assert_eq!(err, CartError::QuantityExceeded(QuantityLimit::Hoarding(5)));
        assert_eq!(evaluate_add(&[], &VariantSet::empty(), 0, &stock(4)), Err(CartError::InvalidQuantity(0)));
    }

    #[test]
    fn test_different_variant_is_a_new_item() {
        let product = Uuid::now_v7();
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let existing = vec![item(product, &[a], 5)];
        let decision = evaluate_add(&existing, &VariantSet::new([b]), 3, &stock(10)).unwrap();
        assert_eq!(decision, AddDecision::Create { quantity: 3 });
    }

    #[test]
    fn test_variant_order_does_not_break_matching() {
        let product = Uuid::now_v7();
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let existing = vec![item(product, &[b, a], 1)];
        let decision = evaluate_add(&existing, &VariantSet::new([a, b]), 1, &stock(10)).unwrap();
        assert_eq!(decision, AddDecision::Increment { item_id: existing[0].id, quantity: 2 });
    }

    #[test]
    fn test_subtotals_and_totals() {
        let with_variant = CartLine::new(Uuid::now_v7(), Uuid::now_v7(), "Oil".into(), "oil".into(), 2, vec![variant(dec!(500))], Money::new(dec!(300)));
        let without = CartLine::new(Uuid::now_v7(), Uuid::now_v7(), "Soap".into(), "soap".into(), 3, vec![], Money::new(dec!(166.666)));
        assert_eq!(with_variant.sub_total().to_fixed(), "1000.00");
        assert_eq!(without.sub_total().amount(), dec!(499.998));

        let t = totals(&[with_variant, without]);
        assert_eq!(t.grand_total.to_fixed(), "1500.00");
        assert_eq!(t.quantity, 5);
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["sub_total"], "1500.00");
    }

    #[test]
    fn test_cart_view_prices_each_line() {
        let line = CartLine::new(Uuid::now_v7(), Uuid::now_v7(), "Oil".into(), "oil".into(), 3, vec![variant(dec!(250.5))], Money::new(dec!(100)));
        let view = CartView::of(vec![line]);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["items"][0]["product_name"], "Oil");
        assert_eq!(json["items"][0]["unit_price"], "250.50");
        assert_eq!(json["items"][0]["sub_total"], "751.50");
        assert_eq!(json["grand_total"], "751.50");
        assert_eq!(json["quantity"], 3);
        assert!(CartView::of(vec![]).is_empty());
    }

    #[test]
    fn test_merge_combines_and_reassigns() {
        let (p1, p2) = (Uuid::now_v7(), Uuid::now_v7());
        let v = Uuid::now_v7();
        let user = vec![item(p1, &[v], 2)];
        let guest = vec![item(p1, &[v], 1), item(p2, &[], 4), item(p1, &[], 1)];

        let steps = plan_merge(&guest, &user);
        assert_eq!(steps, vec![
            MergeStep::Combine { guest_item: guest[0].id, user_item: user[0].id, quantity: 3 },
            MergeStep::Reassign { guest_item: guest[1].id },
            MergeStep::Reassign { guest_item: guest[2].id },
        ]);
    }

    #[test]
    fn test_merge_collapses_duplicate_guest_items() {
        let p = Uuid::now_v7();
        let guest = vec![item(p, &[], 1), item(p, &[], 2)];
        let steps = plan_merge(&guest, &[]);
        assert_eq!(steps, vec![
            MergeStep::Reassign { guest_item: guest[0].id },
            MergeStep::Combine { guest_item: guest[1].id, user_item: guest[0].id, quantity: 3 },
        ]);
    }
}
