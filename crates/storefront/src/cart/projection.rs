//! Cart Projection: the client-facing view of a cart.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use cartwright_core::{CartId, LineItemId, ProductId, VariantId};

use super::catalog::ProductSummary;
use crate::models::{Cart, LineItem, total_quantity};

/// Title shown for lines whose product left the catalog.
pub const UNAVAILABLE_TITLE: &str = "Product unavailable";

/// Variant title the catalog uses for single-variant products.
const DEFAULT_VARIANT_TITLE: &str = "Default Title";

/// One line of a cart, annotated with catalog display data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItemView {
    pub id: LineItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
    pub handle: Option<String>,
    pub title: String,
    pub variant_title: Option<String>,
    pub image_url: Option<String>,
    /// False when the product is no longer in the catalog.
    pub available: bool,
}

/// A cart as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartView {
    /// `None` until the owner's cart has been created.
    pub cart_id: Option<CartId>,
    /// `"anonymous"`, `"authenticated"`, or `None` for the empty view.
    pub owner: Option<String>,
    pub items: Vec<CartItemView>,
    pub line_count: usize,
    pub total_item_count: u64,
}

impl CartView {
    /// View of an owner that has no cart yet.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            cart_id: None,
            owner: None,
            items: Vec::new(),
            line_count: 0,
            total_item_count: 0,
        }
    }

    /// Quantity of the line for `(product, variant)`, or zero.
    #[must_use]
    pub fn quantity_of(&self, product_id: ProductId, variant_id: Option<VariantId>) -> u32 {
        self.items
            .iter()
            .find(|item| item.product_id == product_id && item.variant_id == variant_id)
            .map_or(0, |item| item.quantity)
    }
}

/// Render `cart` and its lines using catalog display data.
///
/// Lines keep their storage order. Lines whose product is missing from
/// `products` are still shown, marked unavailable.
#[must_use]
pub fn project(cart: &Cart, items: &[LineItem], products: &[ProductSummary]) -> CartView {
    let by_id: HashMap<ProductId, &ProductSummary> =
        products.iter().map(|product| (product.id, product)).collect();

    CartView {
        cart_id: Some(cart.id),
        owner: Some(cart.owner.kind().to_owned()),
        items: items
            .iter()
            .map(|item| item_view(item, by_id.get(&item.product_id).copied()))
            .collect(),
        line_count: items.len(),
        total_item_count: total_quantity(items),
    }
}

fn item_view(item: &LineItem, product: Option<&ProductSummary>) -> CartItemView {
    let variant_id = item.variant_id();

    let Some(product) = product else {
        return CartItemView {
            id: item.id,
            product_id: item.product_id,
            variant_id,
            quantity: item.quantity.get(),
            handle: None,
            title: UNAVAILABLE_TITLE.to_owned(),
            variant_title: None,
            image_url: None,
            available: false,
        };
    };

    let variant_title = variant_id
        .and_then(|id| product.variant(id))
        .map(|variant| variant.title.as_str())
        .filter(|title| *title != DEFAULT_VARIANT_TITLE)
        .map(str::to_owned);

    CartItemView {
        id: item.id,
        product_id: item.product_id,
        variant_id,
        quantity: item.quantity.get(),
        handle: Some(product.handle.clone()),
        title: product.title.clone(),
        variant_title,
        image_url: product.image_url.clone(),
        available: true,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use cartwright_core::{AnonymousSessionId, CartOwner, Quantity, UserId, VariantKey};

    use super::*;
    use crate::cart::catalog::VariantSummary;

    fn cart(owner: CartOwner) -> Cart {
        Cart {
            id: CartId::new(3),
            owner,
            created_at: Utc::now(),
        }
    }

    fn line(id: i32, product: i32, variant: Option<i32>, quantity: i64) -> LineItem {
        LineItem {
            id: LineItemId::new(id),
            cart_id: CartId::new(3),
            product_id: ProductId::new(product),
            variant: VariantKey::try_from(variant.map(VariantId::new)).unwrap(),
            quantity: Quantity::new(quantity).unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn products() -> Vec<ProductSummary> {
        vec![ProductSummary {
            id: ProductId::new(1),
            handle: "linen-shirt".to_owned(),
            title: "Linen Shirt".to_owned(),
            image_url: Some("https://cdn.example.com/shirt.jpg".to_owned()),
            variants: vec![
                VariantSummary {
                    id: VariantId::new(10),
                    title: "Large".to_owned(),
                },
                VariantSummary {
                    id: VariantId::new(11),
                    title: DEFAULT_VARIANT_TITLE.to_owned(),
                },
            ],
        }]
    }

    #[test]
    fn test_project_annotates_and_totals() {
        let items = [line(1, 1, Some(10), 2), line(2, 1, None, 3)];
        let view = project(
            &cart(CartOwner::Authenticated(UserId::new(8))),
            &items,
            &products(),
        );

        assert_eq!(view.cart_id, Some(CartId::new(3)));
        assert_eq!(view.owner.as_deref(), Some("authenticated"));
        assert_eq!(view.line_count, 2);
        assert_eq!(view.total_item_count, 5);

        let large = &view.items[0];
        assert_eq!(large.variant_title.as_deref(), Some("Large"));
        assert_eq!(large.handle.as_deref(), Some("linen-shirt"));
        assert!(large.available);
        assert_eq!(view.items[1].variant_id, None);
        assert_eq!(view.quantity_of(ProductId::new(1), Some(VariantId::new(10))), 2);
        assert_eq!(view.quantity_of(ProductId::new(1), None), 3);
        assert_eq!(view.quantity_of(ProductId::new(2), None), 0);
    }

    #[test]
    fn test_default_variant_title_is_hidden() {
        let items = [line(1, 1, Some(11), 1)];
        let owner = CartOwner::Anonymous(AnonymousSessionId::parse("browser-1").unwrap());
        let view = project(&cart(owner), &items, &products());

        assert_eq!(view.owner.as_deref(), Some("anonymous"));
        assert_eq!(view.items[0].variant_title, None);
    }

    #[test]
    fn test_missing_product_is_unavailable() {
        let items = [line(1, 99, None, 4)];
        let view = project(
            &cart(CartOwner::Authenticated(UserId::new(8))),
            &items,
            &products(),
        );

        let item = &view.items[0];
        assert!(!item.available);
        assert_eq!(item.title, UNAVAILABLE_TITLE);
        assert_eq!(item.handle, None);
        assert_eq!(view.total_item_count, 4);
    }

    #[test]
    fn test_empty_view_serializes_nulls() {
        let json = serde_json::to_value(CartView::empty()).unwrap();
        assert_eq!(json["cart_id"], serde_json::Value::Null);
        assert_eq!(json["owner"], serde_json::Value::Null);
        assert_eq!(json["line_count"], 0);
        assert_eq!(json["total_item_count"], 0);
        assert_eq!(json["items"], serde_json::json!([]));
    }
}
