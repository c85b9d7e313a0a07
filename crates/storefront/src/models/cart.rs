//! Cart domain types.
//!
//! These types represent validated domain objects separate from database row types.

use chrono::{DateTime, Utc};

use cartwright_core::{CartId, CartOwner, LineItemId, ProductId, Quantity, VariantId, VariantKey};

/// A shopping cart (domain type).
///
/// At most one live cart exists per owner. Anonymous carts are retired when
/// they are merged into an authenticated cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    /// Unique cart ID.
    pub id: CartId,
    /// Who the cart belongs to.
    pub owner: CartOwner,
    /// When the cart was created.
    pub created_at: DateTime<Utc>,
}

/// One product/variant entry in a cart (domain type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    /// Unique line item ID.
    pub id: LineItemId,
    /// Cart this line belongs to.
    pub cart_id: CartId,
    /// Catalog product.
    pub product_id: ProductId,
    /// Normalized variant ("no variant" is a value).
    pub variant: VariantKey,
    /// Always at least one; a line driven to zero is deleted.
    pub quantity: Quantity,
    /// When the line was first added.
    pub created_at: DateTime<Utc>,
    /// When the quantity last changed.
    pub updated_at: DateTime<Utc>,
}

impl LineItem {
    /// The catalog variant, if the line has one.
    #[must_use]
    pub const fn variant_id(&self) -> Option<VariantId> {
        self.variant.variant()
    }
}

/// Sum of quantities across lines.
#[must_use]
pub fn total_quantity(items: &[LineItem]) -> u64 {
    items.iter().map(|item| u64::from(item.quantity.get())).sum()
}
