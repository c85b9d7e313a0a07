//! Line-Item Ledger: the lines of one cart.
//!
//! A cart holds at most one line per `(product, variant key)`. Adding an item
//! that already has a line increments it in one atomic storage step, so two
//! concurrent "add to cart" clicks always sum instead of overwriting each
//! other. Every operation is scoped to a cart: a line item id from another
//! cart is indistinguishable from a missing one.

use std::sync::Arc;

use tracing::instrument;

use cartwright_core::{CartId, LineItemId, ProductId, Quantity, VariantId, VariantKey};

use super::catalog::Catalog;
use super::error::{CartError, Result};
use super::store::CartTransaction;
use crate::models::LineItem;

/// An add request that passed [`Ledger::check_add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckedAdd {
    pub product_id: ProductId,
    pub variant: VariantKey,
    pub delta: Quantity,
}

/// Validated writes to cart lines.
#[derive(Clone)]
pub struct Ledger {
    catalog: Arc<dyn Catalog>,
}

impl Ledger {
    /// Create a ledger that validates products against `catalog`.
    #[must_use]
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Check an add request against the catalog.
    ///
    /// Call this before opening a storage transaction: catalog lookups take
    /// their own pooled connection.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` if the delta is not positive, the
    /// product does not exist, or the variant does not belong to the product.
    #[instrument(skip(self))]
    pub async fn check_add(
        &self,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        delta: i64,
    ) -> Result<CheckedAdd> {
        let delta = Quantity::new(delta)?;
        let variant = VariantKey::try_from(variant_id)?;
        self.validate_product(product_id, variant).await?;

        Ok(CheckedAdd {
            product_id,
            variant,
            delta,
        })
    }

    /// Add a checked item to a cart.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` if the line would exceed
    /// [`Quantity::MAX`], and propagates storage errors.
    pub async fn apply_add(
        &self,
        tx: &mut dyn CartTransaction,
        cart_id: CartId,
        add: &CheckedAdd,
    ) -> Result<LineItem> {
        tx.upsert_line_item(cart_id, add.product_id, add.variant, add.delta)
            .await
    }

    /// Fold a line from another cart into `cart_id`.
    ///
    /// `existing` is the quantity of the matching line already in `cart_id`.
    /// The folded amount is capped so the line stops at [`Quantity::MAX`];
    /// a line that is already full is left alone and `None` is returned.
    /// The catalog is not consulted: the line was checked when first added.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn fold(
        &self,
        tx: &mut dyn CartTransaction,
        cart_id: CartId,
        item: &LineItem,
        existing: Option<Quantity>,
    ) -> Result<Option<LineItem>> {
        let delta = match existing {
            None => item.quantity,
            Some(current) => match current.headroom() {
                Some(room) => room.min(item.quantity),
                None => return Ok(None),
            },
        };

        tx.upsert_line_item(cart_id, item.product_id, item.variant, delta)
            .await
            .map(Some)
    }

    /// Overwrite the quantity of a line. Zero removes the line.
    ///
    /// Returns the updated line, or `None` if it was removed.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` for negative quantities and
    /// `CartError::NotFound` if the line is not in this cart.
    #[instrument(skip(self, tx))]
    pub async fn set_quantity(
        &self,
        tx: &mut dyn CartTransaction,
        cart_id: CartId,
        line_item_id: LineItemId,
        quantity: i64,
    ) -> Result<Option<LineItem>> {
        if quantity < 0 {
            return Err(CartError::Validation(format!(
                "quantity cannot be negative (got {quantity})"
            )));
        }
        if quantity == 0 {
            self.remove(tx, cart_id, line_item_id).await?;
            return Ok(None);
        }

        let quantity = Quantity::new(quantity)?;
        tx.update_line_item(cart_id, line_item_id, quantity)
            .await?
            .map(Some)
            .ok_or_else(|| line_not_found(cart_id, line_item_id))
    }

    /// Delete a line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::NotFound` if the line is not in this cart.
    #[instrument(skip(self, tx))]
    pub async fn remove(
        &self,
        tx: &mut dyn CartTransaction,
        cart_id: CartId,
        line_item_id: LineItemId,
    ) -> Result<()> {
        if tx.delete_line_item(cart_id, line_item_id).await? {
            Ok(())
        } else {
            Err(line_not_found(cart_id, line_item_id))
        }
    }

    async fn validate_product(&self, product_id: ProductId, variant: VariantKey) -> Result<()> {
        if !self.catalog.product_exists(product_id).await? {
            return Err(CartError::Validation(format!(
                "product {product_id} does not exist"
            )));
        }

        if let Some(variant_id) = variant.variant()
            && !self
                .catalog
                .variant_belongs_to_product(variant_id, product_id)
                .await?
        {
            return Err(CartError::Validation(format!(
                "variant {variant_id} does not belong to product {product_id}"
            )));
        }

        Ok(())
    }
}

fn line_not_found(cart_id: CartId, line_item_id: LineItemId) -> CartError {
    CartError::NotFound(format!("line item {line_item_id} is not in cart {cart_id}"))
}
