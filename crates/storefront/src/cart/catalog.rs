//! Catalog lookups consumed by the cart.
//!
//! Products and variants are owned by the catalog. The cart only asks whether
//! they exist (before mutating the ledger) and reads their display data (for
//! the projection).

use async_trait::async_trait;

use cartwright_core::{ProductId, VariantId};

use super::error::Result;

/// Display data for one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSummary {
    pub id: VariantId,
    pub title: String,
}

/// Display data for one product and its variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSummary {
    pub id: ProductId,
    pub handle: String,
    pub title: String,
    pub image_url: Option<String>,
    pub variants: Vec<VariantSummary>,
}

impl ProductSummary {
    /// Look up one of this product's variants.
    #[must_use]
    pub fn variant(&self, id: VariantId) -> Option<&VariantSummary> {
        self.variants.iter().find(|variant| variant.id == id)
    }
}

/// Read-only access to the product catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Whether the product exists.
    async fn product_exists(&self, product_id: ProductId) -> Result<bool>;

    /// Whether the variant exists and belongs to the product.
    async fn variant_belongs_to_product(
        &self,
        variant_id: VariantId,
        product_id: ProductId,
    ) -> Result<bool>;

    /// Display data for the given products. Unknown ids are skipped.
    async fn summaries(&self, product_ids: &[ProductId]) -> Result<Vec<ProductSummary>>;
}
