//! Catalog lookups against the `storefront.product` tables.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use cartwright_core::{ProductId, VariantId};

use crate::cart::catalog::{Catalog, ProductSummary, VariantSummary};
use crate::cart::error::Result;

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: i32,
    handle: String,
    title: String,
    image_url: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct VariantRow {
    id: i32,
    product_id: i32,
    title: String,
}

/// Catalog backed by `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn product_exists(&self, product_id: ProductId) -> Result<bool> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM storefront.product WHERE id = $1)")
                .bind(product_id.as_i32())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn variant_belongs_to_product(
        &self,
        variant_id: VariantId,
        product_id: ProductId,
    ) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r"
            SELECT EXISTS (
                SELECT 1 FROM storefront.product_variant
                WHERE id = $1 AND product_id = $2
            )
            ",
        )
        .bind(variant_id.as_i32())
        .bind(product_id.as_i32())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn summaries(&self, product_ids: &[ProductId]) -> Result<Vec<ProductSummary>> {
        let ids: Vec<i32> = product_ids.iter().map(ProductId::as_i32).collect();

        let products: Vec<ProductRow> = sqlx::query_as(
            r"
            SELECT id, handle, title, image_url
            FROM storefront.product
            WHERE id = ANY($1)
            ",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let variants: Vec<VariantRow> = sqlx::query_as(
            r"
            SELECT id, product_id, title
            FROM storefront.product_variant
            WHERE product_id = ANY($1)
            ORDER BY product_id, position, id
            ",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut variants_by_product: HashMap<i32, Vec<VariantSummary>> = HashMap::new();
        for variant in variants {
            variants_by_product
                .entry(variant.product_id)
                .or_default()
                .push(VariantSummary {
                    id: VariantId::new(variant.id),
                    title: variant.title,
                });
        }

        debug!(
            requested = ids.len(),
            found = products.len(),
            "Loaded product summaries"
        );

        Ok(products
            .into_iter()
            .map(|product| ProductSummary {
                id: ProductId::new(product.id),
                handle: product.handle,
                title: product.title,
                image_url: product.image_url,
                variants: variants_by_product.remove(&product.id).unwrap_or_default(),
            })
            .collect())
    }
}
