//! Seed the storefront catalog from a YAML fixture.
//!
//! The cart only reads `storefront.product` and `storefront.product_variant`,
//! so a local database needs a few rows there before carts can be filled.
//!
//! ```yaml
//! products:
//!   - id: 1
//!     handle: pineapple-tee
//!     title: Pineapple Tee
//!     image_url: https://cdn.example.com/tee.png
//!     variants:
//!       - id: 11
//!         title: Small
//!       - id: 12
//!         title: Large
//! ```
//!
//! Rows are upserted by id, so running the same file twice is harmless.

use std::collections::HashSet;
use std::path::Path;

use cartwright_core::{ProductId, VariantId};
use cartwright_storefront::db;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

use super::database_url;

/// Errors raised while seeding.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read fixture: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse fixture: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{0} validation errors found")]
    Invalid(usize),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Top-level fixture document.
#[derive(Debug, Deserialize)]
pub struct CatalogFixture {
    #[serde(default)]
    pub products: Vec<ProductFixture>,
}

#[derive(Debug, Deserialize)]
pub struct ProductFixture {
    pub id: i32,
    pub handle: String,
    pub title: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub variants: Vec<VariantFixture>,
}

#[derive(Debug, Deserialize)]
pub struct VariantFixture {
    pub id: i32,
    pub title: String,
}

impl CatalogFixture {
    fn variant_count(&self) -> usize {
        self.products.iter().map(|p| p.variants.len()).sum()
    }
}

/// Check a fixture before touching the database.
///
/// Returns every problem found rather than stopping at the first.
#[must_use]
pub fn validate(fixture: &CatalogFixture) -> Vec<String> {
    let mut errors = Vec::new();
    let mut product_ids = HashSet::new();
    let mut handles = HashSet::new();
    let mut variant_ids = HashSet::new();

    for product in &fixture.products {
        if product.id <= 0 {
            errors.push(format!("product {}: id must be positive", product.id));
        }
        if !product_ids.insert(product.id) {
            errors.push(format!("product {}: duplicate id", product.id));
        }
        if product.handle.trim().is_empty() {
            errors.push(format!("product {}: handle is empty", product.id));
        } else if !handles.insert(product.handle.as_str()) {
            errors.push(format!(
                "product {}: duplicate handle {:?}",
                product.id, product.handle
            ));
        }
        if product.title.trim().is_empty() {
            errors.push(format!("product {}: title is empty", product.id));
        }

        for variant in &product.variants {
            // Variant id 0 is the "no variant" key on cart lines.
            if variant.id <= 0 {
                errors.push(format!(
                    "product {} variant {}: id must be positive",
                    product.id, variant.id
                ));
            }
            if !variant_ids.insert(variant.id) {
                errors.push(format!(
                    "product {} variant {}: duplicate id",
                    product.id, variant.id
                ));
            }
        }
    }

    errors
}

/// Seed catalog rows from a YAML file.
///
/// # Errors
///
/// Returns an error if the database URL is missing, the file cannot be read
/// or fails validation, or a database write fails.
pub async fn catalog(file_path: &str) -> Result<(), SeedError> {
    let database_url =
        database_url().ok_or(SeedError::MissingEnvVar("STOREFRONT_DATABASE_URL"))?;

    let path = Path::new(file_path);
    if !path.exists() {
        return Err(SeedError::FileNotFound(file_path.to_string()));
    }

    info!(path = %file_path, "Loading catalog fixture");

    // Read and validate YAML before connecting to database
    let content = tokio::fs::read_to_string(path).await?;
    let fixture: CatalogFixture = serde_yaml::from_str(&content)?;

    let errors = validate(&fixture);
    if !errors.is_empty() {
        error!("Fixture validation failed:");
        for err in &errors {
            error!("  - {err}");
        }
        return Err(SeedError::Invalid(errors.len()));
    }

    let pool = db::create_pool(&database_url).await?;
    info!("Connected to database");

    let mut tx = pool.begin().await?;

    for (position, product) in fixture.products.iter().enumerate() {
        let product_id = ProductId::new(product.id);

        sqlx::query(
            r"
            INSERT INTO storefront.product (id, handle, title, image_url)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET handle = EXCLUDED.handle,
                title = EXCLUDED.title,
                image_url = EXCLUDED.image_url
            ",
        )
        .bind(product_id)
        .bind(&product.handle)
        .bind(&product.title)
        .bind(product.image_url.as_deref())
        .execute(&mut *tx)
        .await?;

        for (variant_position, variant) in product.variants.iter().enumerate() {
            sqlx::query(
                r"
                INSERT INTO storefront.product_variant (id, product_id, title, position)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (id) DO UPDATE
                SET product_id = EXCLUDED.product_id,
                    title = EXCLUDED.title,
                    position = EXCLUDED.position
                ",
            )
            .bind(VariantId::new(variant.id))
            .bind(product_id)
            .bind(&variant.title)
            .bind(i32::try_from(variant_position).unwrap_or(i32::MAX))
            .execute(&mut *tx)
            .await?;
        }

        tracing::debug!(position, product_id = %product_id, "Seeded product");
    }

    tx.commit().await?;

    info!("Seeding complete!");
    info!("  Products upserted: {}", fixture.products.len());
    info!("  Variants upserted: {}", fixture.variant_count());

    Ok(())
}
