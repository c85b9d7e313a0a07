//! `PostgreSQL` cart storage.
//!
//! Concurrency is handled by the database:
//!
//! - carts are created with `INSERT ... ON CONFLICT DO NOTHING`, so losing a
//!   first-touch race yields no row instead of an aborted transaction;
//! - `find_cart` locks the row with `FOR UPDATE`, serializing merges of the
//!   same anonymous cart;
//! - line increments are a single `INSERT ... ON CONFLICT ... DO UPDATE`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use cartwright_core::{CartId, CartOwner, LineItemId, LineValueError, ProductId, Quantity, VariantKey};

use crate::cart::error::{CartError, Result};
use crate::cart::store::{CartStore, CartTransaction};
use crate::models::{Cart, LineItem};

const CART_COLUMNS: &str = "id, session_id, user_id, created_at";

const LINE_ITEM_COLUMNS: &str =
    "id, cart_id, product_id, variant_key, quantity, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct CartRow {
    id: i32,
    session_id: Option<String>,
    user_id: Option<i32>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CartRow> for Cart {
    type Error = CartError;

    fn try_from(row: CartRow) -> Result<Self> {
        let owner = CartOwner::from_columns(row.session_id, row.user_id).ok_or_else(|| {
            CartError::Storage(format!("cart {} has an invalid owner", row.id))
        })?;

        Ok(Self {
            id: CartId::new(row.id),
            owner,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LineItemRow {
    id: i32,
    cart_id: i32,
    product_id: i32,
    variant_key: i32,
    quantity: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LineItemRow> for LineItem {
    type Error = CartError;

    fn try_from(row: LineItemRow) -> Result<Self> {
        let id = row.id;
        let corrupt =
            |e: LineValueError| CartError::Storage(format!("line item {id} is corrupt: {e}"));

        Ok(Self {
            id: LineItemId::new(row.id),
            cart_id: CartId::new(row.cart_id),
            product_id: ProductId::new(row.product_id),
            variant: VariantKey::from_i32(row.variant_key).map_err(corrupt)?,
            quantity: Quantity::new(i64::from(row.quantity)).map_err(corrupt)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Cart storage backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgCartStore {
    pool: PgPool,
}

impl PgCartStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CartStore for PgCartStore {
    async fn begin(&self) -> Result<Box<dyn CartTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgCartTransaction { tx }))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// An open `PostgreSQL` transaction. Dropping it rolls back.
struct PgCartTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CartTransaction for PgCartTransaction {
    async fn find_cart(&mut self, owner: &CartOwner) -> Result<Option<Cart>> {
        let column = match owner {
            CartOwner::Anonymous(_) => "session_id",
            CartOwner::Authenticated(_) => "user_id",
        };
        let sql =
            format!("SELECT {CART_COLUMNS} FROM storefront.cart WHERE {column} = $1 FOR UPDATE");
        let query = sqlx::query_as::<_, CartRow>(&sql);
        let query = match owner {
            CartOwner::Anonymous(session_id) => query.bind(session_id.as_str().to_owned()),
            CartOwner::Authenticated(user_id) => query.bind(user_id.as_i32()),
        };

        query
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Cart::try_from)
            .transpose()
    }

    async fn insert_cart(&mut self, owner: &CartOwner) -> Result<Option<Cart>> {
        let (session_id, user_id) = owner.to_columns();

        let sql = format!(
            "INSERT INTO storefront.cart (session_id, user_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING RETURNING {CART_COLUMNS}"
        );
        sqlx::query_as::<_, CartRow>(&sql)
            .bind(session_id)
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Cart::try_from)
            .transpose()
    }

    async fn delete_cart(&mut self, cart_id: CartId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM storefront.cart WHERE id = $1")
            .bind(cart_id.as_i32())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn line_items(&mut self, cart_id: CartId) -> Result<Vec<LineItem>> {
        let sql = format!(
            "SELECT {LINE_ITEM_COLUMNS} FROM storefront.line_item WHERE cart_id = $1 ORDER BY id"
        );
        sqlx::query_as::<_, LineItemRow>(&sql)
            .bind(cart_id.as_i32())
            .fetch_all(&mut *self.tx)
            .await?
            .into_iter()
            .map(LineItem::try_from)
            .collect()
    }

    async fn upsert_line_item(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        variant: VariantKey,
        delta: Quantity,
    ) -> Result<LineItem> {
        let sql = format!(
            "INSERT INTO storefront.line_item \
                 (cart_id, product_id, variant_id, variant_key, quantity) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT ON CONSTRAINT line_item_cart_product_variant_key DO UPDATE \
                 SET quantity = storefront.line_item.quantity + EXCLUDED.quantity, \
                     updated_at = now() \
             RETURNING {LINE_ITEM_COLUMNS}"
        );
        let row = sqlx::query_as::<_, LineItemRow>(&sql)
            .bind(cart_id.as_i32())
            .bind(product_id.as_i32())
            .bind(variant.variant().map(|id| id.as_i32()))
            .bind(variant.as_i32())
            .bind(delta.as_i32())
            .fetch_one(&mut *self.tx)
            .await?;
        LineItem::try_from(row)
    }

    async fn update_line_item(
        &mut self,
        cart_id: CartId,
        line_item_id: LineItemId,
        quantity: Quantity,
    ) -> Result<Option<LineItem>> {
        let sql = format!(
            "UPDATE storefront.line_item SET quantity = $3, updated_at = now() \
             WHERE id = $2 AND cart_id = $1 RETURNING {LINE_ITEM_COLUMNS}"
        );
        sqlx::query_as::<_, LineItemRow>(&sql)
            .bind(cart_id.as_i32())
            .bind(line_item_id.as_i32())
            .bind(quantity.as_i32())
            .fetch_optional(&mut *self.tx)
            .await?
            .map(LineItem::try_from)
            .transpose()
    }

    async fn delete_line_item(
        &mut self,
        cart_id: CartId,
        line_item_id: LineItemId,
    ) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM storefront.line_item WHERE id = $2 AND cart_id = $1")
                .bind(cart_id.as_i32())
                .bind(line_item_id.as_i32())
                .execute(&mut *self.tx)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
