//! Cart Store: which cart belongs to which owner.
//!
//! The storage seam is split in two. [`CartStore`] opens transactions;
//! [`CartTransaction`] exposes the row-level primitives the ledger and the
//! merge engine compose. Dropping a transaction without calling
//! [`CartTransaction::commit`] rolls it back, so an early `?` return, a panic
//! or a dropped request future never leaves a partial write behind.
//!
//! Implementations live in [`crate::db`] (`PostgreSQL`) and [`crate::memory`]
//! (in-process).

use async_trait::async_trait;
use tracing::debug;

use cartwright_core::{CartId, CartOwner, LineItemId, ProductId, Quantity, VariantKey};

use super::error::{CartError, Result};
use crate::models::{Cart, LineItem};

/// A transactional cart storage backend.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Open a new transaction.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Transient` if no connection is available.
    async fn begin(&self) -> Result<Box<dyn CartTransaction>>;

    /// Check that the backend answers.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable.
    async fn ping(&self) -> Result<()>;
}

/// One open storage transaction.
///
/// Every method observes the transaction's own earlier writes. Concurrent
/// transactions are isolated from each other by the backend.
#[async_trait]
pub trait CartTransaction: Send {
    /// Find the live cart for `owner`, holding a lock on it until the
    /// transaction ends.
    async fn find_cart(&mut self, owner: &CartOwner) -> Result<Option<Cart>>;

    /// Insert a cart for `owner`.
    ///
    /// Returns `None` when a cart for `owner` already exists, including one
    /// committed by a concurrent transaction after this one started.
    async fn insert_cart(&mut self, owner: &CartOwner) -> Result<Option<Cart>>;

    /// Delete a cart and its lines. Returns whether a row was deleted.
    async fn delete_cart(&mut self, cart_id: CartId) -> Result<bool>;

    /// Lines of a cart in insertion order.
    async fn line_items(&mut self, cart_id: CartId) -> Result<Vec<LineItem>>;

    /// Add `delta` to the line for `(cart, product, variant)`, inserting it
    /// when absent. Must be a single atomic step.
    async fn upsert_line_item(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        variant: VariantKey,
        delta: Quantity,
    ) -> Result<LineItem>;

    /// Overwrite the quantity of a line, only if it belongs to `cart_id`.
    async fn update_line_item(
        &mut self,
        cart_id: CartId,
        line_item_id: LineItemId,
        quantity: Quantity,
    ) -> Result<Option<LineItem>>;

    /// Delete a line, only if it belongs to `cart_id`. Returns whether a row
    /// was deleted.
    async fn delete_line_item(&mut self, cart_id: CartId, line_item_id: LineItemId)
    -> Result<bool>;

    /// Make every write of this transaction durable.
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Find the live cart for `owner` without creating one.
///
/// # Errors
///
/// Propagates storage errors.
pub async fn find(tx: &mut dyn CartTransaction, owner: &CartOwner) -> Result<Option<Cart>> {
    tx.find_cart(owner).await
}

/// Find the live cart for `owner`, creating it on first touch.
///
/// Creation never checks-then-inserts: the insert itself is guarded by the
/// owner's uniqueness, and losing that race falls back to re-reading the
/// winner's cart.
///
/// # Errors
///
/// Returns `CartError::Conflict` if the winning cart disappeared between the
/// failed insert and the re-read (it was merged away concurrently).
pub async fn locate(tx: &mut dyn CartTransaction, owner: &CartOwner) -> Result<Cart> {
    if let Some(cart) = tx.find_cart(owner).await? {
        return Ok(cart);
    }

    if let Some(cart) = tx.insert_cart(owner).await? {
        debug!(cart_id = %cart.id, owner = %owner, "Created cart");
        return Ok(cart);
    }

    tx.find_cart(owner).await?.ok_or_else(|| {
        CartError::Conflict(format!("cart for {owner} vanished while it was being created"))
    })
}

/// Retire a cart after its contents were folded elsewhere.
///
/// The delete is conditional on the cart still existing; a concurrent merge
/// that got there first turns this into a conflict, rolling back the caller's
/// fold.
///
/// # Errors
///
/// Returns `CartError::Conflict` if the cart was already retired.
pub async fn retire(tx: &mut dyn CartTransaction, cart_id: CartId) -> Result<()> {
    if tx.delete_cart(cart_id).await? {
        Ok(())
    } else {
        Err(CartError::Conflict(format!("cart {cart_id} was already retired")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cartwright_core::{AnonymousSessionId, UserId};

    use super::*;
    use crate::memory::MemoryCartStore;

    fn anonymous(id: &str) -> CartOwner {
        CartOwner::Anonymous(AnonymousSessionId::parse(id).unwrap())
    }

    #[tokio::test]
    async fn test_locate_creates_once() {
        let store = MemoryCartStore::new();
        let owner = anonymous("browser-a");

        let mut tx = store.begin().await.unwrap();
        let first = locate(tx.as_mut(), &owner).await.unwrap();
        let second = locate(tx.as_mut(), &owner).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.owner, owner);
        assert_eq!(store.cart_count().await, 1);
    }

    #[tokio::test]
    async fn test_owners_get_separate_carts() {
        let store = MemoryCartStore::new();
        let mut tx = store.begin().await.unwrap();
        let anon = locate(tx.as_mut(), &anonymous("browser-a")).await.unwrap();
        let user = locate(tx.as_mut(), &CartOwner::Authenticated(UserId::new(1)))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_ne!(anon.id, user.id);
    }

    #[tokio::test]
    async fn test_find_does_not_create() {
        let store = MemoryCartStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(find(tx.as_mut(), &anonymous("nobody")).await.unwrap().is_none());
        tx.commit().await.unwrap();
        assert_eq!(store.cart_count().await, 0);
    }

    /// The memory store runs one transaction at a time, so this checks the
    /// serial semantics only; `cart_postgres` covers real contention.
    #[tokio::test]
    async fn test_concurrent_first_touch_creates_one_cart() {
        let store = MemoryCartStore::new();
        let owner = CartOwner::Authenticated(UserId::new(77));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let owner = owner.clone();
                tokio::spawn(async move {
                    let mut tx = store.begin().await.unwrap();
                    let cart = locate(tx.as_mut(), &owner).await.unwrap();
                    tx.commit().await.unwrap();
                    cart.id
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.cart_count().await, 1);
    }

    #[tokio::test]
    async fn test_retire_twice_conflicts() {
        let store = MemoryCartStore::new();
        let mut tx = store.begin().await.unwrap();
        let cart = locate(tx.as_mut(), &anonymous("browser-a")).await.unwrap();
        retire(tx.as_mut(), cart.id).await.unwrap();
        assert!(matches!(
            retire(tx.as_mut(), cart.id).await,
            Err(CartError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_uncommitted_cart_is_rolled_back() {
        let store = MemoryCartStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            locate(tx.as_mut(), &anonymous("browser-a")).await.unwrap();
            // dropped without commit
        }
        assert_eq!(store.cart_count().await, 0);
    }
}
