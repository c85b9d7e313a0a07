//! In-process backends for the cart seams.
//!
//! [`MemoryCartStore`] serializes transactions behind one async mutex: a
//! transaction works on a private copy of the state and writes it back on
//! commit, so dropping it discards every write. This gives the same
//! all-or-nothing and no-lost-update behavior the `PostgreSQL` store gets
//! from row locks, which is what the cart tests rely on.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use cartwright_core::{
    CartId, CartOwner, LineItemId, ProductId, Quantity, UserId, VariantId, VariantKey,
};

use crate::cart::catalog::{Catalog, ProductSummary, VariantSummary};
use crate::cart::error::{CartError, Result};
use crate::cart::identity::SessionValidator;
use crate::cart::store::{CartStore, CartTransaction};
use crate::models::{Cart, LineItem};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    carts: BTreeMap<CartId, Cart>,
    lines: BTreeMap<LineItemId, LineItem>,
    next_cart_id: i32,
    next_line_id: i32,
}

impl MemoryState {
    fn next_cart_id(&mut self) -> CartId {
        self.next_cart_id += 1;
        CartId::new(self.next_cart_id)
    }

    fn next_line_id(&mut self) -> LineItemId {
        self.next_line_id += 1;
        LineItemId::new(self.next_line_id)
    }
}

/// Cart storage held in process memory.
#[derive(Clone, Default)]
pub struct MemoryCartStore {
    state: Arc<Mutex<MemoryState>>,
    commit_failures: Arc<StdMutex<VecDeque<CartError>>>,
}

impl MemoryCartStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live carts.
    pub async fn cart_count(&self) -> usize {
        self.state.lock().await.carts.len()
    }

    /// Snapshot of every live cart.
    pub async fn carts(&self) -> Vec<Cart> {
        self.state.lock().await.carts.values().cloned().collect()
    }

    /// Make the next commits fail with the given errors, in order.
    #[cfg(test)]
    pub(crate) fn fail_next_commits(&self, errors: impl IntoIterator<Item = CartError>) {
        if let Ok(mut queue) = self.commit_failures.lock() {
            queue.extend(errors);
        }
    }

    fn take_commit_failure(&self) -> Option<CartError> {
        self.commit_failures
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
    }
}

#[async_trait]
impl CartStore for MemoryCartStore {
    async fn begin(&self) -> Result<Box<dyn CartTransaction>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            store: self.clone(),
        }))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    store: MemoryCartStore,
}

impl MemoryTransaction {
    fn line_in_cart(&mut self, cart_id: CartId, line_item_id: LineItemId) -> Option<&mut LineItem> {
        self.working
            .lines
            .get_mut(&line_item_id)
            .filter(|line| line.cart_id == cart_id)
    }
}

#[async_trait]
impl CartTransaction for MemoryTransaction {
    async fn find_cart(&mut self, owner: &CartOwner) -> Result<Option<Cart>> {
        Ok(self
            .working
            .carts
            .values()
            .find(|cart| &cart.owner == owner)
            .cloned())
    }

    async fn insert_cart(&mut self, owner: &CartOwner) -> Result<Option<Cart>> {
        if self.working.carts.values().any(|cart| &cart.owner == owner) {
            return Ok(None);
        }

        let cart = Cart {
            id: self.working.next_cart_id(),
            owner: owner.clone(),
            created_at: Utc::now(),
        };
        self.working.carts.insert(cart.id, cart.clone());
        Ok(Some(cart))
    }

    async fn delete_cart(&mut self, cart_id: CartId) -> Result<bool> {
        if self.working.carts.remove(&cart_id).is_none() {
            return Ok(false);
        }
        self.working.lines.retain(|_, line| line.cart_id != cart_id);
        Ok(true)
    }

    async fn line_items(&mut self, cart_id: CartId) -> Result<Vec<LineItem>> {
        Ok(self
            .working
            .lines
            .values()
            .filter(|line| line.cart_id == cart_id)
            .cloned()
            .collect())
    }

    async fn upsert_line_item(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        variant: VariantKey,
        delta: Quantity,
    ) -> Result<LineItem> {
        if !self.working.carts.contains_key(&cart_id) {
            return Err(CartError::Validation(format!("cart {cart_id} does not exist")));
        }

        let now = Utc::now();
        let existing = self.working.lines.values_mut().find(|line| {
            line.cart_id == cart_id && line.product_id == product_id && line.variant == variant
        });

        if let Some(line) = existing {
            let sum = i64::from(line.quantity.as_i32()) + i64::from(delta.as_i32());
            line.quantity = Quantity::new(sum)?;
            line.updated_at = now;
            return Ok(line.clone());
        }

        let line = LineItem {
            id: self.working.next_line_id(),
            cart_id,
            product_id,
            variant,
            quantity: delta,
            created_at: now,
            updated_at: now,
        };
        self.working.lines.insert(line.id, line.clone());
        Ok(line)
    }

    async fn update_line_item(
        &mut self,
        cart_id: CartId,
        line_item_id: LineItemId,
        quantity: Quantity,
    ) -> Result<Option<LineItem>> {
        Ok(self.line_in_cart(cart_id, line_item_id).map(|line| {
            line.quantity = quantity;
            line.updated_at = Utc::now();
            line.clone()
        }))
    }

    async fn delete_line_item(
        &mut self,
        cart_id: CartId,
        line_item_id: LineItemId,
    ) -> Result<bool> {
        if self.line_in_cart(cart_id, line_item_id).is_none() {
            return Ok(false);
        }
        self.working.lines.remove(&line_item_id);
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self {
            mut guard,
            working,
            store,
        } = *self;

        if let Some(err) = store.take_commit_failure() {
            return Err(err);
        }
        *guard = working;
        Ok(())
    }
}

/// Product catalog held in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    products: HashMap<ProductId, ProductSummary>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a product with `(variant id, variant title)` pairs.
    #[must_use]
    pub fn with_product(
        mut self,
        id: ProductId,
        handle: &str,
        title: &str,
        variants: &[(VariantId, &str)],
    ) -> Self {
        let summary = ProductSummary {
            id,
            handle: handle.to_owned(),
            title: title.to_owned(),
            image_url: None,
            variants: variants
                .iter()
                .map(|(id, title)| VariantSummary {
                    id: *id,
                    title: (*title).to_owned(),
                })
                .collect(),
        };
        self.products.insert(id, summary);
        self
    }

    /// Set the image of a product added earlier.
    #[must_use]
    pub fn with_image(mut self, id: ProductId, url: &str) -> Self {
        if let Some(product) = self.products.get_mut(&id) {
            product.image_url = Some(url.to_owned());
        }
        self
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn product_exists(&self, product_id: ProductId) -> Result<bool> {
        Ok(self.products.contains_key(&product_id))
    }

    async fn variant_belongs_to_product(
        &self,
        variant_id: VariantId,
        product_id: ProductId,
    ) -> Result<bool> {
        Ok(self
            .products
            .get(&product_id)
            .is_some_and(|product| product.variant(variant_id).is_some()))
    }

    async fn summaries(&self, product_ids: &[ProductId]) -> Result<Vec<ProductSummary>> {
        let wanted: HashSet<_> = product_ids.iter().collect();
        Ok(self
            .products
            .values()
            .filter(|product| wanted.contains(&product.id))
            .cloned()
            .collect())
    }
}

/// Session tokens held in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionValidator {
    sessions: HashMap<String, UserId>,
    unavailable: bool,
}

impl MemorySessionValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as a session of `user`.
    #[must_use]
    pub fn with_session(mut self, token: &str, user: UserId) -> Self {
        self.sessions.insert(token.to_owned(), user);
        self
    }

    /// Fail every validation, as if the session backend were down.
    #[must_use]
    pub const fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }
}

#[async_trait]
impl SessionValidator for MemorySessionValidator {
    async fn validate(&self, token: &str) -> Result<Option<UserId>> {
        if self.unavailable {
            return Err(CartError::Transient("session store unavailable".to_owned()));
        }
        Ok(self.sessions.get(token).copied())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cartwright_core::AnonymousSessionId;

    use super::*;

    fn owner() -> CartOwner {
        CartOwner::Anonymous(AnonymousSessionId::parse("browser-1").unwrap())
    }

    #[tokio::test]
    async fn test_commit_publishes_and_drop_discards() {
        let store = MemoryCartStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert_cart(&owner()).await.unwrap();
        drop(tx);
        assert_eq!(store.cart_count().await, 0);

        let mut tx = store.begin().await.unwrap();
        tx.insert_cart(&owner()).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.cart_count().await, 1);
        assert_eq!(store.carts().await[0].owner, owner());
    }

    #[tokio::test]
    async fn test_injected_commit_failure_rolls_back_once() {
        let store = MemoryCartStore::new();
        store.fail_next_commits([CartError::Conflict("injected".into())]);

        let mut tx = store.begin().await.unwrap();
        tx.insert_cart(&owner()).await.unwrap();
        assert_eq!(
            tx.commit().await,
            Err(CartError::Conflict("injected".into()))
        );
        assert_eq!(store.cart_count().await, 0);

        let mut tx = store.begin().await.unwrap();
        tx.insert_cart(&owner()).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.cart_count().await, 1);
    }

    #[tokio::test]
    async fn test_upsert_into_missing_cart_is_rejected() {
        let store = MemoryCartStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .upsert_line_item(CartId::new(9), ProductId::new(1), VariantKey::NONE, Quantity::ONE)
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::Validation(_)));
    }

    #[tokio::test]
    async fn test_upsert_overflow_is_rejected() {
        let store = MemoryCartStore::new();
        let mut tx = store.begin().await.unwrap();
        let cart = tx.insert_cart(&owner()).await.unwrap().unwrap();
        let max = Quantity::new(Quantity::MAX).unwrap();

        tx.upsert_line_item(cart.id, ProductId::new(1), VariantKey::NONE, max)
            .await
            .unwrap();
        let err = tx
            .upsert_line_item(cart.id, ProductId::new(1), VariantKey::NONE, Quantity::ONE)
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::Validation(_)));
    }

    #[tokio::test]
    async fn test_catalog_lookups() {
        let catalog = MemoryCatalog::new()
            .with_product(ProductId::new(1), "tee", "Tee", &[(VariantId::new(5), "Small")])
            .with_image(ProductId::new(1), "https://cdn.example.com/tee.jpg");

        assert!(catalog.product_exists(ProductId::new(1)).await.unwrap());
        assert!(!catalog.product_exists(ProductId::new(2)).await.unwrap());
        assert!(
            catalog
                .variant_belongs_to_product(VariantId::new(5), ProductId::new(1))
                .await
                .unwrap()
        );
        assert!(
            !catalog
                .variant_belongs_to_product(VariantId::new(6), ProductId::new(1))
                .await
                .unwrap()
        );

        let summaries = catalog
            .summaries(&[ProductId::new(1), ProductId::new(2)])
            .await
            .unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(
            summaries[0].image_url.as_deref(),
            Some("https://cdn.example.com/tee.jpg")
        );
    }
}
