//! Cart identity and merge engine.
//!
//! A request is resolved to an [`Identity`] (anonymous browser id plus an
//! optional logged-in user). Adds are checked against the catalog first.
//! [`CartService`] then opens one storage transaction, locates the owner's cart (merging the browser's anonymous
//! cart into the customer's cart when both exist), applies the requested
//! change through the [`Ledger`], and commits. The committed lines are
//! rendered into a [`CartView`].
//!
//! Write conflicts roll the whole transaction back and are retried a bounded
//! number of times; every other error surfaces unchanged with nothing applied.

pub mod catalog;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod merge;
pub mod projection;
pub mod store;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{instrument, warn};

use cartwright_core::{CartOwner, LineItemId, ProductId, VariantId};

pub use catalog::{Catalog, ProductSummary, VariantSummary};
pub use error::{CartError, ErrorKind, Result};
pub use identity::{CookieSettings, Identity, IdentityResolver, ResolvedIdentity, SessionValidator};
pub use ledger::{CheckedAdd, Ledger};
pub use merge::{MergeEngine, MergeOutcome};
pub use projection::{CartItemView, CartView, project};
pub use store::{CartStore, CartTransaction};

use crate::models::{Cart, LineItem, total_quantity};

/// Default number of attempts for a transaction that hits a write conflict.
pub const DEFAULT_CONFLICT_ATTEMPTS: u32 = 3;

/// Fewest attempts allowed; a conflict is always retried at least once.
pub const MIN_CONFLICT_ATTEMPTS: u32 = 2;

/// Request to add a product to the cart.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddItem {
    pub product_id: ProductId,
    #[serde(default)]
    pub variant_id: Option<VariantId>,
    #[serde(default = "default_add_quantity")]
    pub quantity: i64,
}

const fn default_add_quantity() -> i64 {
    1
}

#[derive(Debug, Clone, Copy)]
enum Mutation<'a> {
    Read,
    Add(&'a CheckedAdd),
    SetQuantity(LineItemId, i64),
    Remove(LineItemId),
}

impl Mutation<'_> {
    /// Whether an anonymous owner without a cart gets one created.
    const fn creates_cart(self) -> bool {
        matches!(self, Self::Add(_))
    }
}

/// Cart operations for one storage backend and catalog.
#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn CartStore>,
    catalog: Arc<dyn Catalog>,
    ledger: Ledger,
    merge: MergeEngine,
    conflict_attempts: u32,
}

impl CartService {
    /// Create a service. `conflict_attempts` is raised to
    /// [`MIN_CONFLICT_ATTEMPTS`] if lower.
    #[must_use]
    pub fn new(store: Arc<dyn CartStore>, catalog: Arc<dyn Catalog>, conflict_attempts: u32) -> Self {
        let ledger = Ledger::new(Arc::clone(&catalog));
        Self {
            store,
            catalog,
            merge: MergeEngine::new(ledger.clone()),
            ledger,
            conflict_attempts: conflict_attempts.max(MIN_CONFLICT_ATTEMPTS),
        }
    }

    /// The storage backend.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CartStore> {
        &self.store
    }

    /// The cart of `identity`.
    ///
    /// A logged-in request merges the browser's anonymous cart first. An
    /// anonymous browser without a cart gets the empty view and nothing is
    /// written.
    ///
    /// # Errors
    ///
    /// Returns storage errors; a conflict that persists after retrying is
    /// returned as `CartError::Conflict`.
    pub async fn view(&self, identity: &Identity) -> Result<CartView> {
        let state = self.run(identity, Mutation::Read).await?;
        self.render(state).await
    }

    /// Add a product to the cart of `identity`, creating the cart if needed.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` for a non-positive quantity, an unknown
    /// product, or a variant of another product.
    #[instrument(skip(self, identity), fields(owner = %identity.owner()))]
    pub async fn add(&self, identity: &Identity, item: &AddItem) -> Result<CartView> {
        let checked = self
            .ledger
            .check_add(item.product_id, item.variant_id, item.quantity)
            .await?;
        let state = self.run(identity, Mutation::Add(&checked)).await?;
        self.render(state).await
    }

    /// Overwrite a line's quantity. Zero removes the line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::NotFound` if the owner has no cart or the line is
    /// not in it, and `CartError::Validation` for a negative quantity.
    #[instrument(skip(self, identity), fields(owner = %identity.owner()))]
    pub async fn set_quantity(
        &self,
        identity: &Identity,
        line_item_id: LineItemId,
        quantity: i64,
    ) -> Result<CartView> {
        let state = self
            .run(identity, Mutation::SetQuantity(line_item_id, quantity))
            .await?;
        self.render(state).await
    }

    /// Remove a line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::NotFound` if the owner has no cart or the line is
    /// not in it.
    #[instrument(skip(self, identity), fields(owner = %identity.owner()))]
    pub async fn remove(&self, identity: &Identity, line_item_id: LineItemId) -> Result<CartView> {
        let state = self.run(identity, Mutation::Remove(line_item_id)).await?;
        self.render(state).await
    }

    /// Total quantity in the cart of `identity`, without catalog lookups.
    ///
    /// # Errors
    ///
    /// Same as [`CartService::view`].
    pub async fn item_count(&self, identity: &Identity) -> Result<u64> {
        let state = self.run(identity, Mutation::Read).await?;
        Ok(state.map_or(0, |(_, items)| total_quantity(&items)))
    }

    async fn run(
        &self,
        identity: &Identity,
        mutation: Mutation<'_>,
    ) -> Result<Option<(Cart, Vec<LineItem>)>> {
        let mut attempt = 1;
        loop {
            match self.attempt(identity, mutation).await {
                Err(CartError::Conflict(reason)) if attempt < self.conflict_attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.conflict_attempts,
                        reason = %reason,
                        "Cart write conflict, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// One transaction. Any early return drops `tx`, rolling it back.
    async fn attempt(
        &self,
        identity: &Identity,
        mutation: Mutation<'_>,
    ) -> Result<Option<(Cart, Vec<LineItem>)>> {
        let mut tx = self.store.begin().await?;

        let Some(cart) = self.open(tx.as_mut(), identity, mutation.creates_cart()).await? else {
            return match mutation {
                Mutation::Read => Ok(None),
                Mutation::SetQuantity(line_item_id, _) | Mutation::Remove(line_item_id) => {
                    Err(CartError::NotFound(format!(
                        "line item {line_item_id} is not in this cart"
                    )))
                }
                Mutation::Add(_) => Err(CartError::Storage(
                    "cart was not created for an add".to_owned(),
                )),
            };
        };

        match mutation {
            Mutation::Read => {}
            Mutation::Add(add) => {
                self.ledger.apply_add(tx.as_mut(), cart.id, add).await?;
            }
            Mutation::SetQuantity(line_item_id, quantity) => {
                self.ledger
                    .set_quantity(tx.as_mut(), cart.id, line_item_id, quantity)
                    .await?;
            }
            Mutation::Remove(line_item_id) => {
                self.ledger.remove(tx.as_mut(), cart.id, line_item_id).await?;
            }
        }

        let items = tx.line_items(cart.id).await?;
        tx.commit().await?;
        Ok(Some((cart, items)))
    }

    /// The cart the request operates on.
    ///
    /// Logged-in requests always locate the customer's cart and merge;
    /// anonymous requests only create a cart when `create` is set.
    async fn open(
        &self,
        tx: &mut dyn CartTransaction,
        identity: &Identity,
        create: bool,
    ) -> Result<Option<Cart>> {
        if let Some(user) = identity.user {
            let outcome = self
                .merge
                .merge_if_needed(tx, &identity.anonymous, user)
                .await?;
            return Ok(Some(outcome.into_cart()));
        }

        let owner = CartOwner::Anonymous(identity.anonymous.clone());
        if create {
            store::locate(tx, &owner).await.map(Some)
        } else {
            store::find(tx, &owner).await
        }
    }

    async fn render(&self, state: Option<(Cart, Vec<LineItem>)>) -> Result<CartView> {
        let Some((cart, items)) = state else {
            return Ok(CartView::empty());
        };

        let product_ids: Vec<ProductId> = items
            .iter()
            .map(|item| item.product_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let products = if product_ids.is_empty() {
            Vec::new()
        } else {
            self.catalog.summaries(&product_ids).await?
        };

        Ok(project(&cart, &items, &products))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;
    use cartwright_core::{AnonymousSessionId, Quantity, UserId};

    use super::*;
    use crate::memory::{MemoryCartStore, MemoryCatalog};

    const A: ProductId = ProductId::new(1);
    const B: ProductId = ProductId::new(2);
    const B_BLUE: VariantId = VariantId::new(20);

    fn service(store: &MemoryCartStore) -> CartService {
        let catalog = MemoryCatalog::new()
            .with_product(A, "apron", "Apron", &[])
            .with_product(B, "bowl", "Bowl", &[(B_BLUE, "Blue")]);
        CartService::new(
            Arc::new(store.clone()),
            Arc::new(catalog),
            DEFAULT_CONFLICT_ATTEMPTS,
        )
    }

    fn browser(id: &str) -> Identity {
        Identity::anonymous(AnonymousSessionId::parse(id).unwrap())
    }

    fn customer(browser_id: &str, user: i32) -> Identity {
        Identity::authenticated(
            AnonymousSessionId::parse(browser_id).unwrap(),
            UserId::new(user),
        )
    }

    fn add(product_id: ProductId, variant_id: Option<VariantId>, quantity: i64) -> AddItem {
        AddItem {
            product_id,
            variant_id,
            quantity,
        }
    }

    #[tokio::test]
    async fn test_first_add_creates_cart_with_one_line() {
        let store = MemoryCartStore::new();
        let view = service(&store)
            .add(&browser("fresh"), &add(A, None, 1))
            .await
            .unwrap();

        assert!(view.cart_id.is_some());
        assert_eq!(view.owner.as_deref(), Some("anonymous"));
        assert_eq!(view.line_count, 1);
        assert_eq!(view.total_item_count, 1);
        assert_eq!(view.items[0].title, "Apron");
        assert_eq!(store.cart_count().await, 1);
    }

    #[tokio::test]
    async fn test_view_of_new_browser_writes_nothing() {
        let store = MemoryCartStore::new();
        let service = service(&store);

        assert_eq!(service.view(&browser("fresh")).await.unwrap(), CartView::empty());
        assert_eq!(service.item_count(&browser("fresh")).await.unwrap(), 0);
        assert_eq!(store.cart_count().await, 0);
    }

    #[tokio::test]
    async fn test_set_quantity_zero_removes_line() {
        let store = MemoryCartStore::new();
        let service = service(&store);
        let me = browser("browser-1");

        let view = service.add(&me, &add(B, Some(B_BLUE), 2)).await.unwrap();
        let line_id = view.items[0].id;

        let view = service.set_quantity(&me, line_id, 5).await.unwrap();
        assert_eq!(view.total_item_count, 5);

        let view = service.set_quantity(&me, line_id, 0).await.unwrap();
        assert!(view.items.is_empty());
        assert!(service.view(&me).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_mutating_without_cart_is_not_found() {
        let store = MemoryCartStore::new();
        let service = service(&store);

        let err = service
            .set_quantity(&browser("fresh"), LineItemId::new(1), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::NotFound(_)));

        let err = service
            .remove(&browser("fresh"), LineItemId::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::NotFound(_)));
        assert_eq!(store.cart_count().await, 0);
    }

    #[tokio::test]
    async fn test_other_browsers_lines_are_not_reachable() {
        let store = MemoryCartStore::new();
        let service = service(&store);

        let theirs = service.add(&browser("theirs"), &add(A, None, 3)).await.unwrap();
        service.add(&browser("mine"), &add(B, None, 1)).await.unwrap();

        let err = service
            .remove(&browser("mine"), theirs.items[0].id)
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::NotFound(_)));
        assert_eq!(service.item_count(&browser("theirs")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_login_merges_and_logout_starts_empty() {
        let store = MemoryCartStore::new();
        let service = service(&store);

        service.add(&browser("laptop"), &add(A, None, 2)).await.unwrap();
        service.add(&customer("phone", 9), &add(A, None, 1)).await.unwrap();
        service.add(&customer("phone", 9), &add(B, None, 3)).await.unwrap();

        let view = service.view(&customer("laptop", 9)).await.unwrap();
        assert_eq!(view.owner.as_deref(), Some("authenticated"));
        assert_eq!(view.quantity_of(A, None), 3);
        assert_eq!(view.quantity_of(B, None), 3);
        assert_eq!(store.cart_count().await, 1);

        // Same browser after logout: the anonymous cart is gone.
        assert_eq!(service.view(&browser("laptop")).await.unwrap(), CartView::empty());

        // Logging in again does not fold anything twice.
        let again = service.view(&customer("laptop", 9)).await.unwrap();
        assert_eq!(again.total_item_count, 6);
    }

    /// The memory store runs one transaction at a time, so this checks the
    /// serial semantics only; `cart_postgres` covers real contention.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_adds_sum() {
        let store = MemoryCartStore::new();
        let service = service(&store);

        let first = {
            let service = service.clone();
            tokio::spawn(async move { service.add(&browser("racy"), &add(A, None, 1)).await })
        };
        let second = {
            let service = service.clone();
            tokio::spawn(async move { service.add(&browser("racy"), &add(A, None, 1)).await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let view = service.view(&browser("racy")).await.unwrap();
        assert_eq!(view.line_count, 1);
        assert_eq!(view.quantity_of(A, None), 2);
        assert_eq!(store.cart_count().await, 1);
    }

    #[tokio::test]
    async fn test_conflict_is_retried() {
        let store = MemoryCartStore::new();
        let service = service(&store);
        store.fail_next_commits([CartError::Conflict("serialization failure".into())]);

        let view = service.add(&browser("b"), &add(A, None, 1)).await.unwrap();
        assert_eq!(view.total_item_count, 1);
    }

    #[tokio::test]
    async fn test_persistent_conflict_surfaces_without_effect() {
        let store = MemoryCartStore::new();
        let service = service(&store);
        store.fail_next_commits(
            (0..DEFAULT_CONFLICT_ATTEMPTS).map(|_| CartError::Conflict("deadlock".into())),
        );

        let err = service.add(&browser("b"), &add(A, None, 1)).await.unwrap_err();
        assert!(matches!(err, CartError::Conflict(_)));
        assert_eq!(store.cart_count().await, 0);
    }

    #[tokio::test]
    async fn test_transient_error_is_not_retried() {
        let store = MemoryCartStore::new();
        let service = service(&store);
        store.fail_next_commits([CartError::Transient("connection reset".into())]);

        let err = service.add(&browser("b"), &add(A, None, 1)).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, CartError::Transient(_)));

        let view = service.add(&browser("b"), &add(A, None, 1)).await.unwrap();
        assert_eq!(view.total_item_count, 1);
    }

    #[tokio::test]
    async fn test_invalid_add_is_rejected() {
        let store = MemoryCartStore::new();
        let service = service(&store);

        for item in [
            add(A, None, 0),
            add(ProductId::new(404), None, 1),
            add(A, Some(B_BLUE), 1),
        ] {
            let err = service.add(&browser("b"), &item).await.unwrap_err();
            assert!(matches!(err, CartError::Validation(_)), "{item:?}");
        }
        assert_eq!(store.cart_count().await, 0);
    }

    /// A catalog that fails if it is consulted while a cart transaction is
    /// open, the way a pooled lookup would wait behind its own transaction.
    struct OutsideTransactionCatalog {
        inner: MemoryCatalog,
        store: MemoryCartStore,
    }

    impl OutsideTransactionCatalog {
        async fn ensure_no_transaction(&self) -> Result<()> {
            match tokio::time::timeout(Duration::from_millis(200), self.store.begin()).await {
                Ok(tx) => tx.map(drop),
                Err(_) => Err(CartError::Storage(
                    "catalog consulted inside a cart transaction".to_owned(),
                )),
            }
        }
    }

    #[async_trait]
    impl Catalog for OutsideTransactionCatalog {
        async fn product_exists(&self, product_id: ProductId) -> Result<bool> {
            self.ensure_no_transaction().await?;
            self.inner.product_exists(product_id).await
        }

        async fn variant_belongs_to_product(
            &self,
            variant_id: VariantId,
            product_id: ProductId,
        ) -> Result<bool> {
            self.ensure_no_transaction().await?;
            self.inner
                .variant_belongs_to_product(variant_id, product_id)
                .await
        }

        async fn summaries(&self, product_ids: &[ProductId]) -> Result<Vec<ProductSummary>> {
            self.ensure_no_transaction().await?;
            self.inner.summaries(product_ids).await
        }
    }

    #[tokio::test]
    async fn test_catalog_is_consulted_outside_the_transaction() {
        let store = MemoryCartStore::new();
        let catalog = OutsideTransactionCatalog {
            inner: MemoryCatalog::new().with_product(B, "bowl", "Bowl", &[(B_BLUE, "Blue")]),
            store: store.clone(),
        };
        let service = CartService::new(
            Arc::new(store.clone()),
            Arc::new(catalog),
            DEFAULT_CONFLICT_ATTEMPTS,
        );

        let view = service
            .add(&browser("b"), &add(B, Some(B_BLUE), 2))
            .await
            .unwrap();
        assert_eq!(view.total_item_count, 2);
        assert_eq!(view.items[0].title, "Bowl");

        let err = service
            .add(&browser("b"), &add(ProductId::new(404), None, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::Validation(_)));
    }

    #[tokio::test]
    async fn test_merge_past_maximum_keeps_customer_cart_usable() {
        let store = MemoryCartStore::new();
        let service = service(&store);

        service
            .add(&browser("phone"), &add(A, None, Quantity::MAX))
            .await
            .unwrap();
        service.add(&customer("laptop", 9), &add(A, None, 1)).await.unwrap();

        let merged = service.view(&customer("phone", 9)).await.unwrap();
        assert_eq!(i64::from(merged.quantity_of(A, None)), Quantity::MAX);

        let again = service.view(&customer("phone", 9)).await.unwrap();
        assert_eq!(again, merged);
        let view = service
            .add(&customer("phone", 9), &add(B, None, 1))
            .await
            .unwrap();
        assert_eq!(view.line_count, 2);

        // Adding past the maximum is still refused, without breaking the cart.
        let err = service
            .add(&customer("phone", 9), &add(A, None, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::Validation(_)));
        let count = service.item_count(&customer("phone", 9)).await.unwrap();
        assert_eq!(count, view.total_item_count);
    }

    #[test]
    fn test_conflict_attempts_floor() {
        let service = CartService::new(
            Arc::new(MemoryCartStore::new()),
            Arc::new(MemoryCatalog::new()),
            0,
        );
        assert_eq!(service.conflict_attempts, MIN_CONFLICT_ATTEMPTS);
    }

    #[test]
    fn test_add_item_defaults_quantity() {
        let item: AddItem = serde_json::from_str(r#"{"product_id": 4}"#).unwrap();
        assert_eq!(item, add(ProductId::new(4), None, 1));
    }
}
