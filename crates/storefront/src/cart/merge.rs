//! Merge Engine: fold an anonymous cart into the customer's cart after login.
//!
//! Runs inside the caller's transaction, so the fold and the retirement of the
//! anonymous cart commit together or not at all. The anonymous cart row is
//! locked when it is read; a second request merging the same browser either
//! waits and then finds nothing to merge, or fails the conditional retire and
//! is rolled back and retried. Quantities are never applied twice.
//!
//! A folded line stops at [`Quantity::MAX`]; the excess is dropped with a
//! warning instead of failing the merge.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use cartwright_core::{
    AnonymousSessionId, CartId, CartOwner, ProductId, Quantity, UserId, VariantKey,
};

use super::error::Result;
use super::ledger::Ledger;
use super::store::{self, CartTransaction};
use crate::models::Cart;

/// What a merge attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The browser has no anonymous cart (never had one, or already merged).
    NoAnonymousCart { cart: Cart },
    /// The anonymous cart was empty and has been retired.
    RetiredEmpty { cart: Cart, retired: CartId },
    /// Lines were folded into `cart` and the anonymous cart was retired.
    Merged {
        cart: Cart,
        retired: CartId,
        lines_folded: usize,
        quantity_folded: u64,
    },
}

impl MergeOutcome {
    /// The customer's cart after the merge.
    #[must_use]
    pub const fn cart(&self) -> &Cart {
        match self {
            Self::NoAnonymousCart { cart }
            | Self::RetiredEmpty { cart, .. }
            | Self::Merged { cart, .. } => cart,
        }
    }

    /// Consume the outcome, keeping the customer's cart.
    #[must_use]
    pub fn into_cart(self) -> Cart {
        match self {
            Self::NoAnonymousCart { cart }
            | Self::RetiredEmpty { cart, .. }
            | Self::Merged { cart, .. } => cart,
        }
    }

    /// The anonymous cart that was retired, if any.
    #[must_use]
    pub const fn retired(&self) -> Option<CartId> {
        match self {
            Self::NoAnonymousCart { .. } => None,
            Self::RetiredEmpty { retired, .. } | Self::Merged { retired, .. } => Some(*retired),
        }
    }
}

/// Folds anonymous carts into authenticated ones.
#[derive(Clone)]
pub struct MergeEngine {
    ledger: Ledger,
}

impl MergeEngine {
    #[must_use]
    pub const fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    /// Locate (or create) the cart of `user` and fold the anonymous cart of
    /// `anonymous` into it, if there is one.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Conflict` if a concurrent merge retired the
    /// anonymous cart first; the caller must roll back and retry. Storage
    /// errors are propagated; in every error case the caller's transaction
    /// must not be committed.
    pub async fn merge_if_needed(
        &self,
        tx: &mut dyn CartTransaction,
        anonymous: &AnonymousSessionId,
        user: UserId,
    ) -> Result<MergeOutcome> {
        let cart = store::locate(tx, &CartOwner::Authenticated(user)).await?;

        let anonymous_owner = CartOwner::Anonymous(anonymous.clone());
        let Some(source) = store::find(tx, &anonymous_owner).await? else {
            return Ok(MergeOutcome::NoAnonymousCart { cart });
        };

        let items = tx.line_items(source.id).await?;
        if items.is_empty() {
            store::retire(tx, source.id).await?;
            debug!(retired = %source.id, "Retired empty anonymous cart");
            return Ok(MergeOutcome::RetiredEmpty {
                cart,
                retired: source.id,
            });
        }

        let existing: HashMap<(ProductId, VariantKey), Quantity> = tx
            .line_items(cart.id)
            .await?
            .into_iter()
            .map(|line| ((line.product_id, line.variant), line.quantity))
            .collect();

        let mut quantity_folded = 0_u64;
        for item in &items {
            let current = existing.get(&(item.product_id, item.variant)).copied();
            let before = current.map_or(0, Quantity::get);
            let after = self
                .ledger
                .fold(tx, cart.id, item, current)
                .await?
                .map_or(before, |line| line.quantity.get());

            let applied = after - before;
            if applied < item.quantity.get() {
                warn!(
                    into_cart = %cart.id,
                    product_id = %item.product_id,
                    variant = %item.variant,
                    dropped = item.quantity.get() - applied,
                    "Merged line capped at maximum quantity"
                );
            }
            quantity_folded += u64::from(applied);
        }
        store::retire(tx, source.id).await?;

        info!(
            from_cart = %source.id,
            into_cart = %cart.id,
            lines = items.len(),
            quantity = quantity_folded,
            "Merged anonymous cart"
        );

        Ok(MergeOutcome::Merged {
            cart,
            retired: source.id,
            lines_folded: items.len(),
            quantity_folded,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use cartwright_core::VariantId;

    use super::*;
    use crate::cart::error::CartError;
    use crate::cart::store::CartStore;
    use crate::memory::{MemoryCartStore, MemoryCatalog};

    const A: ProductId = ProductId::new(1);
    const B: ProductId = ProductId::new(2);
    const A_RED: VariantId = VariantId::new(10);
    const USER: UserId = UserId::new(500);

    fn engine() -> (Ledger, MergeEngine) {
        let catalog = MemoryCatalog::new()
            .with_product(A, "a", "Product A", &[(A_RED, "Red")])
            .with_product(B, "b", "Product B", &[]);
        let ledger = Ledger::new(Arc::new(catalog));
        (ledger.clone(), MergeEngine::new(ledger))
    }

    fn browser() -> AnonymousSessionId {
        AnonymousSessionId::parse("browser-1").unwrap()
    }

    /// Seed a cart for `owner` with `(product, variant, quantity)` lines.
    async fn seed(
        store: &MemoryCartStore,
        ledger: &Ledger,
        owner: &CartOwner,
        lines: &[(ProductId, Option<VariantId>, i64)],
    ) -> CartId {
        let mut tx = store.begin().await.unwrap();
        let cart = store::locate(tx.as_mut(), owner).await.unwrap();
        for (product, variant, quantity) in lines {
            let add = ledger.check_add(*product, *variant, *quantity).await.unwrap();
            ledger.apply_add(tx.as_mut(), cart.id, &add).await.unwrap();
        }
        tx.commit().await.unwrap();
        cart.id
    }

    async fn quantities(
        store: &MemoryCartStore,
        owner: &CartOwner,
    ) -> Option<BTreeMap<(ProductId, VariantKey), u32>> {
        let mut tx = store.begin().await.unwrap();
        let cart = store::find(tx.as_mut(), owner).await.unwrap()?;
        let items = tx.line_items(cart.id).await.unwrap();
        Some(
            items
                .into_iter()
                .map(|item| ((item.product_id, item.variant), item.quantity.get()))
                .collect(),
        )
    }

    async fn merge(store: &MemoryCartStore, engine: &MergeEngine) -> MergeOutcome {
        let mut tx = store.begin().await.unwrap();
        let outcome = engine
            .merge_if_needed(tx.as_mut(), &browser(), USER)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        outcome
    }

    #[tokio::test]
    async fn test_merge_conserves_quantities_and_retires_anonymous_cart() {
        let store = MemoryCartStore::new();
        let (ledger, engine) = engine();
        let anonymous = CartOwner::Anonymous(browser());
        let user = CartOwner::Authenticated(USER);

        seed(&store, &ledger, &anonymous, &[(A, None, 2), (A, Some(A_RED), 1)]).await;
        seed(&store, &ledger, &user, &[(A, None, 1), (B, None, 3)]).await;

        let outcome = merge(&store, &engine).await;
        assert!(matches!(
            outcome,
            MergeOutcome::Merged {
                lines_folded: 2,
                quantity_folded: 3,
                ..
            }
        ));
        assert_eq!(outcome.cart().owner, user);

        let merged = quantities(&store, &user).await.unwrap();
        assert_eq!(merged.get(&(A, VariantKey::NONE)), Some(&3));
        assert_eq!(
            merged.get(&(A, VariantKey::try_from(Some(A_RED)).unwrap())),
            Some(&1)
        );
        assert_eq!(merged.get(&(B, VariantKey::NONE)), Some(&3));
        assert_eq!(merged.len(), 3);
        assert!(quantities(&store, &anonymous).await.is_none());
    }

    #[tokio::test]
    async fn test_merge_caps_folded_quantity_at_maximum() {
        let store = MemoryCartStore::new();
        let (ledger, engine) = engine();
        let anonymous = CartOwner::Anonymous(browser());
        let user = CartOwner::Authenticated(USER);
        seed(&store, &ledger, &anonymous, &[(A, None, Quantity::MAX), (B, None, 2)]).await;
        seed(&store, &ledger, &user, &[(A, None, 1)]).await;

        let outcome = merge(&store, &engine).await;
        let expected_folded = u64::try_from(Quantity::MAX).unwrap() + 1;
        assert!(matches!(
            outcome,
            MergeOutcome::Merged { lines_folded: 2, quantity_folded, .. }
                if quantity_folded == expected_folded
        ));

        let merged = quantities(&store, &user).await.unwrap();
        assert_eq!(
            merged.get(&(A, VariantKey::NONE)).copied().map(i64::from),
            Some(Quantity::MAX)
        );
        assert_eq!(merged.get(&(B, VariantKey::NONE)), Some(&2));
        assert!(quantities(&store, &anonymous).await.is_none());

        // The customer's cart stays usable afterwards.
        let second = merge(&store, &engine).await;
        assert!(matches!(second, MergeOutcome::NoAnonymousCart { .. }));
    }

    #[tokio::test]
    async fn test_merge_into_full_line_drops_excess() {
        let store = MemoryCartStore::new();
        let (ledger, engine) = engine();
        let user = CartOwner::Authenticated(USER);
        seed(&store, &ledger, &CartOwner::Anonymous(browser()), &[(A, None, 5)]).await;
        seed(&store, &ledger, &user, &[(A, None, Quantity::MAX)]).await;

        let outcome = merge(&store, &engine).await;
        assert!(matches!(
            outcome,
            MergeOutcome::Merged {
                lines_folded: 1,
                quantity_folded: 0,
                ..
            }
        ));
        let merged = quantities(&store, &user).await.unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(
            merged.get(&(A, VariantKey::NONE)).copied().map(i64::from),
            Some(Quantity::MAX)
        );
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let store = MemoryCartStore::new();
        let (ledger, engine) = engine();
        let user = CartOwner::Authenticated(USER);
        seed(&store, &ledger, &CartOwner::Anonymous(browser()), &[(B, None, 2)]).await;

        let first = merge(&store, &engine).await;
        let after_first = quantities(&store, &user).await;
        let second = merge(&store, &engine).await;
        let after_second = quantities(&store, &user).await;

        assert!(matches!(first, MergeOutcome::Merged { .. }));
        assert!(matches!(second, MergeOutcome::NoAnonymousCart { .. }));
        assert_eq!(after_first, after_second);
        assert_eq!(first.cart().id, second.cart().id);
    }

    #[tokio::test]
    async fn test_empty_anonymous_cart_is_retired() {
        let store = MemoryCartStore::new();
        let (ledger, engine) = engine();
        let anonymous_cart = seed(&store, &ledger, &CartOwner::Anonymous(browser()), &[]).await;

        let outcome = merge(&store, &engine).await;
        assert_eq!(outcome.retired(), Some(anonymous_cart));
        assert!(matches!(outcome, MergeOutcome::RetiredEmpty { .. }));
        assert_eq!(store.cart_count().await, 1);
    }

    #[tokio::test]
    async fn test_no_anonymous_cart_creates_customer_cart() {
        let store = MemoryCartStore::new();
        let (_, engine) = engine();

        let outcome = merge(&store, &engine).await;
        assert!(matches!(outcome, MergeOutcome::NoAnonymousCart { .. }));
        assert_eq!(outcome.retired(), None);
        assert_eq!(outcome.into_cart().owner, CartOwner::Authenticated(USER));
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_both_carts_untouched() {
        let store = MemoryCartStore::new();
        let (ledger, engine) = engine();
        let anonymous = CartOwner::Anonymous(browser());
        let user = CartOwner::Authenticated(USER);
        seed(&store, &ledger, &anonymous, &[(A, None, 2)]).await;
        seed(&store, &ledger, &user, &[(A, None, 1)]).await;

        store.fail_next_commits([CartError::Transient("connection reset".into())]);
        let mut tx = store.begin().await.unwrap();
        engine
            .merge_if_needed(tx.as_mut(), &browser(), USER)
            .await
            .unwrap();
        assert!(tx.commit().await.is_err());

        let anonymous_after = quantities(&store, &anonymous).await.unwrap();
        let user_after = quantities(&store, &user).await.unwrap();
        assert_eq!(anonymous_after.get(&(A, VariantKey::NONE)), Some(&2));
        assert_eq!(user_after.get(&(A, VariantKey::NONE)), Some(&1));
    }

    /// The memory store runs one transaction at a time, so this checks the
    /// serial semantics only; `cart_postgres` covers real contention.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_merges_apply_once() {
        let store = MemoryCartStore::new();
        let (ledger, engine) = engine();
        let user = CartOwner::Authenticated(USER);
        seed(&store, &ledger, &CartOwner::Anonymous(browser()), &[(A, None, 2)]).await;
        seed(&store, &ledger, &user, &[(A, None, 1)]).await;

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let store = store.clone();
                let engine = engine.clone();
                tokio::spawn(async move { merge(&store, &engine).await })
            })
            .collect();

        let mut merged = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), MergeOutcome::Merged { .. }) {
                merged += 1;
            }
        }

        assert_eq!(merged, 1);
        let after = quantities(&store, &user).await.unwrap();
        assert_eq!(after.get(&(A, VariantKey::NONE)), Some(&3));
    }
}
