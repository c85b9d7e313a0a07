//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::cart::catalog::Catalog;
use crate::cart::identity::{IdentityResolver, SessionValidator};
use crate::cart::store::CartStore;
use crate::cart::CartService;
use crate::config::StorefrontConfig;
use crate::db::{PgCartStore, PgCatalog, PgSessionValidator};

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// the cart service, the identity resolver, and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    carts: CartService,
    identity: IdentityResolver,
}

impl AppState {
    /// Create application state backed by `PostgreSQL`.
    ///
    /// # Arguments
    ///
    /// * `config` - Storefront configuration
    /// * `pool` - `PostgreSQL` connection pool
    #[must_use]
    pub fn new(config: StorefrontConfig, pool: PgPool) -> Self {
        Self::with_backends(
            config,
            Arc::new(PgCartStore::new(pool.clone())),
            Arc::new(PgCatalog::new(pool.clone())),
            Arc::new(PgSessionValidator::new(pool)),
        )
    }

    /// Create application state over arbitrary backends.
    #[must_use]
    pub fn with_backends(
        config: StorefrontConfig,
        store: Arc<dyn CartStore>,
        catalog: Arc<dyn Catalog>,
        sessions: Arc<dyn SessionValidator>,
    ) -> Self {
        let carts = CartService::new(store, catalog, config.cart.conflict_attempts);
        let identity = IdentityResolver::new(sessions, config.cookie_settings());

        Self {
            inner: Arc::new(AppStateInner {
                config,
                carts,
                identity,
            }),
        }
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the cart service.
    #[must_use]
    pub fn carts(&self) -> &CartService {
        &self.inner.carts
    }

    /// Get a reference to the identity resolver.
    #[must_use]
    pub fn identity(&self) -> &IdentityResolver {
        &self.inner.identity
    }
}
