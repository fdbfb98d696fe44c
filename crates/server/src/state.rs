//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::cart::CartService;
use crate::catalog::HttpCatalog;
use crate::config::CartfoldConfig;
use crate::resilience::ResilientCartService;
use crate::store::PgCartStore;

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`; handlers only ever see the cart service
/// behind its resilience wrapper.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: CartfoldConfig,
    /// Absent when the state is built over in-memory implementations.
    pool: Option<PgPool>,
    cart: Arc<ResilientCartService>,
}

impl AppState {
    /// Create a new application state wired to Postgres and the upstream
    /// catalog.
    #[must_use]
    pub fn new(config: CartfoldConfig, pool: PgPool) -> Self {
        let store = Arc::new(PgCartStore::new(pool.clone()));
        let catalog = Arc::new(HttpCatalog::new(&config.catalog));
        let cart = Arc::new(ResilientCartService::new(
            CartService::new(store, catalog),
            config.resilience,
        ));

        Self {
            inner: Arc::new(AppStateInner {
                config,
                pool: Some(pool),
                cart,
            }),
        }
    }

    /// Build state around an already-wrapped cart service and no database
    /// pool. Used by tests to swap in in-memory implementations.
    #[must_use]
    pub fn with_cart_service(config: CartfoldConfig, cart: Arc<ResilientCartService>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                pool: None,
                cart,
            }),
        }
    }

    /// Get a reference to the configuration.
    #[must_use]
    pub fn config(&self) -> &CartfoldConfig {
        &self.inner.config
    }

    /// Get the database connection pool, when one is attached.
    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }

    /// Get the cart service (behind the resilience wrapper).
    #[must_use]
    pub fn cart(&self) -> &Arc<ResilientCartService> {
        &self.inner.cart
    }
}
