//! Integration test harness for Cartfold.
//!
//! Builds the full HTTP application over in-memory store, catalog, and
//! session implementations, so the tests under `tests/` exercise the
//! real router, extractors, identity resolution, and error mapping
//! without needing `PostgreSQL` or the upstream catalog.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cartfold-integration-tests
//! ```

// Test harness: unwraps on infrastructure setup are intentional.
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{Method, Request, StatusCode};
use rust_decimal::Decimal;
use serde_json::Value;
use tower::ServiceExt;
use tower_sessions::{MemoryStore, SessionManagerLayer};

use cartfold_core::VariantId;
use cartfold_server::cart::CartService;
use cartfold_server::catalog::MemoryCatalog;
use cartfold_server::config::{CartfoldConfig, CatalogConfig, ResilienceConfig};
use cartfold_server::resilience::ResilientCartService;
use cartfold_server::routes;
use cartfold_server::state::AppState;
use cartfold_server::store::MemoryCartStore;

/// The assembled application plus handles to its in-memory backends.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryCartStore>,
    pub catalog: Arc<MemoryCatalog>,
    pub cart: Arc<ResilientCartService>,
}

/// Configuration suitable for tests (no real endpoints are contacted).
#[must_use]
pub fn test_config() -> CartfoldConfig {
    CartfoldConfig {
        database_url: secrecy::SecretString::from("postgres://localhost/cartfold_test"),
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        base_url: "http://localhost:4000".to_string(),
        session_secret: secrecy::SecretString::from("0123456789abcdef0123456789abcdef"),
        catalog: CatalogConfig {
            base_url: "http://localhost:9".to_string(),
        },
        resilience: fast_resilience(),
        sentry_dsn: None,
        sentry_environment: None,
    }
}

/// Resilience tuning with short deadlines and backoffs so failure-path
/// tests finish quickly.
#[must_use]
pub fn fast_resilience() -> ResilienceConfig {
    ResilienceConfig {
        call_timeout: Duration::from_millis(500),
        max_attempts: 2,
        base_backoff: Duration::from_millis(1),
        breaker_failure_threshold: 10,
        breaker_open_duration: Duration::from_millis(50),
    }
}

/// Build the application over in-memory backends.
#[must_use]
pub fn spawn_app() -> TestApp {
    let store = Arc::new(MemoryCartStore::new());
    let catalog = Arc::new(MemoryCatalog::new());
    let cart = Arc::new(ResilientCartService::new(
        CartService::new(store.clone(), catalog.clone()),
        fast_resilience(),
    ));
    let state = AppState::with_cart_service(test_config(), cart.clone());

    let session_layer = SessionManagerLayer::new(MemoryStore::default()).with_secure(false);

    let router = routes::routes().layer(session_layer).with_state(state);

    TestApp {
        router,
        store,
        catalog,
        cart,
    }
}

/// Register a variant priced in USD.
pub fn seed_variant(catalog: &MemoryCatalog, id: i64, name: &str, price_cents: i64, available: u32) {
    catalog.insert(
        VariantId::new(id),
        name,
        Decimal::new(price_cents, 2),
        available,
    );
}

/// Minimal HTTP client over the in-process router.
///
/// Carries the session cookie across requests, like a browser tab. Two
/// clients over the same router model two independent sessions.
pub struct TestClient {
    router: Router,
    cookie: Option<String>,
}

impl TestClient {
    #[must_use]
    pub fn new(app: &TestApp) -> Self {
        Self {
            router: app.router.clone(),
            cookie: None,
        }
    }

    /// Issue a GET and parse the JSON body (null for empty bodies).
    pub async fn get(&mut self, uri: &str) -> (StatusCode, Value) {
        let request = self
            .builder(Method::GET, uri)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// Issue a JSON POST and parse the JSON body.
    pub async fn post(&mut self, uri: &str, body: &Value) -> (StatusCode, Value) {
        let request = self
            .builder(Method::POST, uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    fn builder(&self, method: Method, uri: &str) -> axum::http::request::Builder {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = &self.cookie {
            builder = builder.header(COOKIE, cookie.clone());
        }
        builder
    }

    async fn send(&mut self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();

        if let Some(set_cookie) = response.headers().get(SET_COOKIE) {
            let raw = set_cookie.to_str().unwrap();
            // Keep only the name=value pair; attributes don't go back
            let pair = raw.split(';').next().unwrap_or(raw).to_string();
            self.cookie = Some(pair);
        }

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}
