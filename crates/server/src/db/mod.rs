//! Database pool construction for the cart engine.
//!
//! # Tables
//!
//! - `cart_items` - one row per `(owner_key, variant_id)` pair
//! - `cart_revisions` - per-owner monotonic revision counter
//! - `sessions` - tower-sessions storage (created by the session store migration)
//!
//! Migrations live in `crates/server/migrations/` and run on startup.

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
