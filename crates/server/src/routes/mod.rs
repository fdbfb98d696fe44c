//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /cart          - Fetch the cart snapshot (`existing_only=true` to
//!                       reject instead of minting a guest identity)
//! POST /cart/add      - Add a variant to the cart
//! POST /cart/update   - Replace an item's quantity (<= 0 removes)
//! POST /cart/remove   - Remove an item
//! POST /cart/clear    - Clear the cart (requires `clear_all: true`)
//! ```
//!
//! Health endpoints (`/health`, `/health/ready`) are registered by the
//! binary, next to the listener they describe.

pub mod cart;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show))
        .route("/add", post(cart::add))
        .route("/update", post(cart::update))
        .route("/remove", post(cart::remove))
        .route("/clear", post(cart::clear))
}

/// Create the complete application router.
pub fn routes() -> Router<AppState> {
    Router::new().nest("/cart", cart_routes())
}
