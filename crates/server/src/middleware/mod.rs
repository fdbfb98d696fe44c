//! Middleware for the cart server.

pub mod session;

pub use session::create_session_layer;
