//! Shared type definitions.
//!
//! All types here are plain data: serializable, cheaply cloneable, and
//! free of I/O so they can cross every layer boundary.

pub mod id;
pub mod owner;
pub mod price;

pub use id::{CartItemId, UserId, VariantId};
pub use owner::{GuestToken, OwnerId};
pub use price::{CurrencyCode, Price};
