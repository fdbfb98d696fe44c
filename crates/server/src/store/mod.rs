//! Durable cart storage.
//!
//! [`CartStore`] is the injectable seam between the mutation coordinator
//! and persistence: [`MemoryCartStore`] backs tests (and can inject
//! faults for resilience testing), [`PgCartStore`] is the production
//! implementation.
//!
//! # Concurrency contract
//!
//! Every mutating operation must be atomic per `(owner, variant)` key:
//! two concurrent `upsert_by_variant` calls for the same pair must both
//! be reflected in the final quantity. The memory store serializes all
//! access behind one async mutex; the Postgres store relies on an atomic
//! `ON CONFLICT .. DO UPDATE` increment.
//!
//! Every successful mutation bumps the owner's revision counter, which
//! snapshots carry so clients can discard stale in-flight responses.

mod memory;
mod postgres;

pub use memory::MemoryCartStore;
pub use postgres::PgCartStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use cartfold_core::{CartItemId, OwnerId, Price, VariantId};

use crate::error::CartError;

/// A single cart line item as stored.
///
/// Invariants: `quantity > 0` while the row exists; `(owner, variant_id)`
/// is unique; `id` is stable for the item's entire lifetime, including
/// across the guest-to-user re-keying performed by merge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartItem {
    pub id: CartItemId,
    pub owner: OwnerId,
    pub variant_id: VariantId,
    pub quantity: u32,
    /// Unit price snapshot taken when the item was first added.
    pub unit_price: Price,
    pub product_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How `upsert_by_variant` combines the given quantity with an existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertMode {
    /// Replace the stored quantity.
    Absolute,
    /// Add to the stored quantity (creates the row if absent).
    Delta,
}

/// Durable association of `(owner, variant) -> quantity`.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// All items for an owner, ordered by creation time.
    async fn get(&self, owner: &OwnerId) -> Result<Vec<CartItem>, CartError>;

    /// Look up an item by variant.
    async fn find_by_variant(
        &self,
        owner: &OwnerId,
        variant_id: VariantId,
    ) -> Result<Option<CartItem>, CartError>;

    /// Look up an item by id.
    async fn find_item(
        &self,
        owner: &OwnerId,
        item_id: CartItemId,
    ) -> Result<Option<CartItem>, CartError>;

    /// Create or update the row for `(owner, variant_id)` atomically.
    ///
    /// The resulting quantity must be positive; callers are responsible
    /// for routing zero quantities to removal instead.
    async fn upsert_by_variant(
        &self,
        owner: &OwnerId,
        variant_id: VariantId,
        quantity: u32,
        mode: UpsertMode,
        product_name: &str,
        unit_price: Price,
    ) -> Result<CartItem, CartError>;

    /// Replace an item's quantity, preserving its id.
    ///
    /// Returns `None` when the item no longer exists (deleted by a
    /// concurrent call).
    async fn set_item_quantity(
        &self,
        owner: &OwnerId,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<Option<CartItem>, CartError>;

    /// Delete an item. Returns whether a row was actually removed.
    async fn remove_item(&self, owner: &OwnerId, item_id: CartItemId) -> Result<bool, CartError>;

    /// Delete all items for an owner.
    async fn clear(&self, owner: &OwnerId) -> Result<(), CartError>;

    /// Move an item to a different owner, preserving its id (merge).
    ///
    /// Returns `None` when the item no longer exists under `from`.
    /// Fails if `to` already has a row for the same variant; merge
    /// resolves that case by summing quantities instead.
    async fn rekey_item(
        &self,
        from: &OwnerId,
        item_id: CartItemId,
        to: &OwnerId,
    ) -> Result<Option<CartItem>, CartError>;

    /// Current revision counter for an owner (0 if never mutated).
    async fn revision(&self, owner: &OwnerId) -> Result<u64, CartError>;
}
