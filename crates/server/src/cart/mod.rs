//! Cart mutation coordination.
//!
//! [`CartService`] is the single write path for carts: it validates
//! input, hydrates variants from the catalog, applies the advisory stock
//! check, and delegates the atomic read-modify-write to the store. The
//! guest-to-user merge lives in [`merge`].
//!
//! Stock validation here is check-then-act: the snapshot is re-read on
//! every mutating call but never reserved, so two owners racing for the
//! last unit can both succeed. That race is documented and accepted;
//! per-owner consistency is what the store guarantees.

pub mod merge;

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::instrument;

use cartfold_core::{CartItemId, OwnerId, Price, VariantId};

use crate::catalog::Catalog;
use crate::error::CartError;
use crate::store::{CartItem, CartStore, UpsertMode};

/// One hydrated cart line as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartLineView {
    pub id: CartItemId,
    pub variant_id: VariantId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Price,
    pub line_total: Decimal,
    /// Current available stock, when the catalog could be reached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<u32>,
}

impl CartLineView {
    /// Hydrate a view from a stored item and an optional stock snapshot.
    #[must_use]
    pub fn from_item(item: &CartItem, available: Option<u32>) -> Self {
        Self {
            id: item.id,
            variant_id: item.variant_id,
            product_name: item.product_name.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            line_total: item.unit_price.line_total(item.quantity),
            available,
        }
    }
}

/// A hydrated view of one owner's cart.
#[derive(Debug, Clone, Serialize)]
pub struct CartSnapshot {
    pub items: Vec<CartLineView>,
    pub subtotal: Decimal,
    pub item_count: u32,
    /// Per-owner revision; newer snapshots carry strictly larger values.
    pub revision: u64,
    /// True when this is a cached snapshot served while the store is
    /// unreachable (see the resilience layer).
    pub degraded: bool,
}

impl CartSnapshot {
    /// An empty, non-degraded cart.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            items: Vec::new(),
            subtotal: Decimal::ZERO,
            item_count: 0,
            revision: 0,
            degraded: false,
        }
    }
}

/// Result of a `set_quantity` call.
#[derive(Debug, Clone, PartialEq)]
pub enum SetQuantityOutcome {
    /// Quantity replaced; the item id is unchanged.
    Updated(CartItem),
    /// Quantity was zero or less; the item was removed.
    Removed(CartItemId),
}

/// Applies add/update/remove operations against the cart store with
/// per-key serialization (delegated to the store) and stock validation.
#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn CartStore>,
    catalog: Arc<dyn Catalog>,
}

impl CartService {
    /// Create a service over the given store and catalog.
    #[must_use]
    pub fn new(store: Arc<dyn CartStore>, catalog: Arc<dyn Catalog>) -> Self {
        Self { store, catalog }
    }

    /// Fetch the hydrated cart for an owner.
    ///
    /// Per-item stock hydration is best-effort: a catalog miss leaves
    /// `available` unset rather than failing the whole fetch.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn fetch(&self, owner: &OwnerId) -> Result<CartSnapshot, CartError> {
        let items = self.store.get(owner).await?;
        let revision = self.store.revision(owner).await?;

        let mut views = Vec::with_capacity(items.len());
        for item in &items {
            let available = match self.catalog.variant(item.variant_id).await {
                Ok(info) => info.map(|i| i.available),
                Err(e) => {
                    tracing::warn!(variant_id = %item.variant_id, error = %e, "stock hydration failed");
                    None
                }
            };
            views.push(CartLineView::from_item(item, available));
        }

        let subtotal = views.iter().map(|v| v.line_total).sum();
        let item_count = views.iter().map(|v| v.quantity).sum();

        Ok(CartSnapshot {
            items: views,
            subtotal,
            item_count,
            revision,
            degraded: false,
        })
    }

    /// Add `quantity` units of a variant to the owner's cart.
    ///
    /// If the owner already has an item for the variant its quantity
    /// increases; otherwise a new item is created. The stock check covers
    /// the combined quantity.
    #[instrument(skip(self), fields(owner = %owner, variant_id = %variant_id))]
    pub async fn add(
        &self,
        owner: &OwnerId,
        variant_id: VariantId,
        quantity: u32,
    ) -> Result<CartItem, CartError> {
        if quantity == 0 {
            return Err(CartError::Validation(
                "Quantity must be positive".to_string(),
            ));
        }

        let info = self
            .catalog
            .variant(variant_id)
            .await?
            .ok_or(CartError::VariantNotFound(variant_id))?;

        let current = self
            .store
            .find_by_variant(owner, variant_id)
            .await?
            .map_or(0, |item| item.quantity);

        let requested = current.saturating_add(quantity);
        if requested > info.available {
            return Err(CartError::Stock {
                available: info.available.saturating_sub(current),
            });
        }

        self.store
            .upsert_by_variant(
                owner,
                variant_id,
                quantity,
                UpsertMode::Delta,
                &info.product_name,
                info.unit_price,
            )
            .await
    }

    /// Replace an item's quantity; zero removes the item.
    ///
    /// Returns `ItemNotFound` when the item no longer exists (e.g.,
    /// removed by a concurrent call from another tab) - callers may
    /// refetch and retry exactly once.
    #[instrument(skip(self), fields(owner = %owner, item_id = %item_id))]
    pub async fn set_quantity(
        &self,
        owner: &OwnerId,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<SetQuantityOutcome, CartError> {
        if quantity == 0 {
            return if self.store.remove_item(owner, item_id).await? {
                Ok(SetQuantityOutcome::Removed(item_id))
            } else {
                Err(CartError::ItemNotFound(item_id))
            };
        }

        let item = self
            .store
            .find_item(owner, item_id)
            .await?
            .ok_or(CartError::ItemNotFound(item_id))?;

        let info = self
            .catalog
            .variant(item.variant_id)
            .await?
            .ok_or(CartError::VariantNotFound(item.variant_id))?;

        if quantity > info.available {
            return Err(CartError::Stock {
                available: info.available,
            });
        }

        self.store
            .set_item_quantity(owner, item_id, quantity)
            .await?
            .map(SetQuantityOutcome::Updated)
            .ok_or(CartError::ItemNotFound(item_id))
    }

    /// Remove an item unconditionally.
    #[instrument(skip(self), fields(owner = %owner, item_id = %item_id))]
    pub async fn remove(&self, owner: &OwnerId, item_id: CartItemId) -> Result<(), CartError> {
        if self.store.remove_item(owner, item_id).await? {
            Ok(())
        } else {
            Err(CartError::ItemNotFound(item_id))
        }
    }

    /// Remove every item in the owner's cart.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn clear(&self, owner: &OwnerId) -> Result<(), CartError> {
        self.store.clear(owner).await
    }

    pub(crate) fn store(&self) -> &Arc<dyn CartStore> {
        &self.store
    }

    pub(crate) fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }
}
