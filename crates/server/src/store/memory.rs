//! In-memory cart store.
//!
//! Backs unit and integration tests, and doubles as a fault-injection
//! harness for exercising the resilience layer: queued errors are
//! returned (and consumed) one per operation, and an artificial latency
//! can be set to trip per-call deadlines.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use cartfold_core::{CartItemId, OwnerId, Price, VariantId};

use crate::error::CartError;
use crate::store::{CartItem, CartStore, UpsertMode};

#[derive(Default)]
struct OwnerCart {
    /// Insertion-ordered; `get` returns items oldest first.
    items: Vec<CartItem>,
    revision: u64,
}

#[derive(Default)]
struct Inner {
    carts: HashMap<String, OwnerCart>,
    fault_queue: VecDeque<CartError>,
}

/// In-memory [`CartStore`] implementation.
///
/// All access is serialized behind a single async mutex, which trivially
/// satisfies the per-key atomicity contract.
#[derive(Default)]
pub struct MemoryCartStore {
    inner: Mutex<Inner>,
    /// Artificial latency in milliseconds applied before every operation.
    delay_ms: AtomicU64,
}

impl MemoryCartStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error to be returned by the next operation.
    ///
    /// Errors are consumed in FIFO order, one per operation.
    pub async fn inject_fault(&self, err: CartError) {
        self.inner.lock().await.fault_queue.push_back(err);
    }

    /// Apply an artificial delay before every subsequent operation.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    /// Number of queued faults not yet consumed.
    pub async fn pending_faults(&self) -> usize {
        self.inner.lock().await.fault_queue.len()
    }

    async fn begin(&self) -> Result<tokio::sync::MutexGuard<'_, Inner>, CartError> {
        let delay_ms = self.delay_ms.load(Ordering::Relaxed);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        let mut inner = self.inner.lock().await;
        if let Some(err) = inner.fault_queue.pop_front() {
            return Err(err);
        }
        Ok(inner)
    }
}

impl Inner {
    fn cart_mut(&mut self, owner: &OwnerId) -> &mut OwnerCart {
        self.carts.entry(owner.storage_key()).or_default()
    }
}

#[async_trait]
impl CartStore for MemoryCartStore {
    async fn get(&self, owner: &OwnerId) -> Result<Vec<CartItem>, CartError> {
        let inner = self.begin().await?;
        Ok(inner
            .carts
            .get(&owner.storage_key())
            .map(|cart| cart.items.clone())
            .unwrap_or_default())
    }

    async fn find_by_variant(
        &self,
        owner: &OwnerId,
        variant_id: VariantId,
    ) -> Result<Option<CartItem>, CartError> {
        let inner = self.begin().await?;
        Ok(inner.carts.get(&owner.storage_key()).and_then(|cart| {
            cart.items
                .iter()
                .find(|item| item.variant_id == variant_id)
                .cloned()
        }))
    }

    async fn find_item(
        &self,
        owner: &OwnerId,
        item_id: CartItemId,
    ) -> Result<Option<CartItem>, CartError> {
        let inner = self.begin().await?;
        Ok(inner.carts.get(&owner.storage_key()).and_then(|cart| {
            cart.items.iter().find(|item| item.id == item_id).cloned()
        }))
    }

    async fn upsert_by_variant(
        &self,
        owner: &OwnerId,
        variant_id: VariantId,
        quantity: u32,
        mode: UpsertMode,
        product_name: &str,
        unit_price: Price,
    ) -> Result<CartItem, CartError> {
        let mut inner = self.begin().await?;
        let cart = inner.cart_mut(owner);
        let now = Utc::now();

        let item = if let Some(existing) =
            cart.items.iter_mut().find(|item| item.variant_id == variant_id)
        {
            let new_quantity = match mode {
                UpsertMode::Absolute => quantity,
                UpsertMode::Delta => existing.quantity.saturating_add(quantity),
            };
            if new_quantity == 0 {
                return Err(CartError::Validation(
                    "Quantity must be positive".to_string(),
                ));
            }
            existing.quantity = new_quantity;
            existing.updated_at = now;
            existing.clone()
        } else {
            if quantity == 0 {
                return Err(CartError::Validation(
                    "Quantity must be positive".to_string(),
                ));
            }
            let item = CartItem {
                id: CartItemId::generate(),
                owner: owner.clone(),
                variant_id,
                quantity,
                unit_price,
                product_name: product_name.to_string(),
                created_at: now,
                updated_at: now,
            };
            cart.items.push(item.clone());
            item
        };

        cart.revision += 1;
        Ok(item)
    }

    async fn set_item_quantity(
        &self,
        owner: &OwnerId,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<Option<CartItem>, CartError> {
        if quantity == 0 {
            return Err(CartError::Validation(
                "Quantity must be positive".to_string(),
            ));
        }
        let mut inner = self.begin().await?;
        let cart = inner.cart_mut(owner);
        let Some(item) = cart.items.iter_mut().find(|item| item.id == item_id) else {
            return Ok(None);
        };
        item.quantity = quantity;
        item.updated_at = Utc::now();
        let item = item.clone();
        cart.revision += 1;
        Ok(Some(item))
    }

    async fn remove_item(&self, owner: &OwnerId, item_id: CartItemId) -> Result<bool, CartError> {
        let mut inner = self.begin().await?;
        let cart = inner.cart_mut(owner);
        let before = cart.items.len();
        cart.items.retain(|item| item.id != item_id);
        let removed = cart.items.len() < before;
        if removed {
            cart.revision += 1;
        }
        Ok(removed)
    }

    async fn clear(&self, owner: &OwnerId) -> Result<(), CartError> {
        let mut inner = self.begin().await?;
        let cart = inner.cart_mut(owner);
        if !cart.items.is_empty() {
            cart.items.clear();
            cart.revision += 1;
        }
        Ok(())
    }

    async fn rekey_item(
        &self,
        from: &OwnerId,
        item_id: CartItemId,
        to: &OwnerId,
    ) -> Result<Option<CartItem>, CartError> {
        let mut inner = self.begin().await?;

        let Some(mut item) = inner
            .carts
            .get(&from.storage_key())
            .and_then(|cart| cart.items.iter().find(|item| item.id == item_id).cloned())
        else {
            return Ok(None);
        };

        // Conflict check before touching either cart, so a failed rekey
        // leaves both carts unchanged.
        let conflict = inner.carts.get(&to.storage_key()).is_some_and(|cart| {
            cart.items
                .iter()
                .any(|existing| existing.variant_id == item.variant_id)
        });
        if conflict {
            return Err(CartError::Permanent(format!(
                "variant {} already present for {to}",
                item.variant_id
            )));
        }

        let from_cart = inner.cart_mut(from);
        from_cart.items.retain(|existing| existing.id != item_id);
        from_cart.revision += 1;

        item.owner = to.clone();
        item.updated_at = Utc::now();
        let to_cart = inner.cart_mut(to);
        to_cart.items.push(item.clone());
        to_cart.revision += 1;
        Ok(Some(item))
    }

    async fn revision(&self, owner: &OwnerId) -> Result<u64, CartError> {
        let inner = self.begin().await?;
        Ok(inner
            .carts
            .get(&owner.storage_key())
            .map_or(0, |cart| cart.revision))
    }
}
