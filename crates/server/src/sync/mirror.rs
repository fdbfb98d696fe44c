//! Driver that keeps a [`MirrorState`] converged with the server cart.

use std::sync::Arc;

use tracing::{debug, instrument};

use cartfold_core::{CartItemId, OwnerId, VariantId};

use crate::cart::{CartLineView, SetQuantityOutcome};
use crate::error::CartError;
use crate::resilience::ResilientCartService;

use super::{reduce, CartAction, MirrorState};

/// One client's mirror of one owner's cart.
///
/// Mutations are confirmed-then-applied: the server call runs first and
/// the mirror only advances on success, so the mirror never shows state
/// the server rejected. When the server reports the target item missing
/// (another tab removed it) the mirror refetches once; if the item is
/// still there the call is retried exactly once, otherwise the mirror
/// has converged on the removal and the call succeeds as a no-op.
pub struct CartMirror {
    service: Arc<ResilientCartService>,
    owner: OwnerId,
    state: MirrorState,
}

impl CartMirror {
    /// Create a mirror for the given owner, starting from the initial
    /// (never-loaded) state.
    #[must_use]
    pub fn new(service: Arc<ResilientCartService>, owner: OwnerId) -> Self {
        Self {
            service,
            owner,
            state: MirrorState::initial(),
        }
    }

    /// Current mirror state.
    #[must_use]
    pub fn state(&self) -> &MirrorState {
        &self.state
    }

    fn apply(&mut self, action: CartAction) {
        self.state = reduce(&self.state, action);
    }

    /// Replace the mirror with a fresh server snapshot.
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn refresh(&mut self) -> Result<(), CartError> {
        self.apply(CartAction::LoadStarted);
        match self.service.fetch(&self.owner).await {
            Ok(snapshot) => {
                self.apply(CartAction::SetCart(snapshot));
                Ok(())
            }
            Err(e) => {
                self.apply(CartAction::LoadFailed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Add units of a variant and mirror the confirmed line.
    pub async fn add(&mut self, variant_id: VariantId, quantity: u32) -> Result<(), CartError> {
        let item = self.service.add(&self.owner, variant_id, quantity).await?;
        self.apply(CartAction::ItemAdded(CartLineView::from_item(&item, None)));
        Ok(())
    }

    /// Replace an item's quantity, reconciling a concurrent removal.
    pub async fn set_quantity(
        &mut self,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<(), CartError> {
        match self.service.set_quantity(&self.owner, item_id, quantity).await {
            Ok(outcome) => {
                self.apply_outcome(outcome);
                Ok(())
            }
            Err(CartError::ItemNotFound(_)) => {
                debug!(item_id = %item_id, "item vanished, refetching before retry");
                self.refresh().await?;
                if self.state.items.iter().any(|item| item.id == item_id) {
                    let outcome = self
                        .service
                        .set_quantity(&self.owner, item_id, quantity)
                        .await?;
                    self.apply_outcome(outcome);
                } // else: converged, the item was removed elsewhere
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Remove an item, reconciling a concurrent removal.
    pub async fn remove(&mut self, item_id: CartItemId) -> Result<(), CartError> {
        match self.service.remove(&self.owner, item_id).await {
            Ok(()) => {
                self.apply(CartAction::ItemRemoved(item_id));
                Ok(())
            }
            Err(CartError::ItemNotFound(_)) => {
                // Already gone; resync so the mirror agrees.
                self.refresh().await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Clear the cart.
    pub async fn clear(&mut self) -> Result<(), CartError> {
        self.service.clear(&self.owner).await?;
        self.apply(CartAction::CartCleared);
        Ok(())
    }

    fn apply_outcome(&mut self, outcome: SetQuantityOutcome) {
        match outcome {
            SetQuantityOutcome::Updated(item) => {
                self.apply(CartAction::ItemUpdated(CartLineView::from_item(&item, None)));
            }
            SetQuantityOutcome::Removed(item_id) => {
                self.apply(CartAction::ItemRemoved(item_id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rust_decimal::Decimal;

    use super::*;
    use crate::cart::CartService;
    use crate::catalog::MemoryCatalog;
    use crate::config::ResilienceConfig;
    use crate::store::MemoryCartStore;
    use crate::sync::{cart_item_count, CartPhase};

    struct Harness {
        service: Arc<ResilientCartService>,
        store: Arc<MemoryCartStore>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryCartStore::new());
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.insert(VariantId::new(1), "Widget", Decimal::new(1000, 2), 10);
        let policy = ResilienceConfig {
            max_attempts: 1,
            base_backoff: Duration::from_millis(1),
            ..ResilienceConfig::default()
        };
        Harness {
            service: Arc::new(ResilientCartService::new(
                CartService::new(store.clone(), catalog),
                policy,
            )),
            store,
        }
    }

    fn guest() -> OwnerId {
        OwnerId::guest("g1")
    }

    #[tokio::test]
    async fn test_mirror_tracks_confirmed_mutations() {
        let h = harness();
        let mut mirror = CartMirror::new(h.service.clone(), guest());

        mirror.refresh().await.unwrap();
        assert_eq!(mirror.state().phase, CartPhase::Ready);

        mirror.add(VariantId::new(1), 2).await.unwrap();
        assert_eq!(cart_item_count(mirror.state()), 2);

        let item_id = mirror.state().items[0].id;
        mirror.set_quantity(item_id, 5).await.unwrap();
        assert_eq!(cart_item_count(mirror.state()), 5);

        // The mirror agrees with a fresh server snapshot
        let server = h.service.fetch(&guest()).await.unwrap();
        assert_eq!(server.item_count, 5);

        mirror.remove(item_id).await.unwrap();
        assert!(mirror.state().items.is_empty());
    }

    #[tokio::test]
    async fn test_vanished_item_converges_to_removed() {
        let h = harness();
        let mut mirror = CartMirror::new(h.service.clone(), guest());
        mirror.add(VariantId::new(1), 2).await.unwrap();
        let item_id = mirror.state().items[0].id;

        // Another tab removes the item behind the mirror's back
        h.service.remove(&guest(), item_id).await.unwrap();

        // The update converges on the removal instead of failing
        mirror.set_quantity(item_id, 5).await.unwrap();
        assert!(mirror.state().items.is_empty());
        assert_eq!(mirror.state().phase, CartPhase::Ready);
    }

    #[tokio::test]
    async fn test_spurious_not_found_is_retried_once() {
        let h = harness();
        let mut mirror = CartMirror::new(h.service.clone(), guest());
        mirror.add(VariantId::new(1), 2).await.unwrap();
        let item_id = mirror.state().items[0].id;

        // The first lookup claims the item is gone even though it is not
        h.store
            .inject_fault(CartError::ItemNotFound(item_id))
            .await;

        mirror.set_quantity(item_id, 4).await.unwrap();
        assert_eq!(cart_item_count(mirror.state()), 4);

        let server = h.service.fetch(&guest()).await.unwrap();
        assert_eq!(server.item_count, 4);
    }

    #[tokio::test]
    async fn test_double_remove_resyncs() {
        let h = harness();
        let mut mirror = CartMirror::new(h.service.clone(), guest());
        mirror.add(VariantId::new(1), 1).await.unwrap();
        let item_id = mirror.state().items[0].id;

        h.service.remove(&guest(), item_id).await.unwrap();
        mirror.remove(item_id).await.unwrap();
        assert!(mirror.state().items.is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_enters_error_phase() {
        let h = harness();
        let mut mirror = CartMirror::new(h.service.clone(), guest());
        h.store
            .inject_fault(CartError::Transient("connection reset".into()))
            .await;

        assert!(mirror.refresh().await.is_err());
        assert_eq!(mirror.state().phase, CartPhase::Error);
        assert!(mirror.state().last_error.is_some());
    }
}
