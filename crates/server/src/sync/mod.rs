//! Client-side cart mirror synchronization.
//!
//! Clients keep a local mirror of the cart so the UI renders without a
//! round trip. The mirror is a pure state machine: [`reduce`] folds
//! [`CartAction`]s into a [`MirrorState`], and the derived totals are
//! plain functions over that state. [`CartMirror`] drives the machine
//! against the server-side service and encodes the reconciliation rules
//! (stale snapshots are dropped, a vanished item triggers exactly one
//! refetch-and-retry).

mod mirror;

pub use mirror::CartMirror;

use rust_decimal::Decimal;
use serde::Serialize;

use cartfold_core::CartItemId;

use crate::cart::{CartLineView, CartSnapshot};

/// Lifecycle phase of the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CartPhase {
    /// No load attempted yet.
    Idle,
    /// A full snapshot fetch is in flight.
    Loading,
    /// The mirror reflects a server snapshot plus any confirmed mutations.
    Ready,
    /// The last load failed; `last_error` holds the reason.
    Error,
}

/// The client's local copy of the cart.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorState {
    pub phase: CartPhase,
    pub items: Vec<CartLineView>,
    /// Revision of the snapshot the mirror is based on. Snapshots older
    /// than this are stale echoes and are ignored.
    pub revision: u64,
    /// True while the server is serving cached data.
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl MirrorState {
    /// The initial, never-loaded state.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            phase: CartPhase::Idle,
            items: Vec::new(),
            revision: 0,
            degraded: false,
            last_error: None,
        }
    }
}

impl Default for MirrorState {
    fn default() -> Self {
        Self::initial()
    }
}

/// One event applied to the mirror.
#[derive(Debug, Clone)]
pub enum CartAction {
    /// A snapshot fetch started.
    LoadStarted,
    /// A full server snapshot arrived.
    SetCart(CartSnapshot),
    /// The server confirmed an add; carries the resulting line.
    ItemAdded(CartLineView),
    /// The server confirmed a quantity change; carries the updated line.
    ItemUpdated(CartLineView),
    /// The server confirmed a removal.
    ItemRemoved(CartItemId),
    /// The server confirmed a full clear.
    CartCleared,
    /// A snapshot fetch failed.
    LoadFailed(String),
}

/// Fold one action into the state. Pure; the input state is untouched.
#[must_use]
pub fn reduce(state: &MirrorState, action: CartAction) -> MirrorState {
    let mut next = state.clone();
    match action {
        CartAction::LoadStarted => {
            next.phase = CartPhase::Loading;
            next.last_error = None;
        }
        CartAction::SetCart(snapshot) => {
            // Out-of-order responses: a snapshot older than what the
            // mirror already shows must not roll confirmed state back.
            if state.phase == CartPhase::Ready && snapshot.revision < state.revision {
                return next;
            }
            next.phase = CartPhase::Ready;
            next.items = snapshot.items;
            next.revision = snapshot.revision;
            next.degraded = snapshot.degraded;
            next.last_error = None;
        }
        CartAction::ItemAdded(line) => {
            // An add for a variant already mirrored replaces that line
            // (the server merged the quantities into one row).
            if let Some(existing) = next
                .items
                .iter_mut()
                .find(|item| item.variant_id == line.variant_id)
            {
                *existing = line;
            } else {
                next.items.push(line);
            }
            next.phase = CartPhase::Ready;
        }
        CartAction::ItemUpdated(line) => {
            if let Some(existing) = next.items.iter_mut().find(|item| item.id == line.id) {
                *existing = line;
            }
        }
        CartAction::ItemRemoved(item_id) => {
            next.items.retain(|item| item.id != item_id);
        }
        CartAction::CartCleared => {
            next.items.clear();
        }
        CartAction::LoadFailed(reason) => {
            next.phase = CartPhase::Error;
            next.last_error = Some(reason);
        }
    }
    next
}

/// Subtotal over the mirrored lines.
#[must_use]
pub fn cart_subtotal(state: &MirrorState) -> Decimal {
    state.items.iter().map(|item| item.line_total).sum()
}

/// Total unit count over the mirrored lines.
#[must_use]
pub fn cart_item_count(state: &MirrorState) -> u32 {
    state
        .items
        .iter()
        .fold(0u32, |sum, item| sum.saturating_add(item.quantity))
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use cartfold_core::{CurrencyCode, Price, VariantId};

    use super::*;

    fn line(id: CartItemId, variant: i64, quantity: u32) -> CartLineView {
        let unit_price = Price::new(Decimal::new(500, 2), CurrencyCode::USD);
        CartLineView {
            id,
            variant_id: VariantId::new(variant),
            product_name: "Widget".to_string(),
            quantity,
            unit_price,
            line_total: unit_price.line_total(quantity),
            available: None,
        }
    }

    fn snapshot(items: Vec<CartLineView>, revision: u64) -> CartSnapshot {
        let subtotal = items.iter().map(|i| i.line_total).sum();
        let item_count = items.iter().map(|i| i.quantity).sum();
        CartSnapshot {
            items,
            subtotal,
            item_count,
            revision,
            degraded: false,
        }
    }

    #[test]
    fn test_load_lifecycle() {
        let state = MirrorState::initial();
        assert_eq!(state.phase, CartPhase::Idle);

        let state = reduce(&state, CartAction::LoadStarted);
        assert_eq!(state.phase, CartPhase::Loading);

        let state = reduce(
            &state,
            CartAction::SetCart(snapshot(vec![line(CartItemId::generate(), 1, 2)], 5)),
        );
        assert_eq!(state.phase, CartPhase::Ready);
        assert_eq!(state.revision, 5);
        assert_eq!(state.items.len(), 1);
    }

    #[test]
    fn test_load_failed_keeps_items() {
        let state = reduce(
            &MirrorState::initial(),
            CartAction::SetCart(snapshot(vec![line(CartItemId::generate(), 1, 2)], 3)),
        );
        let state = reduce(&state, CartAction::LoadFailed("boom".to_string()));
        assert_eq!(state.phase, CartPhase::Error);
        assert_eq!(state.last_error.as_deref(), Some("boom"));
        // Stale-but-present data beats an empty screen.
        assert_eq!(state.items.len(), 1);
    }

    #[test]
    fn test_stale_snapshot_is_ignored() {
        let newer = reduce(
            &MirrorState::initial(),
            CartAction::SetCart(snapshot(vec![line(CartItemId::generate(), 1, 3)], 7)),
        );
        let after = reduce(&newer, CartAction::SetCart(snapshot(Vec::new(), 6)));
        assert_eq!(after.revision, 7);
        assert_eq!(after.items.len(), 1, "older snapshot must not win");
    }

    #[test]
    fn test_item_added_dedupes_by_variant() {
        let first = line(CartItemId::generate(), 1, 1);
        let state = reduce(&MirrorState::initial(), CartAction::ItemAdded(first.clone()));

        // Same variant, same id, merged quantity from the server
        let merged = line(first.id, 1, 3);
        let state = reduce(&state, CartAction::ItemAdded(merged));
        assert_eq!(state.items.len(), 1);
        assert_eq!(state.items.first().map(|i| i.quantity), Some(3));

        let state = reduce(&state, CartAction::ItemAdded(line(CartItemId::generate(), 2, 1)));
        assert_eq!(state.items.len(), 2);
    }

    #[test]
    fn test_item_updated_and_removed() {
        let a = line(CartItemId::generate(), 1, 1);
        let b = line(CartItemId::generate(), 2, 2);
        let state = reduce(&MirrorState::initial(), CartAction::ItemAdded(a.clone()));
        let state = reduce(&state, CartAction::ItemAdded(b.clone()));

        let state = reduce(&state, CartAction::ItemUpdated(line(a.id, 1, 9)));
        assert_eq!(
            state.items.iter().find(|i| i.id == a.id).map(|i| i.quantity),
            Some(9)
        );

        let state = reduce(&state, CartAction::ItemRemoved(b.id));
        assert_eq!(state.items.len(), 1);

        let state = reduce(&state, CartAction::CartCleared);
        assert!(state.items.is_empty());
    }

    #[test]
    fn test_update_for_unknown_item_is_a_no_op() {
        let state = reduce(
            &MirrorState::initial(),
            CartAction::ItemUpdated(line(CartItemId::generate(), 1, 5)),
        );
        assert!(state.items.is_empty());
    }

    #[test]
    fn test_derived_totals() {
        let state = reduce(
            &MirrorState::initial(),
            CartAction::ItemAdded(line(CartItemId::generate(), 1, 2)),
        );
        let state = reduce(
            &state,
            CartAction::ItemAdded(line(CartItemId::generate(), 2, 3)),
        );

        assert_eq!(cart_item_count(&state), 5);
        // 5 units at 5.00 each
        assert_eq!(cart_subtotal(&state), Decimal::new(2500, 2));
    }

    #[test]
    fn test_reduce_does_not_mutate_input() {
        let before = reduce(
            &MirrorState::initial(),
            CartAction::ItemAdded(line(CartItemId::generate(), 1, 1)),
        );
        let _ = reduce(&before, CartAction::CartCleared);
        assert_eq!(before.items.len(), 1);
    }
}
