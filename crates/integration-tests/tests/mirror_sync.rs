//! Client mirror synchronization against the real service stack.

#![allow(clippy::unwrap_used)]

use cartfold_core::{OwnerId, VariantId};
use cartfold_integration_tests::{seed_variant, spawn_app};
use cartfold_server::sync::{CartAction, CartMirror, MirrorState, cart_item_count, reduce};

fn owner() -> OwnerId {
    OwnerId::guest("tabs")
}

#[tokio::test]
async fn test_two_tabs_converge_on_removal() {
    let app = spawn_app();
    seed_variant(&app.catalog, 1, "Widget", 1000, 10);

    let mut tab_a = CartMirror::new(app.cart.clone(), owner());
    let mut tab_b = CartMirror::new(app.cart.clone(), owner());

    tab_a.add(VariantId::new(1), 2).await.unwrap();
    tab_b.refresh().await.unwrap();
    assert_eq!(cart_item_count(tab_b.state()), 2);
    let item_id = tab_b.state().items[0].id;

    // Tab A removes while tab B still shows the item
    tab_a.remove(item_id).await.unwrap();

    // Tab B's update converges on the removal instead of erroring
    tab_b.set_quantity(item_id, 5).await.unwrap();
    assert!(tab_b.state().items.is_empty());
    assert!(app.cart.fetch(&owner()).await.unwrap().items.is_empty());
}

#[tokio::test]
async fn test_stale_snapshot_does_not_roll_back_the_mirror() {
    let app = spawn_app();
    seed_variant(&app.catalog, 1, "Widget", 1000, 10);

    app.cart.add(&owner(), VariantId::new(1), 1).await.unwrap();
    let old = app.cart.fetch(&owner()).await.unwrap();

    app.cart.add(&owner(), VariantId::new(1), 2).await.unwrap();
    let new = app.cart.fetch(&owner()).await.unwrap();
    assert!(new.revision > old.revision);

    // The newer response lands first; the stale one must be dropped
    let state = reduce(&MirrorState::initial(), CartAction::SetCart(new.clone()));
    let state = reduce(&state, CartAction::SetCart(old));
    assert_eq!(state.revision, new.revision);
    assert_eq!(cart_item_count(&state), 3);
}

#[tokio::test]
async fn test_mirror_totals_match_server_snapshot() {
    let app = spawn_app();
    seed_variant(&app.catalog, 1, "Widget", 1000, 10);
    seed_variant(&app.catalog, 2, "Gadget", 250, 10);

    let mut mirror = CartMirror::new(app.cart.clone(), owner());
    mirror.add(VariantId::new(1), 2).await.unwrap();
    mirror.add(VariantId::new(2), 4).await.unwrap();

    let server = app.cart.fetch(&owner()).await.unwrap();
    assert_eq!(cart_item_count(mirror.state()), server.item_count);
    assert_eq!(
        cartfold_server::sync::cart_subtotal(mirror.state()),
        server.subtotal
    );
}
