//! Login flow tests: identity resolution driving merge-on-login.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use tower_sessions::{MemoryStore, Session};

use cartfold_core::{OwnerId, UserId, VariantId};
use cartfold_integration_tests::{seed_variant, spawn_app};
use cartfold_server::error::CartError;
use cartfold_server::identity;

fn session() -> Session {
    Session::new(None, Arc::new(MemoryStore::default()), None)
}

#[tokio::test]
async fn test_login_merges_guest_cart_once() {
    // Browse as guest, log in, carts fold together with stock clamping
    let app = spawn_app();
    seed_variant(&app.catalog, 1, "Widget", 500, 10);
    let session = session();

    let guest = identity::resolve(&session, None).await.owner;
    app.cart.add(&guest, VariantId::new(1), 2).await.unwrap();

    let user = OwnerId::user(UserId::new(42));
    app.cart.add(&user, VariantId::new(1), 1).await.unwrap();

    // Stock drops before the login happens
    app.catalog.set_available(VariantId::new(1), 2);

    identity::set_current_user(&session, UserId::new(42))
        .await
        .unwrap();
    let resolution = identity::resolve(&session, None).await;
    assert_eq!(resolution.owner, user);
    let merge_from = resolution.merge_from.clone().expect("merge is pending");
    assert_eq!(merge_from, guest);

    identity::mark_merged(&session, UserId::new(42)).await;
    let report = app.cart.merge(&merge_from, &user).await.unwrap();
    assert_eq!(report.merged, 1);
    assert_eq!(report.clamped, 1);

    let user_cart = app.cart.fetch(&user).await.unwrap();
    assert_eq!(user_cart.item_count, 2, "summed then clamped to stock");
    assert!(app.cart.fetch(&guest).await.unwrap().items.is_empty());

    // Same session never offers the merge again
    assert!(identity::resolve(&session, None).await.merge_from.is_none());
}

#[tokio::test]
async fn test_failed_merge_items_survive_for_a_later_session() {
    let app = spawn_app();
    seed_variant(&app.catalog, 1, "Widget", 500, 10);
    seed_variant(&app.catalog, 2, "Gadget", 900, 10);
    let first = session();

    let guest = identity::resolve(&first, None).await.owner;
    let guest_token = match &guest {
        OwnerId::Guest(token) => token.as_str().to_string(),
        OwnerId::User(_) => unreachable!("resolver minted a guest"),
    };
    app.cart.add(&guest, VariantId::new(1), 1).await.unwrap();
    app.cart.add(&guest, VariantId::new(2), 1).await.unwrap();

    identity::set_current_user(&first, UserId::new(7)).await.unwrap();
    let resolution = identity::resolve(&first, None).await;
    identity::mark_merged(&first, UserId::new(7)).await;

    // One item fails mid-merge; the marker is already set, so this
    // session will not retry
    app.store
        .inject_fault(CartError::Transient("connection reset".into()))
        .await;
    let report = app
        .cart
        .merge(&guest, &resolution.owner)
        .await
        .unwrap();
    assert_eq!(report.failures.len(), 1);
    assert!(identity::resolve(&first, None).await.merge_from.is_none());
    assert_eq!(app.cart.fetch(&guest).await.unwrap().items.len(), 1);

    // A later session presenting the same token and logging in picks the
    // leftover up
    let second = session();
    identity::resolve(&second, Some(&guest_token)).await;
    identity::set_current_user(&second, UserId::new(7)).await.unwrap();
    let retry = identity::resolve(&second, None).await;
    assert_eq!(retry.merge_from, Some(guest.clone()));

    let report = app.cart.merge(&guest, &retry.owner).await.unwrap();
    assert!(report.is_clean());
    assert!(app.cart.fetch(&guest).await.unwrap().items.is_empty());
    assert_eq!(
        app.cart
            .fetch(&OwnerId::user(UserId::new(7)))
            .await
            .unwrap()
            .items
            .len(),
        2
    );
}

#[tokio::test]
async fn test_logout_returns_to_the_guest_cart() {
    let app = spawn_app();
    seed_variant(&app.catalog, 1, "Widget", 500, 10);
    let session = session();

    let guest = identity::resolve(&session, None).await.owner;
    app.cart.add(&guest, VariantId::new(1), 3).await.unwrap();

    identity::set_current_user(&session, UserId::new(9)).await.unwrap();
    assert!(identity::resolve(&session, None).await.owner != guest);

    identity::clear_current_user(&session).await.unwrap();
    let after = identity::resolve(&session, None).await;
    assert_eq!(after.owner, guest);
    assert_eq!(app.cart.fetch(&after.owner).await.unwrap().item_count, 3);
}
