//! Cart route handlers.
//!
//! JSON API over the resilient cart service. Every handler resolves the
//! owner from the session first; a login detected during resolution
//! triggers the guest-cart merge in the background, so no request waits
//! on it.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_sessions::Session;
use tracing::instrument;

use cartfold_core::{CartItemId, OwnerId, VariantId};

use crate::cart::{CartLineView, CartSnapshot, SetQuantityOutcome};
use crate::error::{AppError, Result};
use crate::identity;
use crate::state::AppState;

/// Query parameters for `GET /cart`.
#[derive(Debug, Deserialize)]
pub struct ShowCartQuery {
    /// When true, fail with 401 instead of minting a guest identity.
    #[serde(default)]
    pub existing_only: bool,
    /// Explicit guest token, overriding the one stored in the session.
    pub owner_token: Option<String>,
}

/// Body of `POST /cart/add`.
#[derive(Debug, Deserialize)]
pub struct AddToCartRequest {
    pub variant_id: VariantId,
    /// Defaults to 1.
    pub quantity: Option<u32>,
    /// Explicit guest token, overriding the one stored in the session.
    pub owner_token: Option<String>,
}

/// Body of `POST /cart/update`.
#[derive(Debug, Deserialize)]
pub struct UpdateCartRequest {
    pub item_id: CartItemId,
    /// Zero or negative removes the item.
    pub quantity: i64,
    /// Explicit guest token, overriding the one stored in the session.
    pub owner_token: Option<String>,
}

/// Body of `POST /cart/remove`.
#[derive(Debug, Deserialize)]
pub struct RemoveFromCartRequest {
    pub item_id: CartItemId,
    /// Explicit guest token, overriding the one stored in the session.
    pub owner_token: Option<String>,
}

/// Body of `POST /cart/clear`.
#[derive(Debug, Deserialize)]
pub struct ClearCartRequest {
    /// Explicit acknowledgement; guards against an accidental empty POST.
    #[serde(default)]
    pub clear_all: bool,
    /// Explicit guest token, overriding the one stored in the session.
    pub owner_token: Option<String>,
}

/// Response of `POST /cart/update`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum UpdateCartResponse {
    Updated(CartLineView),
    Removed { removed: CartItemId },
}

/// Resolve the request's owner and kick off merge-on-login when due.
///
/// The merge marker is set before the merge is spawned: a merge that
/// fails leaves its items in the guest cart for a later session instead
/// of re-running on every request of this one.
async fn resolve_owner(state: &AppState, session: &Session, explicit_token: Option<&str>) -> OwnerId {
    let resolution = identity::resolve(session, explicit_token).await;

    if let (OwnerId::User(user_id), Some(guest)) = (&resolution.owner, resolution.merge_from) {
        identity::mark_merged(session, *user_id).await;

        let cart = state.cart().clone();
        let user = resolution.owner.clone();
        tokio::spawn(async move {
            if let Err(e) = cart.merge(&guest, &user).await {
                tracing::warn!(guest = %guest, user = %user, error = %e, "background cart merge failed");
            }
        });
    }

    resolution.owner
}

/// Fetch the cart snapshot.
///
/// With `existing_only=true`, a request with no resolvable identity is
/// rejected with 401 instead of minting a guest token (and thereby an
/// empty cart) as a side effect.
#[instrument(skip(state, session))]
pub async fn show(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<ShowCartQuery>,
) -> Result<Json<CartSnapshot>> {
    let owner = if query.existing_only {
        identity::resolve_existing(&session, query.owner_token.as_deref())
            .await
            .ok_or_else(|| AppError::Unauthorized("no cart identity".to_string()))?
    } else {
        resolve_owner(&state, &session, query.owner_token.as_deref()).await
    };

    let snapshot = state.cart().fetch(&owner).await?;
    Ok(Json(snapshot))
}

/// Add a variant to the cart.
#[instrument(skip(state, session))]
pub async fn add(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<AddToCartRequest>,
) -> Result<Json<CartLineView>> {
    let owner = resolve_owner(&state, &session, request.owner_token.as_deref()).await;
    let quantity = request.quantity.unwrap_or(1);

    let item = state.cart().add(&owner, request.variant_id, quantity).await?;
    Ok(Json(CartLineView::from_item(&item, None)))
}

/// Replace an item's quantity; zero or negative removes it.
#[instrument(skip(state, session))]
pub async fn update(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<UpdateCartRequest>,
) -> Result<Json<UpdateCartResponse>> {
    let owner = resolve_owner(&state, &session, request.owner_token.as_deref()).await;
    let quantity = u32::try_from(request.quantity.max(0))
        .map_err(|_| AppError::BadRequest("quantity out of range".to_string()))?;

    let outcome = state.cart().set_quantity(&owner, request.item_id, quantity).await?;
    Ok(Json(match outcome {
        SetQuantityOutcome::Updated(item) => {
            UpdateCartResponse::Updated(CartLineView::from_item(&item, None))
        }
        SetQuantityOutcome::Removed(item_id) => UpdateCartResponse::Removed { removed: item_id },
    }))
}

/// Remove an item from the cart.
#[instrument(skip(state, session))]
pub async fn remove(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<RemoveFromCartRequest>,
) -> Result<Json<Value>> {
    let owner = resolve_owner(&state, &session, request.owner_token.as_deref()).await;
    state.cart().remove(&owner, request.item_id).await?;
    Ok(Json(json!({ "removed": request.item_id })))
}

/// Remove every item from the cart.
#[instrument(skip(state, session))]
pub async fn clear(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<ClearCartRequest>,
) -> Result<Json<Value>> {
    if !request.clear_all {
        return Err(AppError::BadRequest(
            "clear_all must be true to clear the cart".to_string(),
        ));
    }

    let owner = resolve_owner(&state, &session, request.owner_token.as_deref()).await;
    state.cart().clear(&owner).await?;
    Ok(Json(json!({ "cleared": true })))
}
