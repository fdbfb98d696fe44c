//! Session-backed cart owner resolution.
//!
//! Every request resolves to exactly one [`OwnerId`]: the authenticated
//! user when one is bound to the session, otherwise a guest token. The
//! resolver is infallible by design - a request must always end up with
//! an owner, so session write failures are logged and tolerated rather
//! than propagated.
//!
//! Precedence for the guest path: an explicit token supplied by the
//! client wins over a stored one (and is persisted, replacing it); a
//! stored token wins over minting; minting is the last resort. An
//! explicit token presented while a user is logged in does not change
//! who owns the request, but it is still persisted, so the cart it
//! references can be merged in.

use rand::Rng;
use tower_sessions::Session;
use tracing::{debug, warn};

use cartfold_core::{GuestToken, OwnerId, UserId};

/// Session keys for cart identity.
pub mod session_keys {
    /// The guest token bound to this session.
    pub const GUEST_TOKEN: &str = "cart.guest_token";
    /// The authenticated user bound to this session.
    pub const CURRENT_USER: &str = "cart.current_user";
    /// The user a guest-cart merge was already triggered for, so each
    /// session merges at most once per login.
    pub const MERGED_FOR_USER: &str = "cart.merged_for_user";
}

const GUEST_TOKEN_LENGTH: usize = 32;

/// The resolved identity for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The owner all cart operations in this request run as.
    pub owner: OwnerId,
    /// When the session carries both a user and a not-yet-merged guest
    /// token, the guest owner whose cart should be folded in.
    pub merge_from: Option<OwnerId>,
}

/// Resolve the cart owner for a request, minting a guest token if the
/// session has no identity at all.
pub async fn resolve(session: &Session, explicit_token: Option<&str>) -> Resolution {
    if let Some(user_id) = current_user(session).await {
        if let Some(token) = explicit_token {
            adopt_guest_token(session, token).await;
        }
        let merge_from = pending_merge_source(session, user_id).await;
        return Resolution {
            owner: OwnerId::user(user_id),
            merge_from,
        };
    }

    let owner = match guest_owner(session, explicit_token).await {
        Some(owner) => owner,
        None => {
            let token = generate_guest_token();
            debug!("minted guest token for new session");
            persist_guest_token(session, &token).await;
            OwnerId::Guest(GuestToken::new(token))
        }
    };
    Resolution {
        owner,
        merge_from: None,
    }
}

/// Resolve the cart owner only if the session already has an identity.
///
/// Backs read paths that must not create carts as a side effect: `None`
/// means there is no user, no stored token, and no explicit token, and
/// the caller should reject the request rather than mint.
pub async fn resolve_existing(session: &Session, explicit_token: Option<&str>) -> Option<OwnerId> {
    if let Some(user_id) = current_user(session).await {
        return Some(OwnerId::user(user_id));
    }
    guest_owner(session, explicit_token).await
}

/// Bind an authenticated user to the session (login).
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn set_current_user(
    session: &Session,
    user_id: UserId,
) -> Result<(), tower_sessions::session::Error> {
    session.insert(session_keys::CURRENT_USER, user_id).await
}

/// Remove the authenticated user from the session (logout).
///
/// The guest token is left in place, so the session falls back to its
/// guest cart. The merge marker is cleared: a re-login may merge again.
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn clear_current_user(
    session: &Session,
) -> Result<(), tower_sessions::session::Error> {
    session
        .remove::<UserId>(session_keys::CURRENT_USER)
        .await?;
    session
        .remove::<UserId>(session_keys::MERGED_FOR_USER)
        .await?;
    Ok(())
}

/// Record that a merge was triggered for this user in this session.
///
/// Set at trigger time, before the merge actually runs: a failed merge
/// leaves its items in the guest cart, where the next session picks them
/// up, rather than re-running on every request of this one.
pub async fn mark_merged(session: &Session, user_id: UserId) {
    if let Err(e) = session.insert(session_keys::MERGED_FOR_USER, user_id).await {
        warn!(error = %e, "failed to record merge marker in session");
    }
}

async fn current_user(session: &Session) -> Option<UserId> {
    session
        .get::<UserId>(session_keys::CURRENT_USER)
        .await
        .ok()
        .flatten()
}

async fn guest_owner(session: &Session, explicit_token: Option<&str>) -> Option<OwnerId> {
    if let Some(token) = explicit_token {
        persist_guest_token(session, token).await;
        return Some(OwnerId::guest(token));
    }
    session
        .get::<String>(session_keys::GUEST_TOKEN)
        .await
        .ok()
        .flatten()
        .map(|token| OwnerId::Guest(GuestToken::new(token)))
}

/// Persist an explicit guest token presented while a user is logged in.
///
/// The user still owns the request, but the token replaces the stored
/// one. A token other than the one already merged for this user clears
/// the merge marker, so the newly referenced guest cart becomes a merge
/// source in turn.
async fn adopt_guest_token(session: &Session, token: &str) {
    let stored = session
        .get::<String>(session_keys::GUEST_TOKEN)
        .await
        .ok()
        .flatten();
    if stored.as_deref() == Some(token) {
        return;
    }
    persist_guest_token(session, token).await;
    if let Err(e) = session.remove::<UserId>(session_keys::MERGED_FOR_USER).await {
        warn!(error = %e, "failed to clear merge marker in session");
    }
}

async fn pending_merge_source(session: &Session, user_id: UserId) -> Option<OwnerId> {
    let token = session
        .get::<String>(session_keys::GUEST_TOKEN)
        .await
        .ok()
        .flatten()?;
    let merged_for = session
        .get::<UserId>(session_keys::MERGED_FOR_USER)
        .await
        .ok()
        .flatten();
    if merged_for == Some(user_id) {
        return None;
    }
    Some(OwnerId::Guest(GuestToken::new(token)))
}

async fn persist_guest_token(session: &Session, token: &str) {
    if let Err(e) = session.insert(session_keys::GUEST_TOKEN, token).await {
        warn!(error = %e, "failed to persist guest token in session");
    }
}

/// Generate an opaque guest token.
fn generate_guest_token() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..GUEST_TOKEN_LENGTH)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            // SAFETY: idx is always within bounds since random_range returns 0..CHARSET.len()
            char::from(*CHARSET.get(idx).expect("idx within bounds"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tower_sessions::{MemoryStore, Session};

    use super::*;

    fn session() -> Session {
        Session::new(None, Arc::new(MemoryStore::default()), None)
    }

    #[tokio::test]
    async fn test_resolve_mints_and_persists_guest_token() {
        let session = session();
        let first = resolve(&session, None).await;
        assert!(first.owner.is_guest());
        assert!(first.merge_from.is_none());

        // Same session resolves to the same token
        let second = resolve(&session, None).await;
        assert_eq!(second.owner, first.owner);
    }

    #[tokio::test]
    async fn test_explicit_token_wins_over_stored_and_persists() {
        let session = session();
        let stored = resolve(&session, None).await;

        let explicit = resolve(&session, Some("client-supplied-token")).await;
        assert_eq!(explicit.owner, OwnerId::guest("client-supplied-token"));
        assert_ne!(explicit.owner, stored.owner);

        // The explicit token replaced the stored one
        let after = resolve(&session, None).await;
        assert_eq!(after.owner, explicit.owner);
    }

    #[tokio::test]
    async fn test_authenticated_user_wins_over_guest_token() {
        let session = session();
        resolve(&session, None).await;
        set_current_user(&session, UserId::new(7)).await.unwrap();

        let resolution = resolve(&session, Some("side-token")).await;
        assert_eq!(resolution.owner, OwnerId::user(UserId::new(7)));
    }

    #[tokio::test]
    async fn test_explicit_token_after_login_is_adopted_as_merge_source() {
        let session = session();
        set_current_user(&session, UserId::new(7)).await.unwrap();
        assert_eq!(resolve(&session, None).await.merge_from, None);

        // The token is persisted and its cart queued for merge
        let adopted = resolve(&session, Some("kiosk-cart")).await;
        assert_eq!(adopted.owner, OwnerId::user(UserId::new(7)));
        assert_eq!(adopted.merge_from, Some(OwnerId::guest("kiosk-cart")));

        mark_merged(&session, UserId::new(7)).await;
        let again = resolve(&session, Some("kiosk-cart")).await;
        assert_eq!(again.merge_from, None, "same token merges at most once");

        // A different token resets the marker and merges in turn
        let other = resolve(&session, Some("other-cart")).await;
        assert_eq!(other.merge_from, Some(OwnerId::guest("other-cart")));
    }

    #[tokio::test]
    async fn test_merge_source_reported_once_per_login() {
        let session = session();
        let guest = resolve(&session, None).await;
        set_current_user(&session, UserId::new(7)).await.unwrap();

        let resolution = resolve(&session, None).await;
        assert_eq!(resolution.merge_from, Some(guest.owner.clone()));

        mark_merged(&session, UserId::new(7)).await;
        let again = resolve(&session, None).await;
        assert_eq!(again.merge_from, None, "merge triggers at most once");
    }

    #[tokio::test]
    async fn test_logout_clears_merge_marker() {
        let session = session();
        let guest = resolve(&session, None).await;
        set_current_user(&session, UserId::new(7)).await.unwrap();
        mark_merged(&session, UserId::new(7)).await;

        clear_current_user(&session).await.unwrap();
        let resolution = resolve(&session, None).await;
        assert_eq!(resolution.owner, guest.owner, "guest cart survives logout");

        // A fresh login may merge whatever is left in the guest cart
        set_current_user(&session, UserId::new(7)).await.unwrap();
        let relogin = resolve(&session, None).await;
        assert_eq!(relogin.merge_from, Some(guest.owner));
    }

    #[tokio::test]
    async fn test_resolve_existing_does_not_mint() {
        let session = session();
        assert_eq!(resolve_existing(&session, None).await, None);

        // Still nothing stored: the failed lookup had no side effects
        assert_eq!(resolve_existing(&session, None).await, None);

        let minted = resolve(&session, None).await;
        assert_eq!(
            resolve_existing(&session, None).await,
            Some(minted.owner)
        );
    }

    #[tokio::test]
    async fn test_resolve_existing_accepts_explicit_token() {
        let session = session();
        assert_eq!(
            resolve_existing(&session, Some("tok")).await,
            Some(OwnerId::guest("tok"))
        );
    }
}
