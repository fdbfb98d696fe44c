//! Cart ownership identity.
//!
//! Every cart row belongs to an [`OwnerId`]: either an ephemeral guest
//! token minted for an anonymous shopper, or the user id of an
//! authenticated account. The transition is one-directional - a guest
//! becomes a user at login, never the reverse within a session. After
//! merge-on-login the guest token is logically dead: nothing purges it,
//! it is simply never read again.

use serde::{Deserialize, Serialize};

use crate::types::id::UserId;

/// Opaque token identifying an anonymous shopper's cart.
///
/// Minted server-side, persisted client-side (session cookie), and
/// treated as a bearer credential for exactly one cart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuestToken(String);

impl GuestToken {
    /// Wrap an existing token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GuestToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for GuestToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// The identity a cart belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum OwnerId {
    /// Anonymous shopper identified by an ephemeral token.
    Guest(GuestToken),
    /// Authenticated account.
    User(UserId),
}

impl OwnerId {
    /// Convenience constructor for a guest owner.
    #[must_use]
    pub fn guest(token: impl Into<String>) -> Self {
        Self::Guest(GuestToken::new(token))
    }

    /// Convenience constructor for an authenticated owner.
    #[must_use]
    pub const fn user(id: UserId) -> Self {
        Self::User(id)
    }

    /// Whether this owner is an anonymous guest.
    #[must_use]
    pub const fn is_guest(&self) -> bool {
        matches!(self, Self::Guest(_))
    }

    /// Stable storage key for this owner.
    ///
    /// Used as the partition key in every cart store implementation, so
    /// guest and user carts can never collide even if a token happens to
    /// be numeric.
    #[must_use]
    pub fn storage_key(&self) -> String {
        match self {
            Self::Guest(token) => format!("guest:{token}"),
            Self::User(id) => format!("user:{id}"),
        }
    }

    /// Parse a storage key produced by [`Self::storage_key`].
    #[must_use]
    pub fn from_storage_key(key: &str) -> Option<Self> {
        if let Some(token) = key.strip_prefix("guest:") {
            (!token.is_empty()).then(|| Self::guest(token))
        } else if let Some(id) = key.strip_prefix("user:") {
            id.parse::<i64>().ok().map(|id| Self::User(UserId::new(id)))
        } else {
            None
        }
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}
