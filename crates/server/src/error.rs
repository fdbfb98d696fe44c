//! Unified error handling with Sentry integration.
//!
//! [`CartError`] is the domain taxonomy shared by every layer of the cart
//! engine; [`AppError`] adapts it (plus request-level failures) into HTTP
//! responses. Server-class errors are captured to Sentry before the
//! response is produced. All route handlers return `Result<T, AppError>`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use cartfold_core::{CartItemId, VariantId};

/// Domain errors for cart operations.
///
/// The split between [`Self::Transient`] and [`Self::Permanent`] drives
/// the retry policy: transient failures are retried with backoff, all
/// other variants propagate immediately.
#[derive(Debug, Clone, Error)]
pub enum CartError {
    /// Malformed input. Not retryable.
    #[error("{0}")]
    Validation(String),

    /// The requested variant does not exist in the catalog.
    #[error("Unknown variant: {0}")]
    VariantNotFound(VariantId),

    /// The cart item no longer exists (e.g., removed by a concurrent call).
    #[error("Cart item not found: {0}")]
    ItemNotFound(CartItemId),

    /// Requested quantity exceeds available stock.
    ///
    /// `available` is the maximum *additional* quantity the caller could
    /// still request, so UIs can render "Only {n} more available".
    #[error("Insufficient stock. Only {available} items available")]
    Stock {
        /// Maximum permissible additional quantity.
        available: u32,
    },

    /// Retryable infrastructure failure (timeout, connection loss).
    #[error("transient store failure: {0}")]
    Transient(String),

    /// Non-retryable persistence fault.
    #[error("store failure: {0}")]
    Permanent(String),

    /// The resilience layer short-circuited the call (circuit open or
    /// retries exhausted).
    #[error("cart service unavailable")]
    Unavailable,
}

impl CartError {
    /// Whether the retry policy may re-attempt the operation.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<sqlx::Error> for CartError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Transient(err.to_string()),
            other => Self::Permanent(other.to_string()),
        }
    }
}

/// Application-level error type for the HTTP surface.
#[derive(Debug, Error)]
pub enum AppError {
    /// Cart operation failed.
    #[error(transparent)]
    Cart(#[from] CartError),

    /// No cart identity could be resolved.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        if matches!(
            self,
            Self::Internal(_) | Self::Cart(CartError::Permanent(_))
        ) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let status = match &self {
            Self::Cart(err) => match err {
                CartError::Validation(_) => StatusCode::BAD_REQUEST,
                CartError::VariantNotFound(_) | CartError::ItemNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                CartError::Stock { .. } => StatusCode::CONFLICT,
                CartError::Transient(_) | CartError::Unavailable => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                CartError::Permanent(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Don't expose internal error details to clients. Validation and
        // stock messages are written to be shown to shoppers verbatim.
        let message = match &self {
            Self::Cart(err) => match err {
                CartError::Transient(_) | CartError::Unavailable => {
                    "Cart service is temporarily unavailable. Please try again.".to_string()
                }
                CartError::Permanent(_) => "Internal server error".to_string(),
                other => other.to_string(),
            },
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_cart_error_display() {
        let err = CartError::Stock { available: 3 };
        assert_eq!(err.to_string(), "Insufficient stock. Only 3 items available");

        let err = CartError::Validation("Quantity must be positive".to_string());
        assert_eq!(err.to_string(), "Quantity must be positive");
    }

    #[test]
    fn test_transient_classification() {
        assert!(CartError::Transient("timeout".into()).is_transient());
        assert!(!CartError::Permanent("corrupt".into()).is_transient());
        assert!(!CartError::Stock { available: 1 }.is_transient());
        assert!(!CartError::Validation("bad".into()).is_transient());
        assert!(!CartError::Unavailable.is_transient());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            status_of(CartError::Validation("x".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(CartError::VariantNotFound(VariantId::new(1)).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(CartError::ItemNotFound(CartItemId::generate()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(CartError::Stock { available: 2 }.into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(CartError::Unavailable.into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(AppError::Unauthorized("no identity".into())),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_sqlx_error_classification() {
        let err: CartError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_transient());

        let err: CartError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, CartError::Permanent(_)));
    }
}
