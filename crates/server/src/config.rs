//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CARTFOLD_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `CARTFOLD_BASE_URL` - Public URL for the service (drives secure cookies)
//! - `CARTFOLD_SESSION_SECRET` - Session signing secret (min 32 chars)
//! - `CATALOG_BASE_URL` - Base URL of the upstream catalog/inventory API
//!
//! ## Optional
//! - `CARTFOLD_HOST` - Bind address (default: 127.0.0.1)
//! - `CARTFOLD_PORT` - Listen port (default: 4000)
//! - `CART_CALL_TIMEOUT_MS` - Per-call deadline (default: 2000)
//! - `CART_MAX_ATTEMPTS` - Retry attempts for transient failures (default: 3)
//! - `CART_BASE_BACKOFF_MS` - First backoff delay (default: 100, doubles per attempt)
//! - `CART_BREAKER_THRESHOLD` - Consecutive transient failures before the circuit opens (default: 5)
//! - `CART_BREAKER_OPEN_SECS` - Circuit cooldown (default: 30)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment tag

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

const MIN_SESSION_SECRET_LENGTH: usize = 32;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-", "changeme", "replace", "placeholder", "example", "secret", "password", "todo",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Cartfold application configuration.
#[derive(Debug, Clone)]
pub struct CartfoldConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the service
    pub base_url: String,
    /// Session signing secret
    pub session_secret: SecretString,
    /// Upstream catalog API configuration
    pub catalog: CatalogConfig,
    /// Resilience policy tuning for cart store access
    pub resilience: ResilienceConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment tag
    pub sentry_environment: Option<String>,
}

/// Upstream catalog/inventory API configuration.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Base URL of the catalog API (e.g., <https://catalog.internal>)
    pub base_url: String,
}

/// Tuning for the resilient access layer.
#[derive(Debug, Clone, Copy)]
pub struct ResilienceConfig {
    /// Bounded deadline per store/catalog call.
    pub call_timeout: Duration,
    /// Maximum attempts for transient failures (1 = no retry).
    pub max_attempts: u32,
    /// First backoff delay; doubles on every subsequent attempt.
    pub base_backoff: Duration,
    /// Consecutive transient failures before the circuit opens.
    pub breaker_failure_threshold: u32,
    /// How long the circuit stays open before a half-open probe.
    pub breaker_open_duration: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(2000),
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
            breaker_failure_threshold: 5,
            breaker_open_duration: Duration::from_secs(30),
        }
    }
}

impl CartfoldConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid,
    /// or if secrets fail validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("CARTFOLD_DATABASE_URL")?;
        let host = get_env_or_default("CARTFOLD_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("CARTFOLD_HOST".to_string(), e.to_string()))?;
        let port = parse_env_or_default("CARTFOLD_PORT", 4000u16)?;
        let base_url = get_required_env("CARTFOLD_BASE_URL")?;
        let session_secret = get_validated_secret("CARTFOLD_SESSION_SECRET")?;
        validate_session_secret(&session_secret, "CARTFOLD_SESSION_SECRET")?;

        let catalog = CatalogConfig {
            base_url: get_required_env("CATALOG_BASE_URL")?,
        };
        let resilience = ResilienceConfig::from_env()?;
        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            session_secret,
            catalog,
            resilience,
            sentry_dsn,
            sentry_environment,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl ResilienceConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            call_timeout: Duration::from_millis(parse_env_or_default(
                "CART_CALL_TIMEOUT_MS",
                u64::try_from(defaults.call_timeout.as_millis()).unwrap_or(2000),
            )?),
            max_attempts: parse_env_or_default("CART_MAX_ATTEMPTS", defaults.max_attempts)?,
            base_backoff: Duration::from_millis(parse_env_or_default(
                "CART_BASE_BACKOFF_MS",
                u64::try_from(defaults.base_backoff.as_millis()).unwrap_or(100),
            )?),
            breaker_failure_threshold: parse_env_or_default(
                "CART_BREAKER_THRESHOLD",
                defaults.breaker_failure_threshold,
            )?,
            breaker_open_duration: Duration::from_secs(parse_env_or_default(
                "CART_BREAKER_OPEN_SECS",
                defaults.breaker_open_duration.as_secs(),
            )?),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to a default when unset.
fn parse_env_or_default<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Validate that a session secret meets minimum length requirements.
fn validate_session_secret(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_SESSION_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_SESSION_SECRET_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Load a secret from the environment, rejecting obvious placeholders.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    let lower = value.to_lowercase();
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                key.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }
    Ok(SecretString::from(value))
}
