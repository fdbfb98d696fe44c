//! HTTP catalog client.
//!
//! Fetches variant data from the upstream catalog API with `reqwest` and
//! caches hydrated variants in `moka`. The TTL is short: stock staleness
//! is tolerated (checks are advisory) but should stay in the
//! tens-of-seconds range, not minutes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, instrument};

use cartfold_core::{CurrencyCode, Price, VariantId};

use crate::config::CatalogConfig;
use crate::error::CartError;

use super::{Catalog, VariantInfo};

const VARIANT_CACHE_CAPACITY: u64 = 10_000;
const VARIANT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Client for the upstream catalog/inventory API.
#[derive(Clone)]
pub struct HttpCatalog {
    inner: Arc<HttpCatalogInner>,
}

struct HttpCatalogInner {
    client: reqwest::Client,
    base_url: String,
    cache: Cache<VariantId, VariantInfo>,
}

/// Wire format of `GET {base}/variants/{id}`.
#[derive(Debug, Deserialize)]
struct VariantPayload {
    id: i64,
    product_name: String,
    unit_price: Decimal,
    currency: String,
    /// Per-location availability; the snapshot the cart sees is the sum.
    inventory_levels: Vec<InventoryLevel>,
}

#[derive(Debug, Deserialize)]
struct InventoryLevel {
    available: u32,
}

impl HttpCatalog {
    /// Create a new catalog client.
    #[must_use]
    pub fn new(config: &CatalogConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(VARIANT_CACHE_CAPACITY)
            .time_to_live(VARIANT_CACHE_TTL)
            .build();

        Self {
            inner: Arc::new(HttpCatalogInner {
                client: reqwest::Client::new(),
                base_url: config.base_url.trim_end_matches('/').to_string(),
                cache,
            }),
        }
    }

    async fn fetch_variant(&self, variant_id: VariantId) -> Result<Option<VariantInfo>, CartError> {
        let url = format!("{}/variants/{variant_id}", self.inner.base_url);

        let response = self
            .inner
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CartError::Transient(format!("catalog request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            // 5xx from the catalog is worth retrying; 4xx is not.
            if status.is_server_error() {
                return Err(CartError::Transient(format!(
                    "catalog returned {status}"
                )));
            }
            return Err(CartError::Permanent(format!("catalog returned {status}")));
        }

        let payload: VariantPayload = response
            .json()
            .await
            .map_err(|e| CartError::Permanent(format!("malformed catalog response: {e}")))?;

        let currency = CurrencyCode::from_code(&payload.currency).ok_or_else(|| {
            CartError::Permanent(format!("unknown currency code: {}", payload.currency))
        })?;

        let available = payload
            .inventory_levels
            .iter()
            .fold(0u32, |sum, level| sum.saturating_add(level.available));

        Ok(Some(VariantInfo {
            variant_id: VariantId::new(payload.id),
            product_name: payload.product_name,
            unit_price: Price::new(payload.unit_price, currency),
            available,
        }))
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    #[instrument(skip(self), fields(variant_id = %variant_id))]
    async fn variant(&self, variant_id: VariantId) -> Result<Option<VariantInfo>, CartError> {
        if let Some(info) = self.inner.cache.get(&variant_id).await {
            debug!("Cache hit for variant");
            return Ok(Some(info));
        }

        let info = self.fetch_variant(variant_id).await?;

        // Only positive lookups are cached; unknown variants stay uncached
        // so a late catalog publish shows up immediately.
        if let Some(info) = &info {
            self.inner.cache.insert(variant_id, info.clone()).await;
        }

        Ok(info)
    }
}
