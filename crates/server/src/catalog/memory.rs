//! In-memory catalog for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use cartfold_core::{CurrencyCode, Price, VariantId};

use crate::error::CartError;

use super::{Catalog, VariantInfo};

/// Fixed catalog backed by a map; stock levels can be adjusted mid-test.
#[derive(Default)]
pub struct MemoryCatalog {
    variants: Mutex<HashMap<VariantId, VariantInfo>>,
}

impl MemoryCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a variant with the given price (USD) and stock.
    pub fn insert(&self, variant_id: VariantId, product_name: &str, unit_price: rust_decimal::Decimal, available: u32) {
        let info = VariantInfo {
            variant_id,
            product_name: product_name.to_string(),
            unit_price: Price::new(unit_price, CurrencyCode::USD),
            available,
        };
        if let Ok(mut variants) = self.variants.lock() {
            variants.insert(variant_id, info);
        }
    }

    /// Change the available stock for a registered variant.
    pub fn set_available(&self, variant_id: VariantId, available: u32) {
        if let Ok(mut variants) = self.variants.lock()
            && let Some(info) = variants.get_mut(&variant_id)
        {
            info.available = available;
        }
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn variant(&self, variant_id: VariantId) -> Result<Option<VariantInfo>, CartError> {
        let variants = self
            .variants
            .lock()
            .map_err(|_| CartError::Permanent("catalog lock poisoned".to_string()))?;
        Ok(variants.get(&variant_id).cloned())
    }
}
