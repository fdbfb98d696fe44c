//! Product catalog and stock snapshot access.
//!
//! The cart engine never owns product data: names, prices, and aggregate
//! stock come from the upstream catalog API through the [`Catalog`] seam.
//! Stock is advisory - it is re-read on every mutating call but never
//! reserved, so a race between two owners claiming the last unit is an
//! accepted limitation.

mod http;
mod memory;

pub use http::HttpCatalog;
pub use memory::MemoryCatalog;

use async_trait::async_trait;

use cartfold_core::{Price, VariantId};

use crate::error::CartError;

/// A purchasable variant, hydrated from the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantInfo {
    pub variant_id: VariantId,
    pub product_name: String,
    pub unit_price: Price,
    /// Available quantity, aggregated across inventory locations.
    pub available: u32,
}

/// Read-only access to variants and their stock snapshots.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Look up a variant. `None` means the variant is unknown.
    async fn variant(&self, variant_id: VariantId) -> Result<Option<VariantInfo>, CartError>;
}
