//! Merge-on-login: folding a guest cart into an authenticated user's cart.
//!
//! Runs in the background after the identity resolver reports a
//! guest-to-user transition. Per-item failures never abort the rest of
//! the merge and never escalate - login must not be blocked by cart
//! trouble. Idempotent by construction: a second invocation finds an
//! empty guest cart and does nothing.

use serde::Serialize;
use tracing::instrument;

use cartfold_core::{OwnerId, VariantId};

use crate::error::CartError;
use crate::store::CartItem;

use super::CartService;

/// Outcome of one merge run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    /// Items re-keyed from the guest cart (variant absent in user cart).
    pub moved: u32,
    /// Items whose quantities were summed into an existing user item.
    pub merged: u32,
    /// Of the merged items, how many were clamped to available stock.
    pub clamped: u32,
    /// Per-item failures; non-fatal by design.
    pub failures: Vec<MergeFailure>,
}

/// A single item that could not be merged.
#[derive(Debug, Clone, Serialize)]
pub struct MergeFailure {
    pub variant_id: VariantId,
    pub reason: String,
}

impl MergeReport {
    /// Whether every item merged cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl CartService {
    /// Fold the guest cart into the user cart.
    ///
    /// For each guest item: if the user cart already holds the same
    /// variant, quantities are summed and clamped to available stock and
    /// the guest row is removed; otherwise the item is re-keyed to the
    /// user (moved, id preserved).
    ///
    /// # Errors
    ///
    /// Only the initial read of the guest cart can fail the call as a
    /// whole; everything after that degrades to entries in
    /// [`MergeReport::failures`].
    #[instrument(skip(self), fields(guest = %guest, user = %user))]
    pub async fn merge(&self, guest: &OwnerId, user: &OwnerId) -> Result<MergeReport, CartError> {
        let guest_items = self.store().get(guest).await?;
        let mut report = MergeReport::default();

        for item in guest_items {
            match self.merge_one(guest, user, &item, &mut report).await {
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(
                        variant_id = %item.variant_id,
                        error = %e,
                        "cart merge: item failed, continuing"
                    );
                    report.failures.push(MergeFailure {
                        variant_id: item.variant_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if report.is_clean() {
            tracing::info!(
                moved = report.moved,
                merged = report.merged,
                clamped = report.clamped,
                "cart merge complete"
            );
        } else {
            tracing::warn!(
                moved = report.moved,
                merged = report.merged,
                failures = report.failures.len(),
                "cart merge completed with failures"
            );
        }
        Ok(report)
    }

    async fn merge_one(
        &self,
        guest: &OwnerId,
        user: &OwnerId,
        item: &CartItem,
        report: &mut MergeReport,
    ) -> Result<(), CartError> {
        let existing = self.store().find_by_variant(user, item.variant_id).await?;

        match existing {
            Some(existing) => {
                let summed = existing.quantity.saturating_add(item.quantity);
                // Clamp to the stock snapshot when the catalog is
                // reachable; if it is not, keep the sum - the next
                // mutating call re-checks anyway.
                let target = match self.catalog().variant(item.variant_id).await {
                    Ok(Some(info)) => summed.min(info.available.max(existing.quantity)),
                    Ok(None) | Err(_) => summed,
                };

                if self
                    .store()
                    .set_item_quantity(user, existing.id, target)
                    .await?
                    .is_none()
                {
                    // The user item vanished mid-merge; fall back to moving
                    // the guest item wholesale.
                    self.store().rekey_item(guest, item.id, user).await?;
                    report.moved += 1;
                    return Ok(());
                }
                self.store().remove_item(guest, item.id).await?;
                report.merged += 1;
                if target < summed {
                    report.clamped += 1;
                }
            }
            None => {
                self.store().rekey_item(guest, item.id, user).await?;
                report.moved += 1;
            }
        }
        Ok(())
    }
}
