//! `PostgreSQL` cart store.
//!
//! The per-key atomicity contract is satisfied at the database level: the
//! delta upsert is a single `INSERT .. ON CONFLICT .. DO UPDATE` with an
//! in-place increment, so two concurrent adds for the same
//! `(owner, variant)` both land. Revision bumps share a transaction with
//! the mutation they describe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use cartfold_core::{CartItemId, CurrencyCode, OwnerId, Price, VariantId};

use crate::error::CartError;
use crate::store::{CartItem, CartStore, UpsertMode};

const COLUMNS: &str = "id, owner_key, variant_id, quantity, product_name, \
                       unit_price_amount, unit_price_currency, created_at, updated_at";

/// `PostgreSQL`-backed [`CartStore`].
#[derive(Clone)]
pub struct PgCartStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct CartItemRow {
    id: CartItemId,
    owner_key: String,
    variant_id: VariantId,
    quantity: i32,
    product_name: String,
    unit_price_amount: Decimal,
    unit_price_currency: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CartItemRow {
    fn into_item(self) -> Result<CartItem, CartError> {
        let owner = OwnerId::from_storage_key(&self.owner_key).ok_or_else(|| {
            CartError::Permanent(format!("malformed owner key: {}", self.owner_key))
        })?;
        let currency = CurrencyCode::from_code(&self.unit_price_currency).ok_or_else(|| {
            CartError::Permanent(format!(
                "unknown currency code: {}",
                self.unit_price_currency
            ))
        })?;
        let quantity = u32::try_from(self.quantity).map_err(|_| {
            CartError::Permanent(format!("negative stored quantity: {}", self.quantity))
        })?;
        Ok(CartItem {
            id: self.id,
            owner,
            variant_id: self.variant_id,
            quantity,
            unit_price: Price::new(self.unit_price_amount, currency),
            product_name: self.product_name,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl PgCartStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Bump the owner's revision counter inside the mutation's transaction.
    async fn bump_revision(
        tx: &mut Transaction<'_, Postgres>,
        owner_key: &str,
    ) -> Result<(), CartError> {
        sqlx::query(
            "INSERT INTO cart_revisions (owner_key, revision) VALUES ($1, 1) \
             ON CONFLICT (owner_key) DO UPDATE SET revision = cart_revisions.revision + 1",
        )
        .bind(owner_key)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CartStore for PgCartStore {
    async fn get(&self, owner: &OwnerId) -> Result<Vec<CartItem>, CartError> {
        let sql =
            format!("SELECT {COLUMNS} FROM cart_items WHERE owner_key = $1 ORDER BY created_at");
        let rows: Vec<CartItemRow> = sqlx::query_as(&sql)
            .bind(owner.storage_key())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(CartItemRow::into_item).collect()
    }

    async fn find_by_variant(
        &self,
        owner: &OwnerId,
        variant_id: VariantId,
    ) -> Result<Option<CartItem>, CartError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM cart_items WHERE owner_key = $1 AND variant_id = $2"
        );
        let row: Option<CartItemRow> = sqlx::query_as(&sql)
            .bind(owner.storage_key())
            .bind(variant_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(CartItemRow::into_item).transpose()
    }

    async fn find_item(
        &self,
        owner: &OwnerId,
        item_id: CartItemId,
    ) -> Result<Option<CartItem>, CartError> {
        let sql = format!("SELECT {COLUMNS} FROM cart_items WHERE owner_key = $1 AND id = $2");
        let row: Option<CartItemRow> = sqlx::query_as(&sql)
            .bind(owner.storage_key())
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(CartItemRow::into_item).transpose()
    }

    async fn upsert_by_variant(
        &self,
        owner: &OwnerId,
        variant_id: VariantId,
        quantity: u32,
        mode: UpsertMode,
        product_name: &str,
        unit_price: Price,
    ) -> Result<CartItem, CartError> {
        if quantity == 0 {
            return Err(CartError::Validation(
                "Quantity must be positive".to_string(),
            ));
        }
        let quantity = i32::try_from(quantity)
            .map_err(|_| CartError::Validation("Quantity too large".to_string()))?;

        let update_clause = match mode {
            // The increment happens inside the statement, so concurrent
            // deltas for the same key are both reflected.
            UpsertMode::Delta => "quantity = cart_items.quantity + EXCLUDED.quantity",
            UpsertMode::Absolute => "quantity = EXCLUDED.quantity",
        };
        let sql = format!(
            "INSERT INTO cart_items \
             (id, owner_key, variant_id, quantity, product_name, unit_price_amount, unit_price_currency) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (owner_key, variant_id) \
             DO UPDATE SET {update_clause}, updated_at = now() \
             RETURNING {COLUMNS}"
        );

        let owner_key = owner.storage_key();
        let mut tx = self.pool.begin().await?;
        let row: CartItemRow = sqlx::query_as(&sql)
            .bind(CartItemId::generate())
            .bind(&owner_key)
            .bind(variant_id)
            .bind(quantity)
            .bind(product_name)
            .bind(unit_price.amount)
            .bind(unit_price.currency_code.code())
            .fetch_one(&mut *tx)
            .await?;
        Self::bump_revision(&mut tx, &owner_key).await?;
        tx.commit().await?;
        row.into_item()
    }

    async fn set_item_quantity(
        &self,
        owner: &OwnerId,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<Option<CartItem>, CartError> {
        if quantity == 0 {
            return Err(CartError::Validation(
                "Quantity must be positive".to_string(),
            ));
        }
        let quantity = i32::try_from(quantity)
            .map_err(|_| CartError::Validation("Quantity too large".to_string()))?;

        let sql = format!(
            "UPDATE cart_items SET quantity = $3, updated_at = now() \
             WHERE owner_key = $1 AND id = $2 RETURNING {COLUMNS}"
        );

        let owner_key = owner.storage_key();
        let mut tx = self.pool.begin().await?;
        let row: Option<CartItemRow> = sqlx::query_as(&sql)
            .bind(&owner_key)
            .bind(item_id)
            .bind(quantity)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            // Vanished under a concurrent call; nothing to commit.
            return Ok(None);
        };
        Self::bump_revision(&mut tx, &owner_key).await?;
        tx.commit().await?;
        row.into_item().map(Some)
    }

    async fn remove_item(&self, owner: &OwnerId, item_id: CartItemId) -> Result<bool, CartError> {
        let owner_key = owner.storage_key();
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM cart_items WHERE owner_key = $1 AND id = $2")
            .bind(&owner_key)
            .bind(item_id)
            .execute(&mut *tx)
            .await?;
        let removed = result.rows_affected() > 0;
        if removed {
            Self::bump_revision(&mut tx, &owner_key).await?;
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn clear(&self, owner: &OwnerId) -> Result<(), CartError> {
        let owner_key = owner.storage_key();
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM cart_items WHERE owner_key = $1")
            .bind(&owner_key)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() > 0 {
            Self::bump_revision(&mut tx, &owner_key).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn rekey_item(
        &self,
        from: &OwnerId,
        item_id: CartItemId,
        to: &OwnerId,
    ) -> Result<Option<CartItem>, CartError> {
        let sql = format!(
            "UPDATE cart_items SET owner_key = $3, updated_at = now() \
             WHERE owner_key = $1 AND id = $2 RETURNING {COLUMNS}"
        );

        let from_key = from.storage_key();
        let to_key = to.storage_key();
        let mut tx = self.pool.begin().await?;
        let row: Option<CartItemRow> = sqlx::query_as(&sql)
            .bind(&from_key)
            .bind(item_id)
            .bind(&to_key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|err| {
                // Unique (owner_key, variant_id) violation: the target cart
                // already holds this variant. Merge sums quantities instead
                // of re-keying in that case, so reaching here is a bug.
                if err
                    .as_database_error()
                    .and_then(sqlx::error::DatabaseError::code)
                    .as_deref()
                    == Some("23505")
                {
                    CartError::Permanent(format!("variant already present for {to}"))
                } else {
                    CartError::from(err)
                }
            })?;
        let Some(row) = row else {
            return Ok(None);
        };
        Self::bump_revision(&mut tx, &from_key).await?;
        Self::bump_revision(&mut tx, &to_key).await?;
        tx.commit().await?;
        row.into_item().map(Some)
    }

    async fn revision(&self, owner: &OwnerId) -> Result<u64, CartError> {
        let revision: Option<i64> =
            sqlx::query_scalar("SELECT revision FROM cart_revisions WHERE owner_key = $1")
                .bind(owner.storage_key())
                .fetch_optional(&self.pool)
                .await?;
        Ok(revision.and_then(|r| u64::try_from(r).ok()).unwrap_or(0))
    }
}
