//! # Promotion Repository
//!
//! Promotions and the product ↔ promotion association table.
//!
//! ## Lookups in Both Directions
//! ```text
//!   promotion ──► associations_for(promotion_id)    ──► product ids
//!   product   ──► promotions_for_product(product_id) ──► promotions
//! ```
//!
//! The association table has a composite primary key, so a repeated pair is
//! rejected by SQLite and surfaces as `DbError::UniqueViolation`.
//!
//! "Currently active" depends on the clock, so filtering by window is done by
//! the caller (`Promotion::is_active_at`) rather than by comparing timestamp
//! text in SQL.

use serde_json::json;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use vend_core::{NewPromotion, ProductPromotion, Promotion, PromotionRemoval};

const PROMOTION_COLUMNS: &str = "id, name, quantity, promotion_price_cents, starts_at, ends_at, active";

/// Repository for promotion database operations.
#[derive(Debug, Clone)]
pub struct PromotionRepository {
    pool: SqlitePool,
}

impl PromotionRepository {
    /// Creates a new PromotionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PromotionRepository { pool }
    }

    // =========================================================================
    // Promotions
    // =========================================================================

    /// Lists all promotions ordered by id.
    pub async fn list(&self) -> DbResult<Vec<Promotion>> {
        let sql = format!("SELECT {PROMOTION_COLUMNS} FROM promotions ORDER BY id");
        let promotions = sqlx::query_as::<_, Promotion>(&sql)
            .fetch_all(&self.pool)
            .await?;

        debug!(count = promotions.len(), "Listed promotions");
        Ok(promotions)
    }

    /// Gets a promotion by ID.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Promotion>> {
        let sql = format!("SELECT {PROMOTION_COLUMNS} FROM promotions WHERE id = ?1");
        let promotion = sqlx::query_as::<_, Promotion>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(promotion)
    }

    /// Gets a promotion by its (unique) name.
    pub async fn get_by_name(&self, name: &str) -> DbResult<Option<Promotion>> {
        let sql = format!("SELECT {PROMOTION_COLUMNS} FROM promotions WHERE name = ?1");
        let promotion = sqlx::query_as::<_, Promotion>(&sql)
            .bind(name.trim())
            .fetch_optional(&self.pool)
            .await?;

        Ok(promotion)
    }

    /// Inserts a promotion and returns it with its assigned id.
    pub async fn insert(&self, promotion: &NewPromotion) -> DbResult<Promotion> {
        let name = promotion.name.trim();
        debug!(name = %name, "Inserting promotion");

        let result = sqlx::query(
            r#"
            INSERT INTO promotions (
                name, quantity, promotion_price_cents, starts_at, ends_at, active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(name)
        .bind(promotion.quantity)
        .bind(promotion.promotion_price_cents)
        .bind(promotion.starts_at)
        .bind(promotion.ends_at)
        .bind(promotion.active)
        .execute(&self.pool)
        .await
        .map_err(|e| name_conflict(e, name))?;

        let stored = NewPromotion {
            name: name.to_string(),
            ..promotion.clone()
        }
        .with_id(result.last_insert_rowid());

        info!(promotion_id = stored.id, name = %stored.name, "Promotion created");
        Ok(stored)
    }

    /// Updates every field of an existing promotion in place.
    pub async fn update(&self, promotion: &Promotion) -> DbResult<()> {
        let name = promotion.name.trim();
        debug!(promotion_id = promotion.id, "Updating promotion");

        let result = sqlx::query(
            r#"
            UPDATE promotions SET
                name = ?2,
                quantity = ?3,
                promotion_price_cents = ?4,
                starts_at = ?5,
                ends_at = ?6,
                active = ?7
            WHERE id = ?1
            "#,
        )
        .bind(promotion.id)
        .bind(name)
        .bind(promotion.quantity)
        .bind(promotion.promotion_price_cents)
        .bind(promotion.starts_at)
        .bind(promotion.ends_at)
        .bind(promotion.active)
        .execute(&self.pool)
        .await
        .map_err(|e| name_conflict(e, name))?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Promotion", promotion.id));
        }

        Ok(())
    }

    /// Removes a promotion.
    ///
    /// Associations are cleared first. The row is then deleted, unless a
    /// sale line references it, in which case it is deactivated. All of this
    /// happens in one transaction.
    pub async fn delete(&self, id: i64) -> DbResult<PromotionRemoval> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM promotions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(DbError::not_found("Promotion", id));
        }

        let cleared = sqlx::query("DELETE FROM product_promotions WHERE promotion_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let referenced: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM product_sales WHERE promotion_id = ?1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;

        let removal = if referenced > 0 {
            sqlx::query("UPDATE promotions SET active = 0 WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            PromotionRemoval::Deactivated
        } else {
            sqlx::query("DELETE FROM promotions WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            PromotionRemoval::Deleted
        };

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        info!(
            promotion_id = id,
            associations_cleared = cleared,
            removal = ?removal,
            "Promotion removed"
        );
        Ok(removal)
    }

    // =========================================================================
    // Associations
    // =========================================================================

    /// All association rows, ordered by (promotion, product).
    pub async fn associations(&self) -> DbResult<Vec<ProductPromotion>> {
        let rows = sqlx::query_as::<_, ProductPromotion>(
            "SELECT product_id, promotion_id FROM product_promotions ORDER BY promotion_id, product_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Product ids associated with a promotion, ascending.
    pub async fn associations_for(&self, promotion_id: i64) -> DbResult<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT product_id FROM product_promotions WHERE promotion_id = ?1 ORDER BY product_id",
        )
        .bind(promotion_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Promotions a product is associated with, ordered by id.
    pub async fn promotions_for_product(&self, product_id: i64) -> DbResult<Vec<Promotion>> {
        let promotions = sqlx::query_as::<_, Promotion>(
            r#"
            SELECT p.id, p.name, p.quantity, p.promotion_price_cents,
                   p.starts_at, p.ends_at, p.active
            FROM promotions p
            JOIN product_promotions pp ON pp.promotion_id = p.id
            WHERE pp.product_id = ?1
            ORDER BY p.id
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(promotions)
    }

    /// Associates a product with a promotion.
    ///
    /// ## Errors
    /// - `UniqueViolation` when the pair already exists
    /// - `ForeignKeyViolation` when either side does not exist
    pub async fn insert_association(&self, product_id: i64, promotion_id: i64) -> DbResult<()> {
        debug!(product_id, promotion_id, "Associating product with promotion");

        sqlx::query("INSERT INTO product_promotions (product_id, promotion_id) VALUES (?1, ?2)")
            .bind(product_id)
            .bind(promotion_id)
            .execute(&self.pool)
            .await
            .map_err(|e| match DbError::from(e) {
                DbError::UniqueViolation { .. } => DbError::duplicate(
                    "product_promotion",
                    json!({ "productId": product_id, "promotionId": promotion_id }).to_string(),
                ),
                other => other,
            })?;

        Ok(())
    }

    /// Removes one association. Returns whether a row was removed.
    pub async fn delete_association(&self, product_id: i64, promotion_id: i64) -> DbResult<bool> {
        debug!(product_id, promotion_id, "Removing product from promotion");

        let result = sqlx::query(
            "DELETE FROM product_promotions WHERE product_id = ?1 AND promotion_id = ?2",
        )
        .bind(product_id)
        .bind(promotion_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Removes every association of a promotion; the promotion itself stays.
    pub async fn clear_associations(&self, promotion_id: i64) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM product_promotions WHERE promotion_id = ?1")
            .bind(promotion_id)
            .execute(&self.pool)
            .await?;

        debug!(promotion_id, removed = result.rows_affected(), "Cleared associations");
        Ok(result.rows_affected())
    }
}

/// Rewrites a unique violation on `promotions.name` with the offending name.
fn name_conflict(err: sqlx::Error, name: &str) -> DbError {
    match DbError::from(err) {
        DbError::UniqueViolation { .. } => DbError::duplicate("name", name),
        other => other,
    }
}
