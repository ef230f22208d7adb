//! # Promotion Service
//!
//! Administration of promotions and of the product ↔ promotion association.
//! Every change invalidates the shared [`PromotionIndexCache`], so the next
//! pricing decision sees it.
//!
//! ## Batch Operations
//! ```text
//! PromotionBatch { promotion_id, product_ids }
//!        │
//!        ├─ validate field by field          → ValidationError (nothing done)
//!        ├─ promotion must exist             → NotFound (nothing done)
//!        │
//!        └─ per product, independently:
//!             applied  ──► BatchOutcome.applied
//!             rejected ──► BatchOutcome.skipped { product_id, reason }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use vend_core::validation::{validate_promotion, validate_promotion_batch};
use vend_core::{NewPromotion, Product, Promotion, PromotionBatch, PromotionRemoval, ValidationError};

use crate::error::{EngineError, EngineResult, StoreError};
use crate::index::PromotionIndexCache;
use crate::store::Store;

// =============================================================================
// Batch Outcome
// =============================================================================

/// Why a product in a batch was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ProductNotFound,
    AlreadyAssociated,
    NotAssociated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedProduct {
    pub product_id: i64,
    pub reason: SkipReason,
}

/// Result of a batch association request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub promotion_id: i64,
    pub applied: Vec<i64>,
    pub skipped: Vec<SkippedProduct>,
}

impl BatchOutcome {
    fn new(promotion_id: i64) -> Self {
        BatchOutcome {
            promotion_id,
            ..Default::default()
        }
    }

    fn skip(&mut self, product_id: i64, reason: SkipReason) {
        warn!(
            promotion_id = self.promotion_id,
            product_id,
            reason = ?reason,
            "Skipped product in promotion batch"
        );
        self.skipped.push(SkippedProduct { product_id, reason });
    }
}

// =============================================================================
// Service
// =============================================================================

/// Promotion administration.
pub struct PromotionService<S: Store + ?Sized> {
    store: Arc<S>,
    index: Arc<PromotionIndexCache>,
}

impl<S: Store + ?Sized> PromotionService<S> {
    pub fn new(store: Arc<S>, index: Arc<PromotionIndexCache>) -> Self {
        PromotionService { store, index }
    }

    // =========================================================================
    // Promotions
    // =========================================================================

    /// Creates a promotion. Names are unique.
    pub async fn add_promotion(&self, promotion: &NewPromotion) -> EngineResult<Promotion> {
        validate_promotion(promotion)?;

        let name = promotion.name.trim();
        if self.store.get_promotion_by_name(name).await?.is_some() {
            return Err(duplicate_name(name));
        }

        let stored = self.store.insert_promotion(promotion).await?;
        self.index.invalidate();

        info!(promotion_id = stored.id, name = %stored.name, "Promotion added");
        Ok(stored)
    }

    /// Updates a promotion in place.
    pub async fn edit_promotion(&self, promotion: &Promotion) -> EngineResult<Promotion> {
        validate_promotion(&NewPromotion::from(promotion))?;
        self.promotion(promotion.id).await?;

        let name = promotion.name.trim();
        if let Some(other) = self.store.get_promotion_by_name(name).await? {
            if other.id != promotion.id {
                return Err(duplicate_name(name));
            }
        }

        let updated = Promotion {
            name: name.to_string(),
            ..promotion.clone()
        };
        self.store.update_promotion(&updated).await?;
        self.index.invalidate();

        info!(promotion_id = updated.id, "Promotion edited");
        Ok(updated)
    }

    /// Clears the promotion's associations, then deletes it, or deactivates
    /// it when sale history references it.
    pub async fn delete_promotion(&self, promotion_id: i64) -> EngineResult<PromotionRemoval> {
        let removal = self.store.delete_promotion(promotion_id).await?;
        self.index.invalidate();

        info!(promotion_id, removal = ?removal, "Promotion removed");
        Ok(removal)
    }

    pub async fn get_promotion(&self, promotion_id: i64) -> EngineResult<Promotion> {
        self.promotion(promotion_id).await
    }

    pub async fn promotion_by_name(&self, name: &str) -> EngineResult<Option<Promotion>> {
        Ok(self.store.get_promotion_by_name(name).await?)
    }

    /// Every promotion, active or not, ordered by id.
    pub async fn list_promotions(&self) -> EngineResult<Vec<Promotion>> {
        Ok(self.store.get_promotions(false, Utc::now()).await?)
    }

    /// Promotions active at `now`.
    pub async fn active_promotions(&self, now: DateTime<Utc>) -> EngineResult<Vec<Promotion>> {
        Ok(self.store.get_promotions(true, now).await?)
    }

    /// Promotions whose window covers the whole of `[start, end]`.
    pub async fn promotions_covering(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<Vec<Promotion>> {
        if start >= end {
            return Err(ValidationError::InvalidRange {
                start_field: "start".to_string(),
                end_field: "end".to_string(),
            }
            .into());
        }

        let mut promotions = self.store.get_promotions(false, start).await?;
        promotions.retain(|p| p.covers(start, end));
        Ok(promotions)
    }

    // =========================================================================
    // Associations
    // =========================================================================

    /// Adds one product to a promotion.
    pub async fn add_product(&self, product_id: i64, promotion_id: i64) -> EngineResult<()> {
        self.product(product_id).await?;
        self.promotion(promotion_id).await?;

        self.store
            .add_association(product_id, promotion_id)
            .await
            .map_err(|e| match e {
                StoreError::Duplicate { .. } => EngineError::DuplicateAssociation {
                    product_id,
                    promotion_id,
                },
                other => other.into(),
            })?;
        self.index.invalidate();

        info!(product_id, promotion_id, "Product added to promotion");
        Ok(())
    }

    /// Removes one product from a promotion. Returns whether it was there.
    pub async fn remove_product(&self, product_id: i64, promotion_id: i64) -> EngineResult<bool> {
        let removed = self.store.remove_association(product_id, promotion_id).await?;
        if removed {
            self.index.invalidate();
            info!(product_id, promotion_id, "Product removed from promotion");
        }
        Ok(removed)
    }

    /// Adds several products to a promotion, each independently.
    pub async fn add_products(&self, batch: &PromotionBatch) -> EngineResult<BatchOutcome> {
        validate_promotion_batch(batch)?;
        self.promotion(batch.promotion_id).await?;

        let mut outcome = BatchOutcome::new(batch.promotion_id);
        for &product_id in &batch.product_ids {
            if self.store.get_product(product_id).await?.is_none() {
                outcome.skip(product_id, SkipReason::ProductNotFound);
                continue;
            }

            match self.store.add_association(product_id, batch.promotion_id).await {
                Ok(()) => outcome.applied.push(product_id),
                Err(StoreError::Duplicate { .. }) => {
                    outcome.skip(product_id, SkipReason::AlreadyAssociated)
                }
                Err(e) => {
                    // Earlier members are already stored; readers must see them.
                    if !outcome.applied.is_empty() {
                        self.index.invalidate();
                    }
                    return Err(e.into());
                }
            }
        }

        if !outcome.applied.is_empty() {
            self.index.invalidate();
        }

        info!(
            promotion_id = batch.promotion_id,
            applied = outcome.applied.len(),
            skipped = outcome.skipped.len(),
            "Products added to promotion"
        );
        Ok(outcome)
    }

    /// Removes several products from a promotion, each independently.
    pub async fn remove_products(&self, batch: &PromotionBatch) -> EngineResult<BatchOutcome> {
        validate_promotion_batch(batch)?;
        self.promotion(batch.promotion_id).await?;

        let mut outcome = BatchOutcome::new(batch.promotion_id);
        for &product_id in &batch.product_ids {
            let removed = match self.store.remove_association(product_id, batch.promotion_id).await {
                Ok(removed) => removed,
                Err(e) => {
                    if !outcome.applied.is_empty() {
                        self.index.invalidate();
                    }
                    return Err(e.into());
                }
            };

            if removed {
                outcome.applied.push(product_id);
            } else {
                outcome.skip(product_id, SkipReason::NotAssociated);
            }
        }

        if !outcome.applied.is_empty() {
            self.index.invalidate();
        }

        info!(
            promotion_id = batch.promotion_id,
            applied = outcome.applied.len(),
            skipped = outcome.skipped.len(),
            "Products removed from promotion"
        );
        Ok(outcome)
    }

    /// Products in a promotion, by ascending id.
    pub async fn promotion_products(&self, promotion_id: i64) -> EngineResult<Vec<Product>> {
        self.promotion(promotion_id).await?;

        let mut products = Vec::new();
        for product_id in self.store.get_associations(promotion_id).await? {
            products.push(self.product(product_id).await?);
        }
        Ok(products)
    }

    /// Promotions (any state) that include a product.
    pub async fn product_promotions(&self, product_id: i64) -> EngineResult<Vec<Promotion>> {
        self.product(product_id).await?;
        Ok(self.store.get_promotions_for_product(product_id).await?)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn promotion(&self, promotion_id: i64) -> EngineResult<Promotion> {
        self.store
            .get_promotion(promotion_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Promotion", promotion_id))
    }

    async fn product(&self, product_id: i64) -> EngineResult<Product> {
        self.store
            .get_product(product_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Product", product_id))
    }
}

fn duplicate_name(name: &str) -> EngineError {
    ValidationError::Duplicate {
        field: "name".to_string(),
        value: name.to_string(),
    }
    .into()
}

// =============================================================================
// Unit Tests
// =============================================================================
