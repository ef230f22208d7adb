//! # Promotion Index and Resolver
//!
//! Pricing is split into two explicit steps so staleness is a caller decision:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Promotions ─┐                                                          │
//! │              ├──► PromotionIndex::build(now) ──► snapshot               │
//! │  Associations┘         O(P + A)                     │                   │
//! │                                                     ▼                   │
//! │                     (product, quantity) ──► resolve() ──► PriceDecision │
//! │                                                pure                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Tie-Break Rule
//! Among the product's active promotions whose threshold is met, the lowest
//! promotion price wins; equal prices go to the lowest promotion id. A
//! promotion priced above the product's base price never qualifies, so the
//! applied price never exceeds the base price.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{Product, ProductPromotion, Promotion};
use crate::validation::validate_price;

// =============================================================================
// Promotion Index
// =============================================================================

/// Point-in-time mapping from product id to the promotions active at
/// `built_at` that include it.
///
/// Buckets are ordered by promotion id and contain each promotion once.
/// Products without an active promotion have no entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromotionIndex {
    built_at: DateTime<Utc>,
    entries: HashMap<i64, Vec<Promotion>>,
}

impl PromotionIndex {
    /// An index with no entries.
    pub fn empty(now: DateTime<Utc>) -> Self {
        PromotionIndex {
            built_at: now,
            entries: HashMap::new(),
        }
    }

    /// Builds the index for `now`.
    ///
    /// Inactive or out-of-window promotions are dropped first; the survivors
    /// are then joined against the associations in a single pass.
    pub fn build(
        promotions: &[Promotion],
        associations: &[ProductPromotion],
        now: DateTime<Utc>,
    ) -> Self {
        let active: HashMap<i64, &Promotion> = promotions
            .iter()
            .filter(|p| p.is_active_at(now))
            .map(|p| (p.id, p))
            .collect();

        let mut entries: HashMap<i64, Vec<Promotion>> = HashMap::new();
        if !active.is_empty() {
            for link in associations {
                if let Some(promotion) = active.get(&link.promotion_id) {
                    entries
                        .entry(link.product_id)
                        .or_default()
                        .push((*promotion).clone());
                }
            }
        }

        for bucket in entries.values_mut() {
            bucket.sort_by_key(|p| p.id);
            bucket.dedup_by_key(|p| p.id);
        }

        PromotionIndex {
            built_at: now,
            entries,
        }
    }

    /// Active promotions that include `product_id`, ordered by id.
    pub fn promotions_for(&self, product_id: i64) -> &[Promotion] {
        self.entries
            .get(&product_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Instant the index was built for.
    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Number of products with at least one active promotion.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Product ids present in the index (unordered).
    pub fn product_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.entries.keys().copied()
    }
}

// =============================================================================
// Price Decision
// =============================================================================

/// Outcome of resolving the price of one product at a given quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PriceDecision {
    pub product_id: i64,
    pub quantity: i64,
    pub base_price_cents: i64,

    /// Per-unit price to charge.
    pub applied_price_cents: i64,

    /// Set only when a promotion was selected.
    pub source_promotion: Option<i64>,
}

impl PriceDecision {
    #[inline]
    pub fn applied_price(&self) -> Money {
        Money::from_cents(self.applied_price_cents)
    }

    #[inline]
    pub fn base_price(&self) -> Money {
        Money::from_cents(self.base_price_cents)
    }

    /// Applied price × quantity.
    #[inline]
    pub fn line_total(&self) -> Money {
        self.applied_price().multiply_quantity(self.quantity)
    }

    /// Per-line saving against the base price.
    pub fn savings(&self) -> Money {
        (self.base_price() - self.applied_price()).multiply_quantity(self.quantity)
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Resolves the unit price of `product` for `quantity` units.
///
/// Fails when `quantity` is not positive or the catalog price is outside
/// `0..=MAX_PRICE_CENTS`.
pub fn resolve(product: &Product, quantity: i64, index: &PromotionIndex) -> CoreResult<PriceDecision> {
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        }
        .into());
    }
    validate_price("price_cents", product.price_cents)?;

    let best = index
        .promotions_for(product.id)
        .iter()
        .filter(|p| p.threshold_met(quantity) && p.promotion_price_cents <= product.price_cents)
        .min_by_key(|p| (p.promotion_price_cents, p.id));

    let decision = match best {
        Some(promotion) => PriceDecision {
            product_id: product.id,
            quantity,
            base_price_cents: product.price_cents,
            applied_price_cents: promotion.promotion_price_cents,
            source_promotion: Some(promotion.id),
        },
        None => PriceDecision {
            product_id: product.id,
            quantity,
            base_price_cents: product.price_cents,
            applied_price_cents: product.price_cents,
            source_promotion: None,
        },
    };

    Ok(decision)
}

/// Resolves each `(product, quantity)` pair independently against one index.
pub fn apply_promotions(
    items: &[(Product, i64)],
    index: &PromotionIndex,
) -> CoreResult<Vec<PriceDecision>> {
    items
        .iter()
        .map(|(product, quantity)| resolve(product, *quantity, index))
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
