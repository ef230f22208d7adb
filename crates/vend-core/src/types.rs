//! # Domain Types
//!
//! Core domain types used throughout Vend.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────┐   ┌─────────────────┐      │
//! │  │    Product      │   │ ProductPromotion │   │   Promotion     │      │
//! │  │  ─────────────  │◄──│  ──────────────  │──►│  ─────────────  │      │
//! │  │  id             │   │  product_id      │   │  id, name       │      │
//! │  │  price_cents    │   │  promotion_id    │   │  quantity       │      │
//! │  │  attribute ids  │   └──────────────────┘   │  promo price    │      │
//! │  └─────────────────┘                          │  window, active │      │
//! │                                               └─────────────────┘      │
//! │  ┌─────────────────┐   ┌─────────────────┐                             │
//! │  │  ProductSale    │   │    Payment      │   owned by SaleInvoice      │
//! │  │  ─────────────  │   │  ─────────────  │   (see `invoice` module)    │
//! │  │  line_no        │   │  payment_no     │                             │
//! │  │  unit price     │   │  method, amount │                             │
//! │  │  (frozen)       │   └─────────────────┘                             │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Arena-Style References
//! Entities never hold references to each other. The many-to-many
//! Product ↔ Promotion relation is a flat association table; every
//! cross-reference is an id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Product
// =============================================================================

/// A product as supplied by the catalog.
///
/// Immutable from the engine's point of view during a sale. Attribute ids
/// (brand, category, size, colour) are opaque references into the catalog's
/// attribute tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: i64,

    /// Stock Keeping Unit - business identifier.
    pub sku: Option<String>,

    /// Display name shown to cashier and on receipt.
    pub name: String,

    /// Base unit price in cents.
    pub price_cents: i64,

    pub brand_id: Option<i64>,
    pub category_id: Option<i64>,
    pub size_id: Option<i64>,
    pub colour_id: Option<i64>,

    /// Whether product is active (soft delete).
    pub is_active: bool,
}

impl Product {
    /// Creates an active product without attribute references.
    pub fn new(id: i64, name: impl Into<String>, price: Money) -> Self {
        Product {
            id,
            sku: None,
            name: name.into(),
            price_cents: price.cents(),
            brand_id: None,
            category_id: None,
            size_id: None,
            colour_id: None,
            is_active: true,
        }
    }

    /// Returns the base price as a Money type.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }
}

// =============================================================================
// Promotion
// =============================================================================

/// A time-bounded promotional price.
///
/// ## Qualification
/// ```text
///   active == true  AND  starts_at <= now <= ends_at     → currently active
///   requested quantity >= promotion.quantity             → threshold met
/// ```
/// A qualified line is charged `promotion_price_cents` per unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Promotion {
    pub id: i64,
    pub name: String,

    /// Minimum unit count required to qualify.
    pub quantity: i64,

    /// Discounted unit price once qualified, in cents.
    pub promotion_price_cents: i64,

    #[ts(as = "String")]
    pub starts_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub ends_at: DateTime<Utc>,

    pub active: bool,
}

impl Promotion {
    /// Returns the promotion price as Money.
    #[inline]
    pub fn promotion_price(&self) -> Money {
        Money::from_cents(self.promotion_price_cents)
    }

    /// True iff the flag is set and `now` falls inside `[starts_at, ends_at]`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.starts_at <= now && now <= self.ends_at
    }

    /// True iff the window covers the whole `[start, end]` range.
    pub fn covers(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.starts_at <= start && self.ends_at >= end
    }

    /// True iff `quantity` meets the minimum unit threshold.
    #[inline]
    pub fn threshold_met(&self, quantity: i64) -> bool {
        self.quantity <= quantity
    }
}

/// What removing a promotion ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum PromotionRemoval {
    /// The promotion is gone.
    Deleted,
    /// Sale history references the promotion, so it was switched off instead.
    Deactivated,
}

/// A promotion that has not been stored yet (no id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewPromotion {
    pub name: String,
    pub quantity: i64,
    pub promotion_price_cents: i64,
    #[ts(as = "String")]
    pub starts_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub ends_at: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl NewPromotion {
    /// Attaches the store-assigned id.
    pub fn with_id(self, id: i64) -> Promotion {
        Promotion {
            id,
            name: self.name,
            quantity: self.quantity,
            promotion_price_cents: self.promotion_price_cents,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            active: self.active,
        }
    }
}

impl From<&Promotion> for NewPromotion {
    fn from(promotion: &Promotion) -> Self {
        NewPromotion {
            name: promotion.name.clone(),
            quantity: promotion.quantity,
            promotion_price_cents: promotion.promotion_price_cents,
            starts_at: promotion.starts_at,
            ends_at: promotion.ends_at,
            active: promotion.active,
        }
    }
}

// =============================================================================
// Product ↔ Promotion Association
// =============================================================================

/// One row of the many-to-many association between products and promotions.
///
/// At most one row exists per `(product_id, promotion_id)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ProductPromotion {
    pub product_id: i64,
    pub promotion_id: i64,
}

/// Batch request to attach or detach several products to one promotion.
///
/// ```json
/// { "promotionId": 3, "productIds": [42, 43, 44] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PromotionBatch {
    pub promotion_id: i64,
    pub product_ids: Vec<i64>,
}

// =============================================================================
// Product Sale (line item)
// =============================================================================

/// A line item of a sale invoice.
///
/// `unit_price_cents` is the price resolved when the line was added and is
/// never recomputed: later promotion changes do not touch persisted lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ProductSale {
    pub sale_invoice_id: i64,

    /// 1-based position within the invoice, never reused.
    pub line_no: i64,

    pub product_id: i64,
    pub quantity: i64,

    /// Applied unit price in cents at time of sale (frozen).
    pub unit_price_cents: i64,

    /// Promotion the price came from, if any.
    pub promotion_id: Option<i64>,

    /// Client-assigned deduplication token (UUID) for idempotent sells.
    pub request_token: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl ProductSale {
    /// Returns the applied unit price as Money.
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// Returns `unit price × quantity`.
    #[inline]
    pub fn line_total(&self) -> Money {
        self.unit_price().multiply_quantity(self.quantity)
    }
}

// =============================================================================
// Payment
// =============================================================================

/// A payment towards a sale invoice.
/// An invoice can have multiple payments for split tender scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Payment {
    pub sale_invoice_id: i64,

    /// 1-based position within the invoice, never reused.
    pub payment_no: i64,

    pub payment_method_id: i64,
    pub amount_cents: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Returns the payment amount as Money.
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }

    /// True iff method and amount both match.
    pub fn matches(&self, details: &PaymentDetails) -> bool {
        self.payment_method_id == details.payment_method_id
            && self.amount_cents == details.amount_cents
    }
}

/// Method and amount of a payment.
///
/// Used both to describe a new payment and as the criteria that select an
/// existing one for removal or editing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentDetails {
    pub payment_method_id: i64,
    pub amount_cents: i64,
}

impl PaymentDetails {
    pub fn new(payment_method_id: i64, amount: Money) -> Self {
        PaymentDetails {
            payment_method_id,
            amount_cents: amount.cents(),
        }
    }
}

// =============================================================================
// Quotes
// =============================================================================

/// One entry of a pricing quote request (product id + requested quantity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QuoteItem {
    pub product_id: i64,
    pub quantity: i64,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn promotion(now: DateTime<Utc>) -> Promotion {
        Promotion {
            id: 1,
            name: "Three for nine".to_string(),
            quantity: 3,
            promotion_price_cents: 900,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
            active: true,
        }
    }

    #[test]
    fn test_promotion_active_window() {
        let now = Utc::now();
        let promo = promotion(now);

        assert!(promo.is_active_at(now));
        assert!(promo.is_active_at(promo.starts_at));
        assert!(promo.is_active_at(promo.ends_at));
        assert!(!promo.is_active_at(now + Duration::days(2)));
        assert!(!promo.is_active_at(now - Duration::days(2)));

        let disabled = Promotion {
            active: false,
            ..promo
        };
        assert!(!disabled.is_active_at(now));
    }

    #[test]
    fn test_promotion_covers_range() {
        let now = Utc::now();
        let promo = promotion(now);

        assert!(promo.covers(now - Duration::hours(1), now + Duration::hours(1)));
        assert!(!promo.covers(now - Duration::days(3), now));
    }

    #[test]
    fn test_threshold() {
        let promo = promotion(Utc::now());
        assert!(!promo.threshold_met(2));
        assert!(promo.threshold_met(3));
        assert!(promo.threshold_met(5));
    }

    #[test]
    fn test_line_total() {
        let line = ProductSale {
            sale_invoice_id: 1,
            line_no: 1,
            product_id: 42,
            quantity: 5,
            unit_price_cents: 900,
            promotion_id: Some(1),
            request_token: None,
            created_at: Utc::now(),
        };
        assert_eq!(line.line_total().cents(), 4500);
    }

    #[test]
    fn test_payment_matches() {
        let payment = Payment {
            sale_invoice_id: 1,
            payment_no: 1,
            payment_method_id: 2,
            amount_cents: 1500,
            created_at: Utc::now(),
        };
        assert!(payment.matches(&PaymentDetails::new(2, Money::from_cents(1500))));
        assert!(!payment.matches(&PaymentDetails::new(1, Money::from_cents(1500))));
        assert!(!payment.matches(&PaymentDetails::new(2, Money::from_cents(1000))));
    }

    #[test]
    fn test_batch_request_shape() {
        let batch: PromotionBatch =
            serde_json::from_str(r#"{"promotionId": 3, "productIds": [42, 43]}"#).unwrap();
        assert_eq!(batch.promotion_id, 3);
        assert_eq!(batch.product_ids, vec![42, 43]);
    }
}
