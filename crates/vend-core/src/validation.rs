//! # Validation Module
//!
//! Input validation for Vend.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Request layer (out of scope)                                 │
//! │  └── Type validation (deserialization into typed requests)             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: vend-engine / vend-core                                      │
//! │  └── THIS MODULE: Business rule validation, before any state change    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL / CHECK constraints                                      │
//! │  ├── UNIQUE constraints (promotion name, association pair)             │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use vend_core::validation::{validate_quantity, validate_uuid};
//!
//! validate_quantity(5, 999).unwrap();
//! validate_uuid("550e8400-e29b-41d4-a716-446655440000").unwrap();
//! ```

use std::collections::HashSet;

use crate::error::ValidationError;
use crate::types::{NewPromotion, PaymentDetails, PromotionBatch};
use crate::{MAX_PRICE_CENTS, MAX_PROMOTION_NAME_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line item quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed `max` (the configured per-line ceiling)
///
/// ```rust
/// use vend_core::validation::validate_quantity;
///
/// assert!(validate_quantity(1, 999).is_ok());
/// assert!(validate_quantity(0, 999).is_err());
/// assert!(validate_quantity(1000, 999).is_err());
/// ```
pub fn validate_quantity(qty: i64, max: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > max {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max,
        });
    }

    Ok(())
}

/// Validates a price in cents against `0..=MAX_PRICE_CENTS`.
///
/// ```rust
/// use vend_core::validation::validate_price;
///
/// assert!(validate_price("price_cents", 1200).is_ok());
/// assert!(validate_price("price_cents", -1).is_err());
/// assert!(validate_price("price_cents", i64::MAX).is_err());
/// ```
pub fn validate_price(field: &str, cents: i64) -> ValidationResult<()> {
    if !(0..=MAX_PRICE_CENTS).contains(&cents) {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_PRICE_CENTS,
        });
    }

    Ok(())
}

/// Validates a payment amount in cents. Zero and negative amounts are rejected.
pub fn validate_payment_amount(cents: i64) -> ValidationResult<()> {
    if cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }

    validate_price("amount", cents)
}

/// Validates a payment method reference.
pub fn validate_payment_method_id(id: i64) -> ValidationResult<()> {
    if id <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "payment_method_id".to_string(),
        });
    }

    Ok(())
}

/// Validates a full payment record (method and amount).
pub fn validate_payment(details: &PaymentDetails) -> ValidationResult<()> {
    validate_payment_method_id(details.payment_method_id)?;
    validate_payment_amount(details.amount_cents)
}

// =============================================================================
// Promotion Validators
// =============================================================================

/// Validates a promotion name.
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most `MAX_PROMOTION_NAME_LEN` characters
pub fn validate_promotion_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.chars().count() > MAX_PROMOTION_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: MAX_PROMOTION_NAME_LEN,
        });
    }

    Ok(())
}

/// Validates the fields of a promotion, checked in declaration order so the
/// first offending field is reported.
///
/// ## Rules
/// ```text
/// name                   required, ≤ 100 chars
/// quantity               > 0
/// promotion_price_cents  > 0, ≤ MAX_PRICE_CENTS
/// starts_at < ends_at    strict
/// ```
pub fn validate_promotion(promotion: &NewPromotion) -> ValidationResult<()> {
    validate_promotion_name(&promotion.name)?;

    if promotion.quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if promotion.promotion_price_cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "promotion_price".to_string(),
        });
    }
    validate_price("promotion_price", promotion.promotion_price_cents)?;

    if promotion.starts_at >= promotion.ends_at {
        return Err(ValidationError::InvalidRange {
            start_field: "starts_at".to_string(),
            end_field: "ends_at".to_string(),
        });
    }

    Ok(())
}

/// Validates a batch association request field by field.
///
/// ## Rules
/// - `promotion_id` > 0
/// - `product_ids` non-empty, every id > 0, no id repeated
pub fn validate_promotion_batch(batch: &PromotionBatch) -> ValidationResult<()> {
    if batch.promotion_id <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "promotion_id".to_string(),
        });
    }

    if batch.product_ids.is_empty() {
        return Err(ValidationError::Required {
            field: "product_ids".to_string(),
        });
    }

    let mut seen = HashSet::with_capacity(batch.product_ids.len());
    for &product_id in &batch.product_ids {
        if product_id <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "product_ids".to_string(),
            });
        }
        if !seen.insert(product_id) {
            return Err(ValidationError::Duplicate {
                field: "product_ids".to_string(),
                value: product_id.to_string(),
            });
        }
    }

    Ok(())
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a deduplication token.
///
/// ```rust
/// use vend_core::validation::validate_uuid;
///
/// assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("not-a-uuid").is_err());
/// ```
pub fn validate_uuid(token: &str) -> ValidationResult<()> {
    if token.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "request_token".to_string(),
        });
    }

    uuid::Uuid::parse_str(token).map_err(|_| ValidationError::InvalidFormat {
        field: "request_token".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
