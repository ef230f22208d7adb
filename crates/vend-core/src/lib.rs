//! # vend-core: Pure Business Logic for Vend
//!
//! This crate is the **heart** of the sale transaction and promotion engine.
//! It contains all business rules as pure functions with zero I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Vend Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               Request layer (out of scope)                      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ in-process calls                       │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          vend-engine (TransactionOrchestrator, Store)           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ vend-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ promotion │  │  invoice  │  │ validation│  │   │
//! │  │   │  Product  │  │   Index   │  │   state   │  │   rules   │  │   │
//! │  │   │ Promotion │  │  Resolver │  │  machine  │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK READS • PURE FUNCTIONS       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    vend-db (Database Layer)                     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Promotion, ProductSale, Payment, ...)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`promotion`] - Promotion Index construction and price resolution
//! - [`invoice`] - Sale invoice lifecycle (Open → Finalized)
//! - [`error`] - Domain error types
//! - [`validation`] - Business rule validation
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use vend_core::promotion::{resolve, PromotionIndex};
//! use vend_core::{Money, Product, ProductPromotion, Promotion};
//!
//! let now = Utc::now();
//! let product = Product::new(42, "Linen shirt", Money::from_cents(1200));
//! let promo = Promotion {
//!     id: 1,
//!     name: "Three for nine".to_string(),
//!     quantity: 3,
//!     promotion_price_cents: 900,
//!     starts_at: now - Duration::days(1),
//!     ends_at: now + Duration::days(1),
//!     active: true,
//! };
//! let links = [ProductPromotion { product_id: 42, promotion_id: 1 }];
//!
//! let index = PromotionIndex::build(&[promo], &links, now);
//! let decision = resolve(&product, 5, &index).unwrap();
//! assert_eq!(decision.applied_price().cents(), 900);
//! assert_eq!(decision.source_promotion, Some(1));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod invoice;
pub mod money;
pub mod promotion;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use invoice::{InvoiceHeader, InvoiceState, SaleInvoice};
pub use money::Money;
pub use promotion::{PriceDecision, PromotionIndex};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum quantity of a single line item.
///
/// ## Business Reason
/// Prevents accidental over-ordering (e.g., typing 1000 instead of 10).
/// The engine configuration may lower this per deployment.
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Largest unit price or payment amount accepted, in cents.
///
/// Times [`MAX_ITEM_QUANTITY`] this stays about five orders of magnitude
/// below `i64::MAX`, so line totals never approach the saturation point.
pub const MAX_PRICE_CENTS: i64 = 100_000_000_000;

/// Maximum length of a promotion name.
pub const MAX_PROMOTION_NAME_LEN: usize = 100;
