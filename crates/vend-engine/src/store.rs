//! # Durable Store Contract
//!
//! Everything the engine reads or writes goes through [`Store`]. Two
//! implementations ship with the crate:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Store implementations                           │
//! │                                                                         │
//! │   TransactionOrchestrator ──┐                                           │
//! │   PromotionService ─────────┼──► dyn Store                              │
//! │   PromotionIndexCache ──────┘        │                                  │
//! │                             ┌────────┴────────┐                         │
//! │                             ▼                 ▼                         │
//! │                      MemoryStore        SqliteStore                     │
//! │                      (flat tables,      (vend-db repositories,          │
//! │                       tests/demos)       one transaction per write)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Atomicity
//! Every line and payment write re-checks the owning invoice's `finalized`
//! flag inside the same unit of work as the write itself, and fails with
//! [`StoreError::InvoiceFinalized`] when the invoice is closed. Finalize is
//! therefore a barrier: no write that commits after it can slip in.
//!
//! ## Numbering
//! Line and payment numbers come from the invoice's stored sequences and
//! are allocated inside that same unit of work. The `line_no` and
//! `payment_no` carried by the argument are ignored; the returned record
//! holds the assigned number. Writers that share a store never collide,
//! whatever locks they hold locally.
//!
//! ## Deduplication tokens
//! [`Store::append_line`] honors `ProductSale::request_token`: a token seen
//! before on the same invoice returns the line stored the first time, a
//! token seen on another invoice is a [`StoreError::Duplicate`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vend_core::{
    NewPromotion, Payment, Product, ProductPromotion, ProductSale, Promotion, PromotionIndex,
    PromotionRemoval, SaleInvoice,
};

use crate::error::StoreResult;

/// Durable storage used by the engine.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Catalog
    // =========================================================================

    async fn get_product(&self, id: i64) -> StoreResult<Option<Product>>;

    // =========================================================================
    // Promotions
    // =========================================================================

    /// All promotions ordered by id, or only those active at `at`.
    async fn get_promotions(&self, active_only: bool, at: DateTime<Utc>) -> StoreResult<Vec<Promotion>>;

    async fn get_promotion(&self, id: i64) -> StoreResult<Option<Promotion>>;

    /// Exact match after trimming.
    async fn get_promotion_by_name(&self, name: &str) -> StoreResult<Option<Promotion>>;

    /// Stores a new promotion. A taken name is a `Duplicate`.
    async fn insert_promotion(&self, promotion: &NewPromotion) -> StoreResult<Promotion>;

    /// Updates in place. `NotFound` when the id is unknown.
    async fn update_promotion(&self, promotion: &Promotion) -> StoreResult<()>;

    /// Clears associations, then deletes (or deactivates when sale lines
    /// reference the promotion). One unit of work.
    async fn delete_promotion(&self, id: i64) -> StoreResult<PromotionRemoval>;

    // =========================================================================
    // Associations
    // =========================================================================

    /// Product ids associated with a promotion, ascending.
    async fn get_associations(&self, promotion_id: i64) -> StoreResult<Vec<i64>>;

    async fn get_all_associations(&self) -> StoreResult<Vec<ProductPromotion>>;

    /// Promotions (any state) that include a product, ordered by id.
    async fn get_promotions_for_product(&self, product_id: i64) -> StoreResult<Vec<Promotion>>;

    /// An existing pair is a `Duplicate`.
    async fn add_association(&self, product_id: i64, promotion_id: i64) -> StoreResult<()>;

    /// Returns whether a pair was removed.
    async fn remove_association(&self, product_id: i64, promotion_id: i64) -> StoreResult<bool>;

    // =========================================================================
    // Invoices
    // =========================================================================

    /// Creates and persists a new open invoice.
    async fn create_invoice(&self, at: DateTime<Utc>) -> StoreResult<SaleInvoice>;

    async fn load_invoice(&self, id: i64) -> StoreResult<Option<SaleInvoice>>;

    /// Writes a whole invoice. Conflicts with `InvoiceFinalized` when the
    /// stored copy is already finalized.
    async fn save_invoice(&self, invoice: &SaleInvoice) -> StoreResult<()>;

    /// The most recently created invoice.
    async fn latest_invoice(&self) -> StoreResult<Option<SaleInvoice>>;

    /// Deletes an open invoice with its lines and payments.
    async fn delete_invoice(&self, id: i64) -> StoreResult<()>;

    /// Open → finalized, conditional on the invoice still being open.
    async fn finalize_invoice(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()>;

    // =========================================================================
    // Line Items
    // =========================================================================

    async fn find_line_by_token(&self, token: &str) -> StoreResult<Option<ProductSale>>;

    /// Stores a line under the next `line_no` and returns it as stored.
    async fn append_line(&self, line: &ProductSale) -> StoreResult<ProductSale>;

    /// Returns whether the line existed.
    async fn remove_line(&self, invoice_id: i64, line_no: i64) -> StoreResult<bool>;

    /// Returns how many lines were removed.
    async fn clear_lines(&self, invoice_id: i64) -> StoreResult<u64>;

    // =========================================================================
    // Payments
    // =========================================================================

    /// Stores a payment under the next `payment_no` and returns it as stored.
    async fn append_payment(&self, payment: &Payment) -> StoreResult<Payment>;

    /// Returns whether the payment existed.
    async fn remove_payment(&self, invoice_id: i64, payment_no: i64) -> StoreResult<bool>;

    /// Removes `payment_no` and records `replacement` under a fresh number
    /// in one unit of work. `NotFound` when `payment_no` is already gone.
    async fn replace_payment(
        &self,
        invoice_id: i64,
        payment_no: i64,
        replacement: &Payment,
    ) -> StoreResult<Payment>;

    // =========================================================================
    // Derived
    // =========================================================================

    /// Builds a Promotion Index for `now` from the stored promotions and
    /// associations.
    async fn build_index(&self, now: DateTime<Utc>) -> StoreResult<PromotionIndex> {
        let promotions = self.get_promotions(true, now).await?;
        if promotions.is_empty() {
            return Ok(PromotionIndex::empty(now));
        }

        let associations = self.get_all_associations().await?;
        Ok(PromotionIndex::build(&promotions, &associations, now))
    }
}
