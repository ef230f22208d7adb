//! # Transaction Orchestrator
//!
//! The façade callers use to run a sale.
//!
//! ## Mutation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sell(invoice, product, qty)                                            │
//! │                                                                         │
//! │  1. validate input                  ValidationError, nothing touched    │
//! │  2. acquire per-invoice lock        serializes this orchestrator only   │
//! │  3. load invoice                    NotFound                            │
//! │  4. check invoice is open           InvalidInvoiceState                 │
//! │  5. look up product                 NotFound (Product)                  │
//! │  6. snapshot promotion index        rebuild if stale                    │
//! │  7. mutate the in-memory invoice    price resolved and frozen here      │
//! │  8. persist the single change       store re-checks `finalized` and     │
//! │                                     assigns the line number in the same │
//! │                                     transaction as the write            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Step 8 is the only write. If it fails, nothing was persisted and the
//! in-memory copy is dropped, so callers never observe half a mutation.
//! What callers get back is the record as the store kept it, never the
//! in-memory copy, so orchestrators sharing one store agree on numbering.
//!
//! The total due is always derived from the lines and payments, never
//! stored.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use vend_core::promotion::apply_promotions;
use vend_core::validation::{validate_payment, validate_quantity, validate_uuid};
use vend_core::{
    Money, Payment, PaymentDetails, PriceDecision, Product, ProductSale, QuoteItem, SaleInvoice,
    ValidationError, MAX_ITEM_QUANTITY,
};

use crate::error::{EngineError, EngineResult, StoreError};
use crate::index::PromotionIndexCache;
use crate::locks::InvoiceLocks;
use crate::store::Store;

/// Coordinates the invoice state machine, the promotion resolver and the
/// store.
pub struct TransactionOrchestrator<S: Store + ?Sized> {
    store: Arc<S>,
    index: Arc<PromotionIndexCache>,
    locks: InvoiceLocks,
    max_item_quantity: i64,
}

impl<S: Store + ?Sized> TransactionOrchestrator<S> {
    pub fn new(store: Arc<S>, index: Arc<PromotionIndexCache>) -> Self {
        TransactionOrchestrator {
            store,
            index,
            locks: InvoiceLocks::new(),
            max_item_quantity: MAX_ITEM_QUANTITY,
        }
    }

    /// Lowers the per-line quantity ceiling. Values outside
    /// `1..=MAX_ITEM_QUANTITY` are clamped.
    pub fn with_max_item_quantity(mut self, max: i64) -> Self {
        self.max_item_quantity = max.clamp(1, MAX_ITEM_QUANTITY);
        self
    }

    pub fn index(&self) -> &Arc<PromotionIndexCache> {
        &self.index
    }

    // =========================================================================
    // Invoice Lifecycle
    // =========================================================================

    /// Creates a new open invoice and persists it immediately.
    pub async fn open_invoice(&self) -> EngineResult<SaleInvoice> {
        let invoice = self.store.create_invoice(Utc::now()).await?;
        info!(invoice_id = invoice.id(), "Invoice opened");
        Ok(invoice)
    }

    /// Finalizes an invoice. A second checkout fails with `AlreadyFinalized`.
    pub async fn checkout(&self, invoice_id: i64) -> EngineResult<SaleInvoice> {
        let _guard = self.locks.acquire(invoice_id).await;
        let mut invoice = self.load(invoice_id).await?;

        let now = Utc::now();
        invoice.finalize(now)?;

        self.store
            .finalize_invoice(invoice_id, now)
            .await
            .map_err(|e| match e {
                StoreError::InvoiceFinalized { invoice_id } => {
                    EngineError::AlreadyFinalized { invoice_id }
                }
                other => other.into(),
            })?;

        // Writers sharing the store may have added lines since the load.
        let invoice = self.load(invoice_id).await?;
        info!(
            invoice_id,
            lines = invoice.lines().len(),
            total_cents = invoice.line_total().cents(),
            paid_cents = invoice.paid_total().cents(),
            "Invoice finalized"
        );
        Ok(invoice)
    }

    /// Deletes an open invoice with its lines and payments.
    pub async fn delete_invoice(&self, invoice_id: i64) -> EngineResult<()> {
        let _guard = self.locks.acquire(invoice_id).await;
        let invoice = self.load(invoice_id).await?;
        invoice.ensure_open()?;

        self.store.delete_invoice(invoice_id).await?;
        info!(invoice_id, "Invoice deleted");
        Ok(())
    }

    // =========================================================================
    // Line Items
    // =========================================================================

    /// Sells `quantity` units of a product on an open invoice.
    ///
    /// Not safe to retry blindly: every call adds a line. Use
    /// [`TransactionOrchestrator::sell_with_token`] for retryable sells.
    pub async fn sell(&self, invoice_id: i64, product_id: i64, quantity: i64) -> EngineResult<ProductSale> {
        validate_quantity(quantity, self.max_item_quantity)?;

        let _guard = self.locks.acquire(invoice_id).await;
        let mut invoice = self.load_open(invoice_id).await?;
        let product = self.product(product_id).await?;

        let now = Utc::now();
        let index = self.index.snapshot_for(self.store.as_ref(), now).await?;
        let line = invoice.add_line(&product, quantity, &index, now)?;

        let stored = self.store.append_line(&line).await?;
        debug!(
            invoice_id,
            product_id,
            quantity,
            unit_price_cents = stored.unit_price_cents,
            promotion_id = ?stored.promotion_id,
            "Line added"
        );
        Ok(stored)
    }

    /// Idempotent sell. A token seen before on this invoice returns the line
    /// created the first time instead of adding another.
    pub async fn sell_with_token(
        &self,
        invoice_id: i64,
        product_id: i64,
        quantity: i64,
        token: &str,
    ) -> EngineResult<ProductSale> {
        validate_quantity(quantity, self.max_item_quantity)?;
        validate_uuid(token)?;

        let _guard = self.locks.acquire(invoice_id).await;

        if let Some(existing) = self.store.find_line_by_token(token).await? {
            if existing.sale_invoice_id != invoice_id {
                return Err(ValidationError::Duplicate {
                    field: "request_token".to_string(),
                    value: token.to_string(),
                }
                .into());
            }
            debug!(invoice_id, line_no = existing.line_no, "Replayed sell token");
            return Ok(existing);
        }

        let mut invoice = self.load_open(invoice_id).await?;
        let product = self.product(product_id).await?;

        let now = Utc::now();
        let index = self.index.snapshot_for(self.store.as_ref(), now).await?;
        let line = invoice.add_line_with_token(&product, quantity, &index, now, token)?;

        Ok(self.store.append_line(&line).await?)
    }

    /// Removes the first line for a product. No line for it is a no-op.
    pub async fn void(&self, invoice_id: i64, product_id: i64) -> EngineResult<Option<ProductSale>> {
        let _guard = self.locks.acquire(invoice_id).await;
        let mut invoice = self.load_open(invoice_id).await?;
        self.product(product_id).await?;

        let Some(line) = invoice.remove_line(product_id)? else {
            return Ok(None);
        };

        if !self.store.remove_line(invoice_id, line.line_no).await? {
            debug!(invoice_id, line_no = line.line_no, "Line already removed");
            return Ok(None);
        }
        debug!(invoice_id, product_id, line_no = line.line_no, "Line voided");
        Ok(Some(line))
    }

    /// Removes every line; returns what was removed.
    pub async fn clear_lines(&self, invoice_id: i64) -> EngineResult<Vec<ProductSale>> {
        let _guard = self.locks.acquire(invoice_id).await;
        let mut invoice = self.load_open(invoice_id).await?;

        let mut removed = invoice.clear_lines()?;
        if self.store.clear_lines(invoice_id).await? == 0 {
            removed.clear();
        }

        debug!(invoice_id, removed = removed.len(), "Lines cleared");
        Ok(removed)
    }

    // =========================================================================
    // Payments
    // =========================================================================

    /// Records a payment. Several payments may split one invoice.
    pub async fn pay(&self, invoice_id: i64, payment_method_id: i64, amount: Money) -> EngineResult<Payment> {
        let details = PaymentDetails::new(payment_method_id, amount);
        validate_payment(&details)?;

        let _guard = self.locks.acquire(invoice_id).await;
        let mut invoice = self.load_open(invoice_id).await?;

        let payment = invoice.add_payment(details, Utc::now())?;
        let stored = self.store.append_payment(&payment).await?;

        debug!(
            invoice_id,
            payment_no = stored.payment_no,
            amount_cents = stored.amount_cents,
            "Payment recorded"
        );
        Ok(stored)
    }

    /// Removes the first payment matching `criteria`. No match is a no-op.
    pub async fn remove_payment(
        &self,
        invoice_id: i64,
        criteria: PaymentDetails,
    ) -> EngineResult<Option<Payment>> {
        let _guard = self.locks.acquire(invoice_id).await;
        let mut invoice = self.load_open(invoice_id).await?;

        let Some(payment) = invoice.remove_payment(&criteria)? else {
            return Ok(None);
        };

        if !self.store.remove_payment(invoice_id, payment.payment_no).await? {
            debug!(invoice_id, payment_no = payment.payment_no, "Payment already removed");
            return Ok(None);
        }
        Ok(Some(payment))
    }

    /// Replaces the payment matching `criteria` with `replacement`, as one
    /// remove-then-add. Returns the new payment.
    pub async fn edit_payment(
        &self,
        invoice_id: i64,
        criteria: PaymentDetails,
        replacement: PaymentDetails,
    ) -> EngineResult<Payment> {
        validate_payment(&replacement)?;

        let _guard = self.locks.acquire(invoice_id).await;
        let mut invoice = self.load_open(invoice_id).await?;

        let (removed, replacement) = invoice.edit_payment(&criteria, replacement, Utc::now())?;
        let added = self
            .store
            .replace_payment(invoice_id, removed.payment_no, &replacement)
            .await?;

        debug!(
            invoice_id,
            removed = removed.payment_no,
            added = added.payment_no,
            "Payment edited"
        );
        Ok(added)
    }

    // =========================================================================
    // Pricing Quotes
    // =========================================================================

    /// Prices a batch of products without touching any invoice.
    pub async fn apply_promotions(&self, items: &[QuoteItem]) -> EngineResult<Vec<PriceDecision>> {
        let mut priced = Vec::with_capacity(items.len());
        for item in items {
            validate_quantity(item.quantity, self.max_item_quantity)?;
            priced.push((self.product(item.product_id).await?, item.quantity));
        }

        let index = self.index.snapshot_for(self.store.as_ref(), Utc::now()).await?;
        Ok(apply_promotions(&priced, &index)?)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_invoice(&self, invoice_id: i64) -> EngineResult<SaleInvoice> {
        self.load(invoice_id).await
    }

    pub async fn is_finalized(&self, invoice_id: i64) -> EngineResult<bool> {
        Ok(self.load(invoice_id).await?.is_finalized())
    }

    pub async fn lines(&self, invoice_id: i64) -> EngineResult<Vec<ProductSale>> {
        Ok(self.load(invoice_id).await?.lines().to_vec())
    }

    pub async fn payments(&self, invoice_id: i64) -> EngineResult<Vec<Payment>> {
        Ok(self.load(invoice_id).await?.payments().to_vec())
    }

    /// Σ applied price × quantity over the lines, minus Σ payments.
    pub async fn total_due(&self, invoice_id: i64) -> EngineResult<Money> {
        Ok(self.load(invoice_id).await?.total_due())
    }

    /// The most recently opened invoice.
    pub async fn previous_invoice(&self) -> EngineResult<Option<SaleInvoice>> {
        Ok(self.store.latest_invoice().await?)
    }

    /// Products of an invoice's lines, in line order.
    pub async fn products_in_invoice(&self, invoice_id: i64) -> EngineResult<Vec<Product>> {
        let invoice = self.load(invoice_id).await?;

        let mut products = Vec::with_capacity(invoice.lines().len());
        for line in invoice.lines() {
            products.push(self.product(line.product_id).await?);
        }
        Ok(products)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn load(&self, invoice_id: i64) -> EngineResult<SaleInvoice> {
        self.store
            .load_invoice(invoice_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Invoice", invoice_id))
    }

    async fn load_open(&self, invoice_id: i64) -> EngineResult<SaleInvoice> {
        let invoice = self.load(invoice_id).await?;
        invoice.ensure_open()?;
        Ok(invoice)
    }

    async fn product(&self, product_id: i64) -> EngineResult<Product> {
        self.store
            .get_product(product_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Product", product_id))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
