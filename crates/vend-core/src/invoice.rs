//! # Invoice State Machine
//!
//! Owns the lifecycle of a single sale invoice.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │    open()                                                               │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  ┌────────┐  add_line / remove_line / clear_lines                      │
//! │  │  Open  │  add_payment / remove_payment / edit_payment               │
//! │  └───┬────┘◄─────────────────────────────────────┐                     │
//! │      │                                           │ (stays Open)        │
//! │      │ finalize()                                │                     │
//! │      ▼                                                                  │
//! │  ┌───────────┐  every mutation  → InvalidInvoiceState                  │
//! │  │ Finalized │  finalize again  → AlreadyFinalized                     │
//! │  └───────────┘  queries         → still allowed                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation checks state and validates its input before touching the
//! invoice, so a failed call leaves the invoice exactly as it was.
//!
//! Line and payment numbers come from per-invoice sequences (`line_seq`,
//! `payment_seq`) and are never reused, even after removals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::promotion::{resolve, PromotionIndex};
use crate::types::{Payment, PaymentDetails, Product, ProductSale};
use crate::validation::{validate_payment, validate_quantity, validate_uuid};
use crate::MAX_ITEM_QUANTITY;

// =============================================================================
// Invoice State
// =============================================================================

/// Lifecycle state of a sale invoice. `Finalized` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum InvoiceState {
    Open,
    Finalized,
}

// =============================================================================
// Invoice Header
// =============================================================================

/// Flat invoice row (no children), as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InvoiceHeader {
    pub id: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    pub finalized: bool,

    #[ts(as = "Option<String>")]
    pub finalized_at: Option<DateTime<Utc>>,

    /// Last line number handed out.
    pub line_seq: i64,

    /// Last payment number handed out.
    pub payment_seq: i64,
}

// =============================================================================
// Sale Invoice
// =============================================================================

/// A sale invoice with its line items and payments.
///
/// Children are private: the only way to change them is through the
/// state-checked methods below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleInvoice {
    id: i64,
    #[ts(as = "String")]
    created_at: DateTime<Utc>,
    state: InvoiceState,
    #[ts(as = "Option<String>")]
    finalized_at: Option<DateTime<Utc>>,
    lines: Vec<ProductSale>,
    payments: Vec<Payment>,
    line_seq: i64,
    payment_seq: i64,
}

impl SaleInvoice {
    /// A new, empty, open invoice.
    pub fn open(id: i64, created_at: DateTime<Utc>) -> Self {
        SaleInvoice {
            id,
            created_at,
            state: InvoiceState::Open,
            finalized_at: None,
            lines: Vec::new(),
            payments: Vec::new(),
            line_seq: 0,
            payment_seq: 0,
        }
    }

    /// Rebuilds an invoice from its persisted parts.
    ///
    /// Lines and payments are ordered by their sequence numbers; the
    /// sequences never fall behind the highest number present.
    pub fn restore(header: InvoiceHeader, mut lines: Vec<ProductSale>, mut payments: Vec<Payment>) -> Self {
        lines.sort_by_key(|l| l.line_no);
        payments.sort_by_key(|p| p.payment_no);

        let max_line = lines.last().map(|l| l.line_no).unwrap_or(0);
        let max_payment = payments.last().map(|p| p.payment_no).unwrap_or(0);

        SaleInvoice {
            id: header.id,
            created_at: header.created_at,
            state: if header.finalized {
                InvoiceState::Finalized
            } else {
                InvoiceState::Open
            },
            finalized_at: header.finalized_at,
            lines,
            payments,
            line_seq: header.line_seq.max(max_line),
            payment_seq: header.payment_seq.max(max_payment),
        }
    }

    /// The flat row for this invoice.
    pub fn header(&self) -> InvoiceHeader {
        InvoiceHeader {
            id: self.id,
            created_at: self.created_at,
            finalized: self.is_finalized(),
            finalized_at: self.finalized_at,
            line_seq: self.line_seq,
            payment_seq: self.payment_seq,
        }
    }

    // -------------------------------------------------------------------------
    // Guards
    // -------------------------------------------------------------------------

    /// Fails with `InvalidInvoiceState` unless the invoice is open.
    pub fn ensure_open(&self) -> CoreResult<()> {
        match self.state {
            InvoiceState::Open => Ok(()),
            InvoiceState::Finalized => Err(CoreError::InvalidInvoiceState { invoice_id: self.id }),
        }
    }

    // -------------------------------------------------------------------------
    // Line Items
    // -------------------------------------------------------------------------

    /// Prices `quantity` units of `product` against `index` and appends the
    /// resulting line. The same product added twice yields two lines.
    pub fn add_line(
        &mut self,
        product: &Product,
        quantity: i64,
        index: &PromotionIndex,
        at: DateTime<Utc>,
    ) -> CoreResult<ProductSale> {
        self.push_line(product, quantity, index, at, None)
    }

    /// As [`SaleInvoice::add_line`], stamping the line with a client
    /// deduplication token (must be a UUID).
    pub fn add_line_with_token(
        &mut self,
        product: &Product,
        quantity: i64,
        index: &PromotionIndex,
        at: DateTime<Utc>,
        token: &str,
    ) -> CoreResult<ProductSale> {
        validate_uuid(token)?;
        self.push_line(product, quantity, index, at, Some(token.to_string()))
    }

    fn push_line(
        &mut self,
        product: &Product,
        quantity: i64,
        index: &PromotionIndex,
        at: DateTime<Utc>,
        request_token: Option<String>,
    ) -> CoreResult<ProductSale> {
        self.ensure_open()?;
        validate_quantity(quantity, MAX_ITEM_QUANTITY)?;

        let decision = resolve(product, quantity, index)?;

        self.line_seq += 1;
        let line = ProductSale {
            sale_invoice_id: self.id,
            line_no: self.line_seq,
            product_id: product.id,
            quantity,
            unit_price_cents: decision.applied_price_cents,
            promotion_id: decision.source_promotion,
            request_token,
            created_at: at,
        };
        self.lines.push(line.clone());

        Ok(line)
    }

    /// Removes the first line for `product_id`. Absent product is a no-op.
    pub fn remove_line(&mut self, product_id: i64) -> CoreResult<Option<ProductSale>> {
        self.ensure_open()?;

        let position = self.lines.iter().position(|l| l.product_id == product_id);
        Ok(position.map(|i| self.lines.remove(i)))
    }

    /// Removes every line; returns what was removed.
    pub fn clear_lines(&mut self) -> CoreResult<Vec<ProductSale>> {
        self.ensure_open()?;
        Ok(std::mem::take(&mut self.lines))
    }

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    pub fn add_payment(&mut self, details: PaymentDetails, at: DateTime<Utc>) -> CoreResult<Payment> {
        self.ensure_open()?;
        validate_payment(&details)?;

        self.payment_seq += 1;
        let payment = Payment {
            sale_invoice_id: self.id,
            payment_no: self.payment_seq,
            payment_method_id: details.payment_method_id,
            amount_cents: details.amount_cents,
            created_at: at,
        };
        self.payments.push(payment.clone());

        Ok(payment)
    }

    /// Removes the first payment matching `criteria` (by payment number).
    /// No match is a no-op.
    pub fn remove_payment(&mut self, criteria: &PaymentDetails) -> CoreResult<Option<Payment>> {
        self.ensure_open()?;

        let position = self.payments.iter().position(|p| p.matches(criteria));
        Ok(position.map(|i| self.payments.remove(i)))
    }

    /// Replaces the payment matching `criteria` with `replacement`.
    ///
    /// Remove-then-add of a fully specified record: the replacement gets a
    /// fresh payment number. Fails with `PaymentNotFound` when nothing
    /// matches; the invoice is unchanged on any failure.
    pub fn edit_payment(
        &mut self,
        criteria: &PaymentDetails,
        replacement: PaymentDetails,
        at: DateTime<Utc>,
    ) -> CoreResult<(Payment, Payment)> {
        self.ensure_open()?;
        validate_payment(&replacement)?;

        let position = self
            .payments
            .iter()
            .position(|p| p.matches(criteria))
            .ok_or(CoreError::PaymentNotFound { invoice_id: self.id })?;

        let removed = self.payments.remove(position);
        let added = self.add_payment(replacement, at)?;

        Ok((removed, added))
    }

    // -------------------------------------------------------------------------
    // Finalization
    // -------------------------------------------------------------------------

    /// Open → Finalized. A second call fails with `AlreadyFinalized`.
    pub fn finalize(&mut self, at: DateTime<Utc>) -> CoreResult<()> {
        if self.is_finalized() {
            return Err(CoreError::AlreadyFinalized { invoice_id: self.id });
        }

        self.state = InvoiceState::Finalized;
        self.finalized_at = Some(at);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries (legal in any state)
    // -------------------------------------------------------------------------

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> InvoiceState {
        self.state
    }

    pub fn finalized_at(&self) -> Option<DateTime<Utc>> {
        self.finalized_at
    }

    pub fn is_finalized(&self) -> bool {
        self.state == InvoiceState::Finalized
    }

    /// Line items in insertion order.
    pub fn lines(&self) -> &[ProductSale] {
        &self.lines
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    /// Σ unit price × quantity over all lines.
    pub fn line_total(&self) -> Money {
        self.lines.iter().map(ProductSale::line_total).sum()
    }

    /// Σ payment amounts.
    pub fn paid_total(&self) -> Money {
        self.payments.iter().map(Payment::amount).sum()
    }

    /// Line total minus payments. Negative when overpaid. Never stored.
    pub fn total_due(&self) -> Money {
        self.line_total() - self.paid_total()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::types::{ProductPromotion, Promotion};
    use chrono::Duration;

    fn shirt() -> Product {
        Product::new(42, "Linen shirt", Money::from_cents(1200))
    }

    fn index(now: DateTime<Utc>) -> PromotionIndex {
        let promo = Promotion {
            id: 1,
            name: "Three for nine".to_string(),
            quantity: 3,
            promotion_price_cents: 900,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
            active: true,
        };
        PromotionIndex::build(
            &[promo],
            &[ProductPromotion {
                product_id: 42,
                promotion_id: 1,
            }],
            now,
        )
    }

    fn cash(cents: i64) -> PaymentDetails {
        PaymentDetails::new(1, Money::from_cents(cents))
    }

    #[test]
    fn test_add_line_freezes_resolved_price() {
        let now = Utc::now();
        let mut invoice = SaleInvoice::open(1, now);

        let line = invoice.add_line(&shirt(), 5, &index(now), now).unwrap();
        assert_eq!(line.line_no, 1);
        assert_eq!(line.unit_price_cents, 900);
        assert_eq!(line.promotion_id, Some(1));

        // A later index without the promotion does not touch the stored line.
        invoice
            .add_line(&shirt(), 5, &PromotionIndex::empty(now), now)
            .unwrap();
        assert_eq!(invoice.lines()[0].unit_price_cents, 900);
        assert_eq!(invoice.lines()[1].unit_price_cents, 1200);
    }

    #[test]
    fn test_same_product_twice_gives_two_lines() {
        let now = Utc::now();
        let mut invoice = SaleInvoice::open(1, now);
        let idx = index(now);

        invoice.add_line(&shirt(), 1, &idx, now).unwrap();
        invoice.add_line(&shirt(), 1, &idx, now).unwrap();
        assert_eq!(invoice.lines().len(), 2);
        assert_eq!(invoice.lines()[1].line_no, 2);
    }

    #[test]
    fn test_add_line_validates_before_mutating() {
        let now = Utc::now();
        let mut invoice = SaleInvoice::open(1, now);

        let err = invoice.add_line(&shirt(), 0, &index(now), now).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::MustBePositive { .. })
        ));
        assert!(invoice.lines().is_empty());
        assert_eq!(invoice.header().line_seq, 0);

        let err = invoice
            .add_line_with_token(&shirt(), 1, &index(now), now, "nope")
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_add_then_remove_restores_lines() {
        let now = Utc::now();
        let mut invoice = SaleInvoice::open(1, now);
        let socks = Product::new(7, "Socks", Money::from_cents(300));
        invoice.add_line(&socks, 2, &index(now), now).unwrap();
        let before = invoice.lines().to_vec();

        invoice.add_line(&shirt(), 1, &index(now), now).unwrap();
        let removed = invoice.remove_line(42).unwrap();
        assert_eq!(removed.map(|l| l.product_id), Some(42));
        assert_eq!(invoice.lines(), before.as_slice());
    }

    #[test]
    fn test_remove_absent_line_is_noop() {
        let now = Utc::now();
        let mut invoice = SaleInvoice::open(1, now);
        assert_eq!(invoice.remove_line(99).unwrap(), None);
        assert!(invoice.clear_lines().unwrap().is_empty());
    }

    #[test]
    fn test_line_numbers_not_reused() {
        let now = Utc::now();
        let mut invoice = SaleInvoice::open(1, now);
        invoice.add_line(&shirt(), 1, &index(now), now).unwrap();
        invoice.remove_line(42).unwrap();
        let line = invoice.add_line(&shirt(), 1, &index(now), now).unwrap();
        assert_eq!(line.line_no, 2);
    }

    #[test]
    fn test_payments() {
        let now = Utc::now();
        let mut invoice = SaleInvoice::open(1, now);
        invoice.add_line(&shirt(), 5, &index(now), now).unwrap();

        invoice.add_payment(cash(2000), now).unwrap();
        invoice.add_payment(cash(2000), now).unwrap();
        assert_eq!(invoice.total_due().cents(), 500);

        let removed = invoice.remove_payment(&cash(2000)).unwrap().unwrap();
        assert_eq!(removed.payment_no, 1);
        assert_eq!(invoice.remove_payment(&cash(1)).unwrap(), None);

        let (old, new) = invoice
            .edit_payment(&cash(2000), PaymentDetails::new(2, Money::from_cents(2500)), now)
            .unwrap();
        assert_eq!(old.payment_no, 2);
        assert_eq!(new.payment_no, 3);
        assert_eq!(new.payment_method_id, 2);
        assert!(invoice.total_due().is_zero());
    }

    #[test]
    fn test_edit_missing_payment() {
        let now = Utc::now();
        let mut invoice = SaleInvoice::open(3, now);
        invoice.add_payment(cash(100), now).unwrap();

        let err = invoice.edit_payment(&cash(999), cash(50), now).unwrap_err();
        assert_eq!(err, CoreError::PaymentNotFound { invoice_id: 3 });
        assert_eq!(invoice.payments().len(), 1);

        let err = invoice.edit_payment(&cash(100), cash(0), now).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(invoice.payments()[0].amount_cents, 100);
    }

    #[test]
    fn test_finalized_rejects_every_mutation() {
        let now = Utc::now();
        let mut invoice = SaleInvoice::open(5, now);
        invoice.add_line(&shirt(), 5, &index(now), now).unwrap();
        invoice.add_payment(cash(500), now).unwrap();
        invoice.finalize(now).unwrap();

        let expected = CoreError::InvalidInvoiceState { invoice_id: 5 };
        assert_eq!(invoice.add_line(&shirt(), 1, &index(now), now).unwrap_err(), expected);
        assert_eq!(invoice.remove_line(42).unwrap_err(), expected);
        assert_eq!(invoice.clear_lines().unwrap_err(), expected);
        assert_eq!(invoice.add_payment(cash(1), now).unwrap_err(), expected);
        assert_eq!(invoice.remove_payment(&cash(500)).unwrap_err(), expected);
        assert_eq!(
            invoice.edit_payment(&cash(500), cash(1), now).unwrap_err(),
            expected
        );

        assert_eq!(invoice.lines().len(), 1);
        assert_eq!(invoice.lines()[0].unit_price_cents, 900);
        assert_eq!(invoice.payments().len(), 1);
    }

    #[test]
    fn test_finalize_twice() {
        let now = Utc::now();
        let mut invoice = SaleInvoice::open(5, now);
        invoice.finalize(now).unwrap();
        let snapshot = invoice.clone();

        let err = invoice.finalize(now + Duration::seconds(5)).unwrap_err();
        assert_eq!(err, CoreError::AlreadyFinalized { invoice_id: 5 });
        assert_eq!(invoice, snapshot);
        assert_eq!(invoice.finalized_at(), Some(now));
    }

    #[test]
    fn test_restore_round_trip() {
        let now = Utc::now();
        let mut invoice = SaleInvoice::open(9, now);
        invoice.add_line(&shirt(), 3, &index(now), now).unwrap();
        invoice.add_line(&shirt(), 1, &index(now), now).unwrap();
        invoice.remove_line(42).unwrap();
        invoice.add_payment(cash(100), now).unwrap();

        let mut lines = invoice.lines().to_vec();
        lines.reverse();
        let restored = SaleInvoice::restore(invoice.header(), lines, invoice.payments().to_vec());
        assert_eq!(restored, invoice);
        assert_eq!(restored.state(), InvoiceState::Open);
    }
}
