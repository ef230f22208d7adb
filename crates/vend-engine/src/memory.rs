//! # In-Memory Store
//!
//! Arena-style [`Store`]: flat tables keyed by id, with ids as the only
//! cross-references. One async mutex guards all tables, so every call is a
//! single atomic unit of work, the same guarantee a SQLite transaction gives
//! [`crate::SqliteStore`].
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Tables                                                                 │
//! │                                                                         │
//! │  products      BTreeMap<id, Product>                                   │
//! │  promotions    BTreeMap<id, Promotion>                                 │
//! │  associations  BTreeSet<(product_id, promotion_id)>                    │
//! │  invoices      BTreeMap<id, InvoiceHeader>                             │
//! │  lines         BTreeMap<(invoice_id, line_no), ProductSale>            │
//! │  payments      BTreeMap<(invoice_id, payment_no), Payment>             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`MemoryStore::set_unavailable`] makes every call fail with
//! [`StoreError::Unavailable`], for exercising I/O failure paths.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use vend_core::{
    InvoiceHeader, NewPromotion, Payment, Product, ProductPromotion, ProductSale, Promotion,
    PromotionRemoval, SaleInvoice,
};

use crate::error::{StoreError, StoreResult};
use crate::store::Store;

// =============================================================================
// Tables
// =============================================================================

#[derive(Debug, Default)]
struct Tables {
    products: BTreeMap<i64, Product>,
    promotions: BTreeMap<i64, Promotion>,
    associations: BTreeSet<(i64, i64)>,
    invoices: BTreeMap<i64, InvoiceHeader>,
    lines: BTreeMap<(i64, i64), ProductSale>,
    payments: BTreeMap<(i64, i64), Payment>,
    last_product_id: i64,
    last_promotion_id: i64,
    last_invoice_id: i64,
}

impl Tables {
    /// The header of an invoice that is still open, for writing.
    fn open_invoice(&mut self, invoice_id: i64) -> StoreResult<&mut InvoiceHeader> {
        match self.invoices.get_mut(&invoice_id) {
            None => Err(StoreError::not_found("Invoice", invoice_id)),
            Some(header) if header.finalized => Err(StoreError::InvoiceFinalized { invoice_id }),
            Some(header) => Ok(header),
        }
    }

    fn lines_of(&self, invoice_id: i64) -> impl Iterator<Item = &ProductSale> + '_ {
        self.lines
            .range((invoice_id, i64::MIN)..=(invoice_id, i64::MAX))
            .map(|(_, line)| line)
    }

    fn payments_of(&self, invoice_id: i64) -> impl Iterator<Item = &Payment> + '_ {
        self.payments
            .range((invoice_id, i64::MIN)..=(invoice_id, i64::MAX))
            .map(|(_, payment)| payment)
    }

    fn invoice(&self, invoice_id: i64) -> Option<SaleInvoice> {
        let header = self.invoices.get(&invoice_id)?.clone();
        let lines = self.lines_of(invoice_id).cloned().collect();
        let payments = self.payments_of(invoice_id).cloned().collect();
        Some(SaleInvoice::restore(header, lines, payments))
    }

    fn drop_children(&mut self, invoice_id: i64) -> u64 {
        let before = self.lines.len();
        self.lines.retain(|(id, _), _| *id != invoice_id);
        self.payments.retain(|(id, _), _| *id != invoice_id);
        (before - self.lines.len()) as u64
    }

    fn name_taken(&self, name: &str, except_id: Option<i64>) -> bool {
        self.promotions
            .values()
            .any(|p| p.name == name && Some(p.id) != except_id)
    }

    /// Stores a payment under the invoice's next payment number.
    fn insert_payment(&mut self, payment: &Payment) -> StoreResult<Payment> {
        let header = self.open_invoice(payment.sale_invoice_id)?;
        header.payment_seq += 1;

        let stored = Payment {
            payment_no: header.payment_seq,
            ..payment.clone()
        };
        self.payments
            .insert((stored.sale_invoice_id, stored.payment_no), stored.clone());
        Ok(stored)
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-process [`Store`] backed by flat tables.
///
/// ## Usage
/// ```rust,ignore
/// let store = MemoryStore::new();
/// store.insert_product(Product::new(42, "Linen shirt", Money::from_cents(1200))).await?;
/// let engine = Engine::new(store, &EngineConfig::default());
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a product to the catalog. A positive `product.id` is kept,
    /// otherwise the next free id is assigned.
    pub async fn insert_product(&self, product: Product) -> StoreResult<Product> {
        self.check()?;
        let mut tables = self.tables.lock().await;

        let id = if product.id > 0 {
            product.id
        } else {
            tables.last_product_id + 1
        };
        if tables.products.contains_key(&id) {
            return Err(StoreError::duplicate("products.id", id));
        }

        tables.last_product_id = tables.last_product_id.max(id);
        let stored = Product { id, ..product };
        tables.products.insert(id, stored.clone());
        Ok(stored)
    }

    /// While set, every call fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Catalog
    // =========================================================================

    async fn get_product(&self, id: i64) -> StoreResult<Option<Product>> {
        self.check()?;
        Ok(self.tables.lock().await.products.get(&id).cloned())
    }

    // =========================================================================
    // Promotions
    // =========================================================================

    async fn get_promotions(&self, active_only: bool, at: DateTime<Utc>) -> StoreResult<Vec<Promotion>> {
        self.check()?;
        let tables = self.tables.lock().await;

        Ok(tables
            .promotions
            .values()
            .filter(|p| !active_only || p.is_active_at(at))
            .cloned()
            .collect())
    }

    async fn get_promotion(&self, id: i64) -> StoreResult<Option<Promotion>> {
        self.check()?;
        Ok(self.tables.lock().await.promotions.get(&id).cloned())
    }

    async fn get_promotion_by_name(&self, name: &str) -> StoreResult<Option<Promotion>> {
        self.check()?;
        let name = name.trim();
        let tables = self.tables.lock().await;

        Ok(tables.promotions.values().find(|p| p.name == name).cloned())
    }

    async fn insert_promotion(&self, promotion: &NewPromotion) -> StoreResult<Promotion> {
        self.check()?;
        let mut tables = self.tables.lock().await;

        let name = promotion.name.trim().to_string();
        if tables.name_taken(&name, None) {
            return Err(StoreError::duplicate("name", name));
        }

        tables.last_promotion_id += 1;
        let stored = NewPromotion {
            name,
            ..promotion.clone()
        }
        .with_id(tables.last_promotion_id);

        debug!(promotion_id = stored.id, "Inserted promotion");
        tables.promotions.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_promotion(&self, promotion: &Promotion) -> StoreResult<()> {
        self.check()?;
        let mut tables = self.tables.lock().await;

        let name = promotion.name.trim().to_string();
        if !tables.promotions.contains_key(&promotion.id) {
            return Err(StoreError::not_found("Promotion", promotion.id));
        }
        if tables.name_taken(&name, Some(promotion.id)) {
            return Err(StoreError::duplicate("name", name));
        }

        tables.promotions.insert(
            promotion.id,
            Promotion {
                name,
                ..promotion.clone()
            },
        );
        Ok(())
    }

    async fn delete_promotion(&self, id: i64) -> StoreResult<PromotionRemoval> {
        self.check()?;
        let mut tables = self.tables.lock().await;

        if !tables.promotions.contains_key(&id) {
            return Err(StoreError::not_found("Promotion", id));
        }

        tables.associations.retain(|&(_, promotion_id)| promotion_id != id);

        let referenced = tables.lines.values().any(|l| l.promotion_id == Some(id));
        if referenced {
            if let Some(promotion) = tables.promotions.get_mut(&id) {
                promotion.active = false;
            }
            Ok(PromotionRemoval::Deactivated)
        } else {
            tables.promotions.remove(&id);
            Ok(PromotionRemoval::Deleted)
        }
    }

    // =========================================================================
    // Associations
    // =========================================================================

    async fn get_associations(&self, promotion_id: i64) -> StoreResult<Vec<i64>> {
        self.check()?;
        let tables = self.tables.lock().await;

        // Set order is (product_id, promotion_id), so product ids come out ascending.
        Ok(tables
            .associations
            .iter()
            .filter(|&&(_, promo)| promo == promotion_id)
            .map(|&(product_id, _)| product_id)
            .collect())
    }

    async fn get_all_associations(&self) -> StoreResult<Vec<ProductPromotion>> {
        self.check()?;
        let tables = self.tables.lock().await;

        Ok(tables
            .associations
            .iter()
            .map(|&(product_id, promotion_id)| ProductPromotion {
                product_id,
                promotion_id,
            })
            .collect())
    }

    async fn get_promotions_for_product(&self, product_id: i64) -> StoreResult<Vec<Promotion>> {
        self.check()?;
        let tables = self.tables.lock().await;

        Ok(tables
            .associations
            .range((product_id, i64::MIN)..=(product_id, i64::MAX))
            .filter_map(|(_, promotion_id)| tables.promotions.get(promotion_id).cloned())
            .collect())
    }

    async fn add_association(&self, product_id: i64, promotion_id: i64) -> StoreResult<()> {
        self.check()?;
        let mut tables = self.tables.lock().await;

        if !tables.products.contains_key(&product_id) {
            return Err(StoreError::not_found("Product", product_id));
        }
        if !tables.promotions.contains_key(&promotion_id) {
            return Err(StoreError::not_found("Promotion", promotion_id));
        }
        if !tables.associations.insert((product_id, promotion_id)) {
            return Err(StoreError::duplicate(
                "product_promotion",
                format!("{product_id}/{promotion_id}"),
            ));
        }

        Ok(())
    }

    async fn remove_association(&self, product_id: i64, promotion_id: i64) -> StoreResult<bool> {
        self.check()?;
        let mut tables = self.tables.lock().await;
        Ok(tables.associations.remove(&(product_id, promotion_id)))
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    async fn create_invoice(&self, at: DateTime<Utc>) -> StoreResult<SaleInvoice> {
        self.check()?;
        let mut tables = self.tables.lock().await;

        tables.last_invoice_id += 1;
        let invoice = SaleInvoice::open(tables.last_invoice_id, at);
        tables.invoices.insert(invoice.id(), invoice.header());

        debug!(invoice_id = invoice.id(), "Created invoice");
        Ok(invoice)
    }

    async fn load_invoice(&self, id: i64) -> StoreResult<Option<SaleInvoice>> {
        self.check()?;
        Ok(self.tables.lock().await.invoice(id))
    }

    async fn save_invoice(&self, invoice: &SaleInvoice) -> StoreResult<()> {
        self.check()?;
        let mut tables = self.tables.lock().await;

        let id = invoice.id();
        if tables.invoices.get(&id).is_some_and(|h| h.finalized) {
            return Err(StoreError::InvoiceFinalized { invoice_id: id });
        }

        let mut header = invoice.header();
        if let Some(stored) = tables.invoices.get(&id) {
            header.line_seq = header.line_seq.max(stored.line_seq);
            header.payment_seq = header.payment_seq.max(stored.payment_seq);
        }

        tables.drop_children(id);
        tables.invoices.insert(id, header);
        tables.last_invoice_id = tables.last_invoice_id.max(id);
        for line in invoice.lines() {
            tables.lines.insert((id, line.line_no), line.clone());
        }
        for payment in invoice.payments() {
            tables.payments.insert((id, payment.payment_no), payment.clone());
        }

        Ok(())
    }

    async fn latest_invoice(&self) -> StoreResult<Option<SaleInvoice>> {
        self.check()?;
        let tables = self.tables.lock().await;

        Ok(tables
            .invoices
            .keys()
            .next_back()
            .and_then(|&id| tables.invoice(id)))
    }

    async fn delete_invoice(&self, id: i64) -> StoreResult<()> {
        self.check()?;
        let mut tables = self.tables.lock().await;

        tables.open_invoice(id)?;
        tables.drop_children(id);
        tables.invoices.remove(&id);
        Ok(())
    }

    async fn finalize_invoice(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        self.check()?;
        let mut tables = self.tables.lock().await;

        let header = tables.open_invoice(id)?;
        header.finalized = true;
        header.finalized_at = Some(at);
        Ok(())
    }

    // =========================================================================
    // Line Items
    // =========================================================================

    async fn find_line_by_token(&self, token: &str) -> StoreResult<Option<ProductSale>> {
        self.check()?;
        let tables = self.tables.lock().await;

        Ok(tables
            .lines
            .values()
            .find(|l| l.request_token.as_deref() == Some(token))
            .cloned())
    }

    async fn append_line(&self, line: &ProductSale) -> StoreResult<ProductSale> {
        self.check()?;
        let mut tables = self.tables.lock().await;

        if let Some(token) = &line.request_token {
            let existing = tables
                .lines
                .values()
                .find(|l| l.request_token.as_deref() == Some(token.as_str()))
                .cloned();

            if let Some(existing) = existing {
                if existing.sale_invoice_id != line.sale_invoice_id {
                    return Err(StoreError::duplicate("request_token", token));
                }
                return Ok(existing);
            }
        }

        if !tables.products.contains_key(&line.product_id) {
            return Err(StoreError::not_found("Product", line.product_id));
        }

        let header = tables.open_invoice(line.sale_invoice_id)?;
        header.line_seq += 1;

        let stored = ProductSale {
            line_no: header.line_seq,
            ..line.clone()
        };
        tables
            .lines
            .insert((stored.sale_invoice_id, stored.line_no), stored.clone());

        debug!(invoice_id = stored.sale_invoice_id, line_no = stored.line_no, "Line stored");
        Ok(stored)
    }

    async fn remove_line(&self, invoice_id: i64, line_no: i64) -> StoreResult<bool> {
        self.check()?;
        let mut tables = self.tables.lock().await;

        tables.open_invoice(invoice_id)?;
        Ok(tables.lines.remove(&(invoice_id, line_no)).is_some())
    }

    async fn clear_lines(&self, invoice_id: i64) -> StoreResult<u64> {
        self.check()?;
        let mut tables = self.tables.lock().await;

        tables.open_invoice(invoice_id)?;
        let before = tables.lines.len();
        tables.lines.retain(|(id, _), _| *id != invoice_id);
        Ok((before - tables.lines.len()) as u64)
    }

    // =========================================================================
    // Payments
    // =========================================================================

    async fn append_payment(&self, payment: &Payment) -> StoreResult<Payment> {
        self.check()?;
        let mut tables = self.tables.lock().await;

        tables.insert_payment(payment)
    }

    async fn remove_payment(&self, invoice_id: i64, payment_no: i64) -> StoreResult<bool> {
        self.check()?;
        let mut tables = self.tables.lock().await;

        tables.open_invoice(invoice_id)?;
        Ok(tables.payments.remove(&(invoice_id, payment_no)).is_some())
    }

    async fn replace_payment(
        &self,
        invoice_id: i64,
        payment_no: i64,
        replacement: &Payment,
    ) -> StoreResult<Payment> {
        self.check()?;
        let mut tables = self.tables.lock().await;

        tables.open_invoice(invoice_id)?;
        let removed = tables
            .payments
            .remove(&(invoice_id, payment_no))
            .ok_or_else(|| StoreError::not_found("Payment", format!("{invoice_id}/{payment_no}")))?;

        match tables.insert_payment(replacement) {
            Ok(stored) => Ok(stored),
            Err(e) => {
                tables.payments.insert((invoice_id, payment_no), removed);
                Err(e)
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use vend_core::Money;

    use super::*;

    fn new_promotion(name: &str, now: DateTime<Utc>) -> NewPromotion {
        NewPromotion {
            name: name.to_string(),
            quantity: 1,
            promotion_price_cents: 500,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
            active: true,
        }
    }

    fn line(invoice_id: i64, line_no: i64, token: Option<&str>) -> ProductSale {
        ProductSale {
            sale_invoice_id: invoice_id,
            line_no,
            product_id: 42,
            quantity: 1,
            unit_price_cents: 1200,
            promotion_id: None,
            request_token: token.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    async fn store_with_product() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_product(Product::new(42, "Linen shirt", Money::from_cents(1200)))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_promotion_names_are_unique() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let first = store.insert_promotion(&new_promotion(" Summer ", now)).await.unwrap();
        assert_eq!(first.name, "Summer");

        let err = store.insert_promotion(&new_promotion("Summer", now)).await.unwrap_err();
        assert_eq!(err, StoreError::duplicate("name", "Summer"));

        let second = store.insert_promotion(&new_promotion("Winter", now)).await.unwrap();
        let renamed = Promotion {
            name: "Summer".to_string(),
            ..second
        };
        assert!(store.update_promotion(&renamed).await.is_err());
        assert!(store.get_promotion_by_name(" Winter").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_associations() {
        let store = store_with_product().await;
        let now = Utc::now();
        let promo = store.insert_promotion(&new_promotion("Summer", now)).await.unwrap();

        store.add_association(42, promo.id).await.unwrap();
        let err = store.add_association(42, promo.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
        let err = store.add_association(7, promo.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        assert_eq!(store.get_associations(promo.id).await.unwrap(), vec![42]);
        assert_eq!(store.get_promotions_for_product(42).await.unwrap().len(), 1);

        let index = store.build_index(now).await.unwrap();
        assert_eq!(index.promotions_for(42).len(), 1);

        assert!(store.remove_association(42, promo.id).await.unwrap());
        assert!(!store.remove_association(42, promo.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_promotion_deactivates_when_referenced() {
        let store = store_with_product().await;
        let now = Utc::now();
        let used = store.insert_promotion(&new_promotion("Used", now)).await.unwrap();
        let unused = store.insert_promotion(&new_promotion("Unused", now)).await.unwrap();
        store.add_association(42, used.id).await.unwrap();

        let invoice = store.create_invoice(now).await.unwrap();
        let sold = ProductSale {
            promotion_id: Some(used.id),
            ..line(invoice.id(), 1, None)
        };
        store.append_line(&sold).await.unwrap();

        assert_eq!(
            store.delete_promotion(used.id).await.unwrap(),
            PromotionRemoval::Deactivated
        );
        assert!(!store.get_promotion(used.id).await.unwrap().unwrap().active);
        assert!(store.get_associations(used.id).await.unwrap().is_empty());

        assert_eq!(
            store.delete_promotion(unused.id).await.unwrap(),
            PromotionRemoval::Deleted
        );
        assert!(store.get_promotion(unused.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_finalized_invoice_rejects_writes() {
        let store = store_with_product().await;
        let invoice = store.create_invoice(Utc::now()).await.unwrap();
        let id = invoice.id();
        store.append_line(&line(id, 1, None)).await.unwrap();
        store.finalize_invoice(id, Utc::now()).await.unwrap();

        let closed = StoreError::InvoiceFinalized { invoice_id: id };
        assert_eq!(store.append_line(&line(id, 2, None)).await.unwrap_err(), closed);
        assert_eq!(store.remove_line(id, 1).await.unwrap_err(), closed);
        assert_eq!(store.clear_lines(id).await.unwrap_err(), closed);
        assert_eq!(store.finalize_invoice(id, Utc::now()).await.unwrap_err(), closed);
        assert_eq!(store.delete_invoice(id).await.unwrap_err(), closed);

        let stored = store.load_invoice(id).await.unwrap().unwrap();
        assert!(stored.is_finalized());
        assert_eq!(stored.lines().len(), 1);
    }

    #[tokio::test]
    async fn test_token_replay() {
        let store = store_with_product().await;
        let id = store.create_invoice(Utc::now()).await.unwrap().id();
        let token = uuid::Uuid::new_v4().to_string();

        let first = store.append_line(&line(id, 1, Some(&token))).await.unwrap();
        let replay = store.append_line(&line(id, 2, Some(&token))).await.unwrap();
        assert_eq!(first, replay);
        assert_eq!(store.load_invoice(id).await.unwrap().unwrap().lines().len(), 1);

        let other = store.create_invoice(Utc::now()).await.unwrap().id();
        let err = store.append_line(&line(other, 1, Some(&token))).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_numbers_come_from_invoice_sequences() {
        let store = store_with_product().await;
        let id = store.create_invoice(Utc::now()).await.unwrap().id();

        let a = store.append_line(&line(id, 9, None)).await.unwrap();
        let b = store.append_line(&line(id, 9, None)).await.unwrap();
        assert_eq!((a.line_no, b.line_no), (1, 2));

        assert!(store.remove_line(id, 2).await.unwrap());
        assert_eq!(store.append_line(&line(id, 1, None)).await.unwrap().line_no, 3);

        let payment = Payment {
            sale_invoice_id: id,
            payment_no: 4,
            payment_method_id: 1,
            amount_cents: 100,
            created_at: Utc::now(),
        };
        let p = store.append_payment(&payment).await.unwrap();
        let q = store.replace_payment(id, p.payment_no, &payment).await.unwrap();
        assert_eq!((p.payment_no, q.payment_no), (1, 2));
        assert!(matches!(
            store.replace_payment(id, p.payment_no, &payment).await.unwrap_err(),
            StoreError::NotFound { .. }
        ));

        // A stale copy saved back never rewinds the sequences.
        let mut stale = store.load_invoice(id).await.unwrap().unwrap();
        store.append_line(&line(id, 1, None)).await.unwrap();
        stale.clear_lines().unwrap();
        store.save_invoice(&stale).await.unwrap();
        let header = store.load_invoice(id).await.unwrap().unwrap().header();
        assert_eq!((header.line_seq, header.payment_seq), (4, 2));
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = store_with_product().await;
        store.set_unavailable(true);
        assert!(matches!(
            store.get_product(42).await.unwrap_err(),
            StoreError::Unavailable(_)
        ));

        store.set_unavailable(false);
        assert!(store.get_product(42).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_latest_and_delete_invoice() {
        let store = store_with_product().await;
        let first = store.create_invoice(Utc::now()).await.unwrap().id();
        let second = store.create_invoice(Utc::now()).await.unwrap().id();
        store.append_line(&line(second, 1, None)).await.unwrap();

        assert_eq!(store.latest_invoice().await.unwrap().unwrap().id(), second);

        store.delete_invoice(second).await.unwrap();
        assert!(store.load_invoice(second).await.unwrap().is_none());
        assert_eq!(store.latest_invoice().await.unwrap().unwrap().id(), first);
        assert!(matches!(
            store.delete_invoice(second).await.unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }
}
