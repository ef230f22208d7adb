//! # Sale Repository
//!
//! Database operations for sale invoices, their line items and payments.
//!
//! ## Invoice Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Invoice Lifecycle                                 │
//! │                                                                         │
//! │  1. OPEN                                                               │
//! │     └── create_invoice() → InvoiceHeader { finalized: false }          │
//! │                                                                         │
//! │  2. MUTATE (each in its own transaction)                               │
//! │     └── append_line / remove_line / clear_lines                        │
//! │     └── append_payment / remove_payment / replace_payment              │
//! │                                                                         │
//! │  3. FINALIZE                                                           │
//! │     └── finalize() → finalized = 1 (terminal)                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Finalize Is a Barrier
//! Every child mutation starts its transaction with a conditional write on
//! the invoice row:
//!
//! ```sql
//! UPDATE sale_invoices SET ... WHERE id = ? AND finalized = 0
//! ```
//!
//! This both re-checks the flag and takes SQLite's write lock, so a finalize
//! that commits first makes the mutation fail with `InvoiceFinalized`, and a
//! mutation that gets the lock first commits before the finalize can.

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use vend_core::{InvoiceHeader, Payment, ProductSale, SaleInvoice};

const HEADER_COLUMNS: &str = "id, created_at, finalized, finalized_at, line_seq, payment_seq";
const LINE_COLUMNS: &str = "sale_invoice_id, line_no, product_id, quantity, unit_price_cents, promotion_id, request_token, created_at";
const PAYMENT_COLUMNS: &str = "sale_invoice_id, payment_no, payment_method_id, amount_cents, created_at";

/// Repository for sale invoice database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    /// Creates and persists a new open invoice.
    pub async fn create_invoice(&self, created_at: DateTime<Utc>) -> DbResult<InvoiceHeader> {
        let result = sqlx::query("INSERT INTO sale_invoices (created_at) VALUES (?1)")
            .bind(created_at)
            .execute(&self.pool)
            .await?;

        let header = SaleInvoice::open(result.last_insert_rowid(), created_at).header();

        info!(invoice_id = header.id, "Invoice opened");
        Ok(header)
    }

    /// Gets the invoice row without children.
    pub async fn get_header(&self, id: i64) -> DbResult<Option<InvoiceHeader>> {
        let sql = format!("SELECT {HEADER_COLUMNS} FROM sale_invoices WHERE id = ?1");
        let header = sqlx::query_as::<_, InvoiceHeader>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(header)
    }

    /// Loads an invoice with its lines and payments.
    pub async fn get_invoice(&self, id: i64) -> DbResult<Option<SaleInvoice>> {
        debug!(invoice_id = id, "Loading invoice");

        let Some(header) = self.get_header(id).await? else {
            return Ok(None);
        };

        let lines = self.get_lines(id).await?;
        let payments = self.get_payments(id).await?;

        Ok(Some(SaleInvoice::restore(header, lines, payments)))
    }

    /// Loads the most recently opened invoice, if any.
    pub async fn latest_invoice(&self) -> DbResult<Option<SaleInvoice>> {
        let latest: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM sale_invoices")
            .fetch_one(&self.pool)
            .await?;

        match latest {
            Some(id) => self.get_invoice(id).await,
            None => Ok(None),
        }
    }

    /// Deletes an open invoice; lines and payments go with it (cascade).
    pub async fn delete_invoice(&self, id: i64) -> DbResult<()> {
        let mut tx = begin(&self.pool).await?;

        let result = sqlx::query("DELETE FROM sale_invoices WHERE id = ?1 AND finalized = 0")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(closed_reason(&mut tx, id).await);
        }

        commit(tx).await?;
        info!(invoice_id = id, "Invoice deleted");
        Ok(())
    }

    /// Writes a whole invoice (row, lines and payments), replacing whatever is
    /// stored under its id. A stored invoice that is already finalized is
    /// never overwritten.
    pub async fn save_invoice(&self, invoice: &SaleInvoice) -> DbResult<()> {
        let header = invoice.header();
        debug!(invoice_id = header.id, "Saving invoice");

        let mut tx = begin(&self.pool).await?;

        let result = sqlx::query(
            r#"
            INSERT INTO sale_invoices (
                id, created_at, finalized, finalized_at, line_seq, payment_seq
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                finalized = excluded.finalized,
                finalized_at = excluded.finalized_at,
                line_seq = MAX(sale_invoices.line_seq, excluded.line_seq),
                payment_seq = MAX(sale_invoices.payment_seq, excluded.payment_seq)
            WHERE sale_invoices.finalized = 0
            "#,
        )
        .bind(header.id)
        .bind(header.created_at)
        .bind(header.finalized)
        .bind(header.finalized_at)
        .bind(header.line_seq)
        .bind(header.payment_seq)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::InvoiceFinalized {
                invoice_id: header.id,
            });
        }

        sqlx::query("DELETE FROM product_sales WHERE sale_invoice_id = ?1")
            .bind(header.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM payments WHERE sale_invoice_id = ?1")
            .bind(header.id)
            .execute(&mut *tx)
            .await?;

        for line in invoice.lines() {
            sqlx::query(
                r#"
                INSERT INTO product_sales (
                    sale_invoice_id, line_no, product_id, quantity,
                    unit_price_cents, promotion_id, request_token, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(header.id)
            .bind(line.line_no)
            .bind(line.product_id)
            .bind(line.quantity)
            .bind(line.unit_price_cents)
            .bind(line.promotion_id)
            .bind(&line.request_token)
            .bind(line.created_at)
            .execute(&mut *tx)
            .await?;
        }

        for payment in invoice.payments() {
            sqlx::query(
                r#"
                INSERT INTO payments (
                    sale_invoice_id, payment_no, payment_method_id, amount_cents, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(header.id)
            .bind(payment.payment_no)
            .bind(payment.payment_method_id)
            .bind(payment.amount_cents)
            .bind(payment.created_at)
            .execute(&mut *tx)
            .await?;
        }

        commit(tx).await
    }

    /// Open → finalized. Fails with `InvoiceFinalized` when already finalized.
    pub async fn finalize(&self, id: i64, at: DateTime<Utc>) -> DbResult<()> {
        let mut tx = begin(&self.pool).await?;

        let result = sqlx::query(
            "UPDATE sale_invoices SET finalized = 1, finalized_at = ?2 WHERE id = ?1 AND finalized = 0",
        )
        .bind(id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(closed_reason(&mut tx, id).await);
        }

        commit(tx).await?;
        info!(invoice_id = id, "Invoice finalized");
        Ok(())
    }

    // =========================================================================
    // Line Items
    // =========================================================================

    /// Lines of an invoice in line order.
    pub async fn get_lines(&self, invoice_id: i64) -> DbResult<Vec<ProductSale>> {
        let sql = format!(
            "SELECT {LINE_COLUMNS} FROM product_sales WHERE sale_invoice_id = ?1 ORDER BY line_no"
        );
        let lines = sqlx::query_as::<_, ProductSale>(&sql)
            .bind(invoice_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(lines)
    }

    /// Finds the line created with a deduplication token.
    pub async fn find_line_by_token(&self, token: &str) -> DbResult<Option<ProductSale>> {
        let sql = format!("SELECT {LINE_COLUMNS} FROM product_sales WHERE request_token = ?1");
        let line = sqlx::query_as::<_, ProductSale>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        Ok(line)
    }

    /// Persists a line item under the invoice's next line number.
    ///
    /// The number is taken from `sale_invoices.line_seq` by the same
    /// statement that checks the invoice is open, so concurrent writers
    /// never pick the same one. `line.line_no` is ignored.
    ///
    /// When the line carries a request token that was already used on this
    /// invoice, the earlier line is returned and nothing is written. A token
    /// used on another invoice is a `UniqueViolation`.
    pub async fn append_line(&self, line: &ProductSale) -> DbResult<ProductSale> {
        debug!(
            invoice_id = line.sale_invoice_id,
            product_id = line.product_id,
            "Appending line"
        );

        let mut tx = begin(&self.pool).await?;

        let line_no: Option<i64> = sqlx::query_scalar(
            "UPDATE sale_invoices SET line_seq = line_seq + 1 WHERE id = ?1 AND finalized = 0 RETURNING line_seq",
        )
        .bind(line.sale_invoice_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(token) = &line.request_token {
            let sql = format!("SELECT {LINE_COLUMNS} FROM product_sales WHERE request_token = ?1");
            let existing = sqlx::query_as::<_, ProductSale>(&sql)
                .bind(token)
                .fetch_optional(&mut *tx)
                .await?;

            // Dropping the transaction rolls the sequence bump back.
            if let Some(existing) = existing {
                if existing.sale_invoice_id != line.sale_invoice_id {
                    return Err(DbError::duplicate("request_token", token.as_str()));
                }
                debug!(invoice_id = line.sale_invoice_id, token = %token, "Replayed token");
                return Ok(existing);
            }
        }

        let Some(line_no) = line_no else {
            return Err(closed_reason(&mut tx, line.sale_invoice_id).await);
        };

        let stored = ProductSale {
            line_no,
            ..line.clone()
        };

        sqlx::query(
            r#"
            INSERT INTO product_sales (
                sale_invoice_id, line_no, product_id, quantity,
                unit_price_cents, promotion_id, request_token, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(stored.sale_invoice_id)
        .bind(stored.line_no)
        .bind(stored.product_id)
        .bind(stored.quantity)
        .bind(stored.unit_price_cents)
        .bind(stored.promotion_id)
        .bind(&stored.request_token)
        .bind(stored.created_at)
        .execute(&mut *tx)
        .await?;

        commit(tx).await?;
        debug!(invoice_id = stored.sale_invoice_id, line_no, "Line stored");
        Ok(stored)
    }

    /// Removes one line. Returns whether it existed.
    pub async fn remove_line(&self, invoice_id: i64, line_no: i64) -> DbResult<bool> {
        debug!(invoice_id, line_no, "Removing line");

        let mut tx = begin(&self.pool).await?;
        guard_open(&mut tx, invoice_id).await?;

        let result =
            sqlx::query("DELETE FROM product_sales WHERE sale_invoice_id = ?1 AND line_no = ?2")
                .bind(invoice_id)
                .bind(line_no)
                .execute(&mut *tx)
                .await?;

        commit(tx).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Removes every line of an invoice. Returns how many were removed.
    pub async fn clear_lines(&self, invoice_id: i64) -> DbResult<u64> {
        let mut tx = begin(&self.pool).await?;
        guard_open(&mut tx, invoice_id).await?;

        let result = sqlx::query("DELETE FROM product_sales WHERE sale_invoice_id = ?1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await?;

        commit(tx).await?;
        debug!(invoice_id, removed = result.rows_affected(), "Cleared lines");
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Payments
    // =========================================================================

    /// Payments of an invoice in payment order.
    pub async fn get_payments(&self, invoice_id: i64) -> DbResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE sale_invoice_id = ?1 ORDER BY payment_no"
        );
        let payments = sqlx::query_as::<_, Payment>(&sql)
            .bind(invoice_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(payments)
    }

    /// Persists a payment under the invoice's next payment number.
    /// `payment.payment_no` is ignored.
    pub async fn append_payment(&self, payment: &Payment) -> DbResult<Payment> {
        debug!(
            invoice_id = payment.sale_invoice_id,
            amount_cents = payment.amount_cents,
            "Recording payment"
        );

        let mut tx = begin(&self.pool).await?;
        let stored = insert_payment(&mut tx, payment).await?;
        commit(tx).await?;

        Ok(stored)
    }

    /// Removes one payment. Returns whether it existed.
    pub async fn remove_payment(&self, invoice_id: i64, payment_no: i64) -> DbResult<bool> {
        debug!(invoice_id, payment_no, "Removing payment");

        let mut tx = begin(&self.pool).await?;
        guard_open(&mut tx, invoice_id).await?;

        let result =
            sqlx::query("DELETE FROM payments WHERE sale_invoice_id = ?1 AND payment_no = ?2")
                .bind(invoice_id)
                .bind(payment_no)
                .execute(&mut *tx)
                .await?;

        commit(tx).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Removes payment `payment_no` and records `replacement` under a fresh
    /// number, atomically.
    pub async fn replace_payment(
        &self,
        invoice_id: i64,
        payment_no: i64,
        replacement: &Payment,
    ) -> DbResult<Payment> {
        debug!(invoice_id, payment_no, "Replacing payment");

        let mut tx = begin(&self.pool).await?;
        guard_open(&mut tx, invoice_id).await?;

        let removed =
            sqlx::query("DELETE FROM payments WHERE sale_invoice_id = ?1 AND payment_no = ?2")
                .bind(invoice_id)
                .bind(payment_no)
                .execute(&mut *tx)
                .await?;

        if removed.rows_affected() == 0 {
            return Err(DbError::not_found(
                "Payment",
                format!("{invoice_id}/{payment_no}"),
            ));
        }

        let stored = insert_payment(&mut tx, replacement).await?;
        commit(tx).await?;
        Ok(stored)
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

async fn begin(pool: &SqlitePool) -> DbResult<Transaction<'static, Sqlite>> {
    pool.begin()
        .await
        .map_err(|e| DbError::TransactionFailed(e.to_string()))
}

async fn commit(tx: Transaction<'static, Sqlite>) -> DbResult<()> {
    tx.commit()
        .await
        .map_err(|e| DbError::TransactionFailed(e.to_string()))
}

/// Re-checks `finalized` and takes the write lock in one statement.
async fn guard_open(tx: &mut Transaction<'static, Sqlite>, invoice_id: i64) -> DbResult<()> {
    let result = sqlx::query("UPDATE sale_invoices SET line_seq = line_seq WHERE id = ?1 AND finalized = 0")
        .bind(invoice_id)
        .execute(&mut **tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(closed_reason(tx, invoice_id).await);
    }

    Ok(())
}

/// Allocates the next payment number on an open invoice and inserts under it.
async fn insert_payment(tx: &mut Transaction<'static, Sqlite>, payment: &Payment) -> DbResult<Payment> {
    let payment_no: Option<i64> = sqlx::query_scalar(
        "UPDATE sale_invoices SET payment_seq = payment_seq + 1 WHERE id = ?1 AND finalized = 0 RETURNING payment_seq",
    )
    .bind(payment.sale_invoice_id)
    .fetch_optional(&mut **tx)
    .await?;

    let Some(payment_no) = payment_no else {
        return Err(closed_reason(tx, payment.sale_invoice_id).await);
    };

    let stored = Payment {
        payment_no,
        ..payment.clone()
    };

    sqlx::query(
        r#"
        INSERT INTO payments (
            sale_invoice_id, payment_no, payment_method_id, amount_cents, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(stored.sale_invoice_id)
    .bind(stored.payment_no)
    .bind(stored.payment_method_id)
    .bind(stored.amount_cents)
    .bind(stored.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(stored)
}

/// Explains why a conditional write on an invoice matched no row.
async fn closed_reason(tx: &mut Transaction<'static, Sqlite>, invoice_id: i64) -> DbError {
    let exists: Result<Option<i64>, sqlx::Error> =
        sqlx::query_scalar("SELECT id FROM sale_invoices WHERE id = ?1")
            .bind(invoice_id)
            .fetch_optional(&mut **tx)
            .await;

    match exists {
        Ok(Some(_)) => DbError::InvoiceFinalized { invoice_id },
        Ok(None) => DbError::not_found("Invoice", invoice_id),
        Err(e) => e.into(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use vend_core::{Money, Product};

    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn setup() -> (Database, InvoiceHeader) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.products()
            .insert(&Product::new(42, "Linen shirt", Money::from_cents(1200)))
            .await
            .unwrap();
        let header = db.sales().create_invoice(Utc::now()).await.unwrap();
        (db, header)
    }

    fn line(invoice_id: i64, line_no: i64, token: Option<&str>) -> ProductSale {
        ProductSale {
            sale_invoice_id: invoice_id,
            line_no,
            product_id: 42,
            quantity: 5,
            unit_price_cents: 900,
            promotion_id: None,
            request_token: token.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    fn payment(invoice_id: i64, payment_no: i64, amount_cents: i64) -> Payment {
        Payment {
            sale_invoice_id: invoice_id,
            payment_no,
            payment_method_id: 1,
            amount_cents,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_load_invoice() {
        let (db, header) = setup().await;
        assert!(!header.finalized);

        let invoice = db.sales().get_invoice(header.id).await.unwrap().unwrap();
        assert_eq!(invoice.id(), header.id);
        assert!(invoice.lines().is_empty());
        assert!(db.sales().get_invoice(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lines_and_sequences() {
        let (db, header) = setup().await;
        let sales = db.sales();

        sales.append_line(&line(header.id, 1, None)).await.unwrap();
        sales.append_line(&line(header.id, 2, None)).await.unwrap();
        assert!(sales.remove_line(header.id, 2).await.unwrap());
        assert!(!sales.remove_line(header.id, 2).await.unwrap());

        let invoice = sales.get_invoice(header.id).await.unwrap().unwrap();
        assert_eq!(invoice.lines().len(), 1);
        assert_eq!(invoice.header().line_seq, 2);
        assert_eq!(invoice.total_due().cents(), 4500);

        assert_eq!(sales.clear_lines(header.id).await.unwrap(), 1);
        assert!(sales.get_lines(header.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_token_replay() {
        let (db, header) = setup().await;
        let sales = db.sales();
        let token = uuid::Uuid::new_v4().to_string();

        let first = sales.append_line(&line(header.id, 1, Some(&token))).await.unwrap();
        let replay = sales.append_line(&line(header.id, 2, Some(&token))).await.unwrap();
        assert_eq!(replay.line_no, first.line_no);
        assert_eq!(sales.get_lines(header.id).await.unwrap().len(), 1);
        assert!(sales.find_line_by_token(&token).await.unwrap().is_some());

        let other = sales.create_invoice(Utc::now()).await.unwrap();
        let err = sales.append_line(&line(other.id, 1, Some(&token))).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_payments() {
        let (db, header) = setup().await;
        let sales = db.sales();

        sales.append_payment(&payment(header.id, 1, 2000)).await.unwrap();
        sales.append_payment(&payment(header.id, 2, 1000)).await.unwrap();
        assert!(sales.remove_payment(header.id, 1).await.unwrap());

        sales
            .replace_payment(header.id, 2, &payment(header.id, 3, 1500))
            .await
            .unwrap();
        let payments = sales.get_payments(header.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].payment_no, 3);
        assert_eq!(payments[0].amount_cents, 1500);

        let err = sales
            .replace_payment(header.id, 9, &payment(header.id, 4, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
        assert_eq!(sales.get_payments(header.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_numbers_come_from_invoice_sequences() {
        let (db, header) = setup().await;
        let sales = db.sales();

        // Caller-supplied numbers are ignored.
        let a = sales.append_line(&line(header.id, 7, None)).await.unwrap();
        let b = sales.append_line(&line(header.id, 7, None)).await.unwrap();
        assert_eq!((a.line_no, b.line_no), (1, 2));

        let p = sales.append_payment(&payment(header.id, 5, 100)).await.unwrap();
        let q = sales
            .replace_payment(header.id, p.payment_no, &payment(header.id, 5, 200))
            .await
            .unwrap();
        assert_eq!((p.payment_no, q.payment_no), (1, 2));

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let sales = db.sales();
            let id = header.id;
            tasks.push(tokio::spawn(async move {
                sales.append_line(&line(id, 1, None)).await.unwrap().line_no
            }));
        }
        let mut numbers = Vec::new();
        for task in tasks {
            numbers.push(task.await.unwrap());
        }
        numbers.sort_unstable();
        assert_eq!(numbers, (3..=12).collect::<Vec<i64>>());

        let invoice = sales.get_invoice(header.id).await.unwrap().unwrap();
        assert_eq!(invoice.header().line_seq, 12);
        assert_eq!(invoice.lines().len(), 12);
    }

    #[tokio::test]
    async fn test_finalized_invoice_rejects_writes() {
        let (db, header) = setup().await;
        let sales = db.sales();
        sales.append_line(&line(header.id, 1, None)).await.unwrap();
        sales.finalize(header.id, Utc::now()).await.unwrap();

        let finalized = |e: DbError| matches!(e, DbError::InvoiceFinalized { invoice_id } if invoice_id == header.id);

        assert!(finalized(sales.append_line(&line(header.id, 2, None)).await.unwrap_err()));
        assert!(finalized(sales.remove_line(header.id, 1).await.unwrap_err()));
        assert!(finalized(sales.clear_lines(header.id).await.unwrap_err()));
        assert!(finalized(sales.append_payment(&payment(header.id, 1, 100)).await.unwrap_err()));
        assert!(finalized(sales.remove_payment(header.id, 1).await.unwrap_err()));
        assert!(finalized(sales.finalize(header.id, Utc::now()).await.unwrap_err()));
        assert!(finalized(sales.delete_invoice(header.id).await.unwrap_err()));

        let invoice = sales.get_invoice(header.id).await.unwrap().unwrap();
        assert!(invoice.is_finalized());
        assert_eq!(invoice.lines().len(), 1);
        assert_eq!(invoice.lines()[0].unit_price_cents, 900);
    }

    #[tokio::test]
    async fn test_missing_invoice() {
        let (db, _) = setup().await;
        let err = db.sales().append_line(&line(999, 1, None)).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));

        let err = db.sales().finalize(999, Utc::now()).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (db, header) = setup().await;
        let sales = db.sales();
        sales.append_line(&line(header.id, 1, None)).await.unwrap();
        sales.append_payment(&payment(header.id, 1, 100)).await.unwrap();

        sales.delete_invoice(header.id).await.unwrap();
        assert!(sales.get_invoice(header.id).await.unwrap().is_none());
        assert!(sales.get_lines(header.id).await.unwrap().is_empty());
        assert!(sales.get_payments(header.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_invoice() {
        let (db, header) = setup().await;
        let sales = db.sales();
        let now = Utc::now();

        let mut invoice = sales.get_invoice(header.id).await.unwrap().unwrap();
        let product = Product::new(42, "Linen shirt", Money::from_cents(1200));
        invoice
            .add_line(&product, 2, &vend_core::PromotionIndex::empty(now), now)
            .unwrap();
        invoice
            .add_payment(vend_core::PaymentDetails::new(1, Money::from_cents(2400)), now)
            .unwrap();
        invoice.finalize(now).unwrap();
        sales.save_invoice(&invoice).await.unwrap();

        let stored = sales.get_invoice(header.id).await.unwrap().unwrap();
        assert!(stored.is_finalized());
        assert_eq!(stored.lines().len(), 1);
        assert!(stored.total_due().is_zero());

        // A finalized invoice is never overwritten.
        let err = sales.save_invoice(&invoice).await.unwrap_err();
        assert!(matches!(err, DbError::InvoiceFinalized { .. }));
    }

    #[tokio::test]
    async fn test_latest_invoice() {
        let (db, first) = setup().await;
        let sales = db.sales();
        let second = sales.create_invoice(Utc::now()).await.unwrap();

        let latest = sales.latest_invoice().await.unwrap().unwrap();
        assert_eq!(latest.id(), second.id);
        assert_ne!(latest.id(), first.id);
    }
}
