//! # SQLite Store
//!
//! [`Store`] over the `vend-db` repositories. Each write is one SQLite
//! transaction whose first statement is conditional on the invoice being
//! open; see `vend_db::repository::sale`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use vend_core::{
    NewPromotion, Payment, Product, ProductPromotion, ProductSale, Promotion, PromotionRemoval,
    SaleInvoice,
};
use vend_db::{Database, DbConfig, DbError};

use crate::error::{StoreError, StoreResult};
use crate::store::Store;

/// [`Store`] backed by a SQLite [`Database`].
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        SqliteStore { db }
    }

    /// Opens (and migrates) the database described by `config`.
    pub async fn connect(config: DbConfig) -> StoreResult<Self> {
        let db = Database::new(config).await?;
        info!("SQLite store ready");
        Ok(SqliteStore { db })
    }

    /// The underlying database handle (catalog seeding, health checks).
    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_product(&self, id: i64) -> StoreResult<Option<Product>> {
        Ok(self.db.products().get_by_id(id).await?)
    }

    // =========================================================================
    // Promotions
    // =========================================================================

    async fn get_promotions(&self, active_only: bool, at: DateTime<Utc>) -> StoreResult<Vec<Promotion>> {
        let mut promotions = self.db.promotions().list().await?;

        // Window bounds are compared as instants, not as stored text.
        if active_only {
            promotions.retain(|p| p.is_active_at(at));
        }

        Ok(promotions)
    }

    async fn get_promotion(&self, id: i64) -> StoreResult<Option<Promotion>> {
        Ok(self.db.promotions().get_by_id(id).await?)
    }

    async fn get_promotion_by_name(&self, name: &str) -> StoreResult<Option<Promotion>> {
        Ok(self.db.promotions().get_by_name(name).await?)
    }

    async fn insert_promotion(&self, promotion: &NewPromotion) -> StoreResult<Promotion> {
        Ok(self.db.promotions().insert(promotion).await?)
    }

    async fn update_promotion(&self, promotion: &Promotion) -> StoreResult<()> {
        Ok(self.db.promotions().update(promotion).await?)
    }

    async fn delete_promotion(&self, id: i64) -> StoreResult<PromotionRemoval> {
        Ok(self.db.promotions().delete(id).await?)
    }

    // =========================================================================
    // Associations
    // =========================================================================

    async fn get_associations(&self, promotion_id: i64) -> StoreResult<Vec<i64>> {
        Ok(self.db.promotions().associations_for(promotion_id).await?)
    }

    async fn get_all_associations(&self) -> StoreResult<Vec<ProductPromotion>> {
        Ok(self.db.promotions().associations().await?)
    }

    async fn get_promotions_for_product(&self, product_id: i64) -> StoreResult<Vec<Promotion>> {
        Ok(self.db.promotions().promotions_for_product(product_id).await?)
    }

    async fn add_association(&self, product_id: i64, promotion_id: i64) -> StoreResult<()> {
        self.db
            .promotions()
            .insert_association(product_id, promotion_id)
            .await
            .map_err(|e| match e {
                // The foreign key message does not say which side is missing.
                DbError::ForeignKeyViolation { .. } => {
                    StoreError::not_found("Product or Promotion", format!("{product_id}/{promotion_id}"))
                }
                other => other.into(),
            })
    }

    async fn remove_association(&self, product_id: i64, promotion_id: i64) -> StoreResult<bool> {
        Ok(self.db.promotions().delete_association(product_id, promotion_id).await?)
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    async fn create_invoice(&self, at: DateTime<Utc>) -> StoreResult<SaleInvoice> {
        let header = self.db.sales().create_invoice(at).await?;
        Ok(SaleInvoice::restore(header, Vec::new(), Vec::new()))
    }

    async fn load_invoice(&self, id: i64) -> StoreResult<Option<SaleInvoice>> {
        Ok(self.db.sales().get_invoice(id).await?)
    }

    async fn save_invoice(&self, invoice: &SaleInvoice) -> StoreResult<()> {
        Ok(self.db.sales().save_invoice(invoice).await?)
    }

    async fn latest_invoice(&self) -> StoreResult<Option<SaleInvoice>> {
        Ok(self.db.sales().latest_invoice().await?)
    }

    async fn delete_invoice(&self, id: i64) -> StoreResult<()> {
        Ok(self.db.sales().delete_invoice(id).await?)
    }

    async fn finalize_invoice(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        Ok(self.db.sales().finalize(id, at).await?)
    }

    // =========================================================================
    // Line Items
    // =========================================================================

    async fn find_line_by_token(&self, token: &str) -> StoreResult<Option<ProductSale>> {
        Ok(self.db.sales().find_line_by_token(token).await?)
    }

    async fn append_line(&self, line: &ProductSale) -> StoreResult<ProductSale> {
        Ok(self.db.sales().append_line(line).await?)
    }

    async fn remove_line(&self, invoice_id: i64, line_no: i64) -> StoreResult<bool> {
        Ok(self.db.sales().remove_line(invoice_id, line_no).await?)
    }

    async fn clear_lines(&self, invoice_id: i64) -> StoreResult<u64> {
        Ok(self.db.sales().clear_lines(invoice_id).await?)
    }

    // =========================================================================
    // Payments
    // =========================================================================

    async fn append_payment(&self, payment: &Payment) -> StoreResult<Payment> {
        Ok(self.db.sales().append_payment(payment).await?)
    }

    async fn remove_payment(&self, invoice_id: i64, payment_no: i64) -> StoreResult<bool> {
        Ok(self.db.sales().remove_payment(invoice_id, payment_no).await?)
    }

    async fn replace_payment(
        &self,
        invoice_id: i64,
        payment_no: i64,
        replacement: &Payment,
    ) -> StoreResult<Payment> {
        Ok(self
            .db
            .sales()
            .replace_payment(invoice_id, payment_no, replacement)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use vend_core::Money;

    use super::*;

    async fn store() -> SqliteStore {
        let store = SqliteStore::connect(DbConfig::in_memory()).await.unwrap();
        store
            .database()
            .products()
            .insert(&Product::new(42, "Linen shirt", Money::from_cents(1200)))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_active_filter_and_index() {
        let store = store().await;
        let now = Utc::now();

        let live = store
            .insert_promotion(&NewPromotion {
                name: "Live".to_string(),
                quantity: 3,
                promotion_price_cents: 900,
                starts_at: now - Duration::days(1),
                ends_at: now + Duration::days(1),
                active: true,
            })
            .await
            .unwrap();
        let expired = store
            .insert_promotion(&NewPromotion {
                name: "Expired".to_string(),
                quantity: 1,
                promotion_price_cents: 500,
                starts_at: now - Duration::days(10),
                ends_at: now - Duration::days(5),
                active: true,
            })
            .await
            .unwrap();
        store.add_association(42, live.id).await.unwrap();
        store.add_association(42, expired.id).await.unwrap();

        assert_eq!(store.get_promotions(false, now).await.unwrap().len(), 2);
        let active = store.get_promotions(true, now).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, live.id);

        let index = store.build_index(now).await.unwrap();
        let ids: Vec<i64> = index.promotions_for(42).iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![live.id]);
    }

    #[tokio::test]
    async fn test_association_errors() {
        let store = store().await;
        let now = Utc::now();
        let promo = store
            .insert_promotion(&NewPromotion {
                name: "Live".to_string(),
                quantity: 1,
                promotion_price_cents: 900,
                starts_at: now - Duration::days(1),
                ends_at: now + Duration::days(1),
                active: true,
            })
            .await
            .unwrap();

        store.add_association(42, promo.id).await.unwrap();
        assert!(matches!(
            store.add_association(42, promo.id).await.unwrap_err(),
            StoreError::Duplicate { .. }
        ));
        assert!(matches!(
            store.add_association(7, promo.id).await.unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_closed_database_is_unavailable() {
        let store = store().await;
        store.database().close().await;

        let err = store.get_product(42).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
