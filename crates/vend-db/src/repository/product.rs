//! # Product Repository
//!
//! Catalog reads for the engine. Products are owned by the catalog; the
//! engine only looks them up by id. `insert` exists for seeding and tests.

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use vend_core::Product;

const PRODUCT_COLUMNS: &str = "id, sku, name, price_cents, brand_id, category_id, size_id, colour_id, is_active";

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.products();
/// let product = repo.get_by_id(42).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Gets a product by ID.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Product>> {
        debug!(product_id = id, "Fetching product");

        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(product)
    }

    /// Gets every product whose id is in `ids`, ordered by id.
    /// Missing ids are simply absent from the result.
    pub async fn get_many(&self, ids: &[i64]) -> DbResult<Vec<Product>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id IN ("));
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY id");

        let products = builder
            .build_query_as::<Product>()
            .fetch_all(&self.pool)
            .await?;

        Ok(products)
    }

    /// Lists active products ordered by id.
    pub async fn list_active(&self) -> DbResult<Vec<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE is_active = 1 ORDER BY id");
        let products = sqlx::query_as::<_, Product>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(products)
    }

    /// Inserts a product.
    ///
    /// A positive `product.id` is kept; otherwise SQLite assigns one.
    /// Returns the stored product.
    pub async fn insert(&self, product: &Product) -> DbResult<Product> {
        let now = Utc::now();
        let requested_id = (product.id > 0).then_some(product.id);

        debug!(product_id = ?requested_id, name = %product.name, "Inserting product");

        let result = sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, price_cents,
                brand_id, category_id, size_id, colour_id,
                is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            "#,
        )
        .bind(requested_id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.price_cents)
        .bind(product.brand_id)
        .bind(product.category_id)
        .bind(product.size_id)
        .bind(product.colour_id)
        .bind(product.is_active)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
                field,
                value: product.sku.clone().unwrap_or_else(|| product.id.to_string()),
            },
            other => other,
        })?;

        Ok(Product {
            id: result.last_insert_rowid(),
            ..product.clone()
        })
    }

    /// Returns the total number of products.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::pool::{Database, DbConfig};
    use vend_core::Money;

    use super::*;

    async fn repo() -> ProductRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().products()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let repo = repo().await;

        let stored = repo
            .insert(&Product::new(42, "Linen shirt", Money::from_cents(1200)))
            .await
            .unwrap();
        assert_eq!(stored.id, 42);

        let fetched = repo.get_by_id(42).await.unwrap().unwrap();
        assert_eq!(fetched, stored);
        assert!(repo.get_by_id(43).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_assigns_id() {
        let repo = repo().await;

        let stored = repo
            .insert(&Product::new(0, "Socks", Money::from_cents(300)))
            .await
            .unwrap();
        assert!(stored.id > 0);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_sku() {
        let repo = repo().await;
        let product = Product {
            sku: Some("SHIRT-L".to_string()),
            ..Product::new(1, "Shirt L", Money::from_cents(1000))
        };
        repo.insert(&product).await.unwrap();

        let clash = Product {
            id: 2,
            ..product.clone()
        };
        let err = repo.insert(&clash).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { ref value, .. } if value == "SHIRT-L"));
    }

    #[tokio::test]
    async fn test_get_many_and_list_active() {
        let repo = repo().await;
        for (id, active) in [(3, true), (1, true), (2, false)] {
            let product = Product {
                is_active: active,
                ..Product::new(id, format!("P{id}"), Money::from_cents(100))
            };
            repo.insert(&product).await.unwrap();
        }

        let many = repo.get_many(&[3, 1, 99]).await.unwrap();
        let ids: Vec<i64> = many.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 3]);

        assert!(repo.get_many(&[]).await.unwrap().is_empty());

        let active: Vec<i64> = repo.list_active().await.unwrap().iter().map(|p| p.id).collect();
        assert_eq!(active, vec![1, 3]);
    }
}
