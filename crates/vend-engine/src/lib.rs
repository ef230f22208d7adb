//! # vend-engine: Sale Transaction & Promotion Engine
//!
//! The façade callers use to run sales and administer promotions.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            Engine                                       │
//! │                                                                         │
//! │  ┌──────────────────────────┐        ┌──────────────────────────┐      │
//! │  │ TransactionOrchestrator  │        │ PromotionService         │      │
//! │  │                          │        │                          │      │
//! │  │ open / sell / void / pay │        │ add / edit / delete      │      │
//! │  │ checkout / queries       │        │ associations, batches    │      │
//! │  └────────────┬─────────────┘        └────────────┬─────────────┘      │
//! │               │ snapshot_for(now)                 │ invalidate()        │
//! │               ▼                                   ▼                     │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │ PromotionIndexCache  (+ optional IndexRefresher task)           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │               │                                                         │
//! │               ▼                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │ Store trait:  MemoryStore │ SqliteStore (vend-db)               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Engine configuration (TOML + environment)
//! - [`error`] - Store and engine error types
//! - [`index`] - Promotion Index cache and background refresher
//! - [`locks`] - Per-invoice mutation locks
//! - [`memory`] - In-memory store
//! - [`orchestrator`] - Sale lifecycle
//! - [`promotions`] - Promotion administration
//! - [`sqlite`] - SQLite store
//! - [`store`] - The durable store contract
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vend_engine::{Engine, EngineConfig};
//! use vend_core::Money;
//!
//! vend_engine::init_tracing();
//! let config = EngineConfig::load_or_default(None);
//! let engine = Engine::open_sqlite(&config).await?;
//!
//! let invoice = engine.sales().open_invoice().await?;
//! engine.sales().sell(invoice.id(), 42, 3).await?;
//! engine.sales().pay(invoice.id(), 1, Money::from_cents(2700)).await?;
//! engine.sales().checkout(invoice.id()).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod index;
pub mod locks;
pub mod memory;
pub mod orchestrator;
pub mod promotions;
pub mod sqlite;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{DatabaseSettings, EngineConfig, PricingSettings};
pub use error::{EngineError, EngineResult, StoreError, StoreResult};
pub use index::{IndexRefresher, IndexRefresherHandle, PromotionIndexCache};
pub use locks::InvoiceLocks;
pub use memory::MemoryStore;
pub use orchestrator::TransactionOrchestrator;
pub use promotions::{BatchOutcome, PromotionService, SkipReason, SkippedProduct};
pub use sqlite::SqliteStore;
pub use store::Store;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

// =============================================================================
// Engine
// =============================================================================

/// Orchestrator and promotion service sharing one store and one index cache.
pub struct Engine<S: Store + ?Sized> {
    store: Arc<S>,
    index: Arc<PromotionIndexCache>,
    sales: TransactionOrchestrator<S>,
    promotions: PromotionService<S>,
    refresh_interval: Option<Duration>,
}

impl<S: Store + ?Sized> Engine<S> {
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        let index = Arc::new(PromotionIndexCache::new(config.index_max_staleness()));

        let sales = TransactionOrchestrator::new(store.clone(), index.clone())
            .with_max_item_quantity(config.pricing.max_item_quantity);
        let promotions = PromotionService::new(store.clone(), index.clone());

        Engine {
            store,
            index,
            sales,
            promotions,
            refresh_interval: config.index_refresh_interval(),
        }
    }

    pub fn sales(&self) -> &TransactionOrchestrator<S> {
        &self.sales
    }

    pub fn promotions(&self) -> &PromotionService<S> {
        &self.promotions
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn index(&self) -> &Arc<PromotionIndexCache> {
        &self.index
    }
}

impl<S: Store + ?Sized + 'static> Engine<S> {
    /// Spawns the background index refresher when an interval is configured.
    pub fn spawn_refresher(&self) -> Option<(JoinHandle<()>, IndexRefresherHandle)> {
        let interval = self.refresh_interval?;
        let (refresher, handle) = IndexRefresher::new(self.store.clone(), self.index.clone(), interval);
        Some((tokio::spawn(refresher.run()), handle))
    }
}

impl Engine<SqliteStore> {
    /// Opens the configured SQLite database and builds an engine over it.
    pub async fn open_sqlite(config: &EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let store = SqliteStore::connect(config.db_config()).await?;

        info!(path = %config.database.path.display(), "Engine opened");
        Ok(Engine::new(Arc::new(store), config))
    }
}

// =============================================================================
// Tracing
// =============================================================================

/// Installs a `tracing-subscriber` formatter filtered by `RUST_LOG`.
///
/// Default filter: `info,vend=debug,sqlx=warn`. Calling twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vend=debug,sqlx=warn"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// =============================================================================
// End-to-end Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::{Duration as ChronoDuration, Utc};
    use vend_core::{Money, NewPromotion, Product};

    use super::*;

    fn in_memory_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.database.path = PathBuf::from(":memory:");
        config
    }

    #[tokio::test]
    async fn test_sale_with_promotion_over_sqlite() {
        init_tracing();
        let engine = Engine::open_sqlite(&in_memory_config()).await.unwrap();
        engine
            .store()
            .database()
            .products()
            .insert(&Product::new(42, "Linen shirt", Money::from_cents(1200)))
            .await
            .unwrap();

        let now = Utc::now();
        let promo = engine
            .promotions()
            .add_promotion(&NewPromotion {
                name: "Three for nine".to_string(),
                quantity: 3,
                promotion_price_cents: 900,
                starts_at: now - ChronoDuration::days(1),
                ends_at: now + ChronoDuration::days(1),
                active: true,
            })
            .await
            .unwrap();
        engine.promotions().add_product(42, promo.id).await.unwrap();

        let invoice = engine.sales().open_invoice().await.unwrap();
        let line = engine.sales().sell(invoice.id(), 42, 3).await.unwrap();
        assert_eq!(line.unit_price_cents, 900);
        assert_eq!(line.promotion_id, Some(promo.id));

        engine
            .sales()
            .pay(invoice.id(), 1, Money::from_cents(2000))
            .await
            .unwrap();
        assert_eq!(
            engine.sales().total_due(invoice.id()).await.unwrap(),
            Money::from_cents(700)
        );

        engine.sales().checkout(invoice.id()).await.unwrap();
        assert!(matches!(
            engine.sales().sell(invoice.id(), 42, 1).await.unwrap_err(),
            EngineError::InvalidInvoiceState { .. }
        ));

        // Sale history keeps the promotion alive as inactive.
        assert_eq!(
            engine.promotions().delete_promotion(promo.id).await.unwrap(),
            vend_core::PromotionRemoval::Deactivated
        );
        assert!(!engine.promotions().get_promotion(promo.id).await.unwrap().active);
    }

    #[tokio::test]
    async fn test_engine_over_memory_store() {
        let mut config = EngineConfig::default();
        config.pricing.max_item_quantity = 5;
        let store = Arc::new(MemoryStore::new());
        store
            .insert_product(Product::new(7, "Socks", Money::from_cents(500)))
            .await
            .unwrap();

        let engine = Engine::new(store, &config);
        assert!(engine.spawn_refresher().is_none());

        let invoice = engine.sales().open_invoice().await.unwrap();
        assert!(matches!(
            engine.sales().sell(invoice.id(), 7, 6).await.unwrap_err(),
            EngineError::Validation(_)
        ));
        engine.sales().sell(invoice.id(), 7, 5).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_refresher() {
        let mut config = EngineConfig::default();
        config.pricing.index_refresh_interval_secs = 30;

        let engine = Engine::new(Arc::new(MemoryStore::new()), &config);
        let (task, handle) = engine.spawn_refresher().unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(engine.index().rebuilds() >= 2);

        assert!(handle.shutdown().await);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_open_sqlite_rejects_invalid_config() {
        let mut config = in_memory_config();
        config.database.max_connections = 0;
        assert!(matches!(
            Engine::open_sqlite(&config).await,
            Err(EngineError::InvalidConfig(_))
        ));
    }
}
