//! # Promotion Index Cache
//!
//! Holds the current [`PromotionIndex`] snapshot and decides when to build a
//! new one.
//!
//! ## Copy-on-build
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   reader A ──► Arc<PromotionIndex> (gen 3) ◄── reader B                 │
//! │                                                                         │
//! │   refresh(now):                                                         │
//! │     1. build a new index from the store      (no lock held)             │
//! │     2. take the write lock, swap the Arc     (pointer swap only)        │
//! │                                                                         │
//! │   reader A ──► Arc<PromotionIndex> (gen 3)   still valid, dropped when  │
//! │                                              A is done                  │
//! │   reader C ──► Arc<PromotionIndex> (gen 4)                              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Freshness
//! [`PromotionIndexCache::snapshot_for`] rebuilds when
//! - the cache was invalidated (a promotion or association changed),
//! - `max_staleness` is zero (rebuild before every pricing decision), or
//! - the snapshot was built more than `max_staleness` before `now`.
//!
//! [`IndexRefresher`] optionally rebuilds on a fixed interval in the
//! background.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use vend_core::PromotionIndex;

use crate::error::StoreResult;
use crate::store::Store;

// =============================================================================
// Cache
// =============================================================================

#[derive(Debug)]
struct Snapshot {
    index: Arc<PromotionIndex>,
    generation: u64,
}

/// Shared, rebuildable Promotion Index.
#[derive(Debug)]
pub struct PromotionIndexCache {
    snapshot: RwLock<Snapshot>,

    /// Bumped on every invalidation. A snapshot built under an older
    /// generation is never served.
    generation: AtomicU64,

    max_staleness: Duration,

    rebuilds: AtomicU64,
}

impl PromotionIndexCache {
    /// A cache that has not been built yet.
    pub fn new(max_staleness: Duration) -> Self {
        PromotionIndexCache {
            snapshot: RwLock::new(Snapshot {
                index: Arc::new(PromotionIndex::default()),
                generation: 0,
            }),
            generation: AtomicU64::new(1),
            max_staleness,
            rebuilds: AtomicU64::new(0),
        }
    }

    pub fn max_staleness(&self) -> Duration {
        self.max_staleness
    }

    /// Marks the current snapshot as outdated.
    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, "Promotion index invalidated");
    }

    /// Number of builds so far.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds.load(Ordering::SeqCst)
    }

    /// A snapshot fit for pricing at `now`, rebuilding if needed.
    pub async fn snapshot_for<S>(&self, store: &S, now: DateTime<Utc>) -> StoreResult<Arc<PromotionIndex>>
    where
        S: Store + ?Sized,
    {
        let generation = self.generation.load(Ordering::SeqCst);

        {
            let snapshot = self.snapshot.read().await;
            if snapshot.generation == generation && self.is_fresh(&snapshot.index, now) {
                return Ok(snapshot.index.clone());
            }
        }

        self.rebuild(store, now, generation).await
    }

    /// Builds a new snapshot for `now` unconditionally.
    pub async fn refresh<S>(&self, store: &S, now: DateTime<Utc>) -> StoreResult<Arc<PromotionIndex>>
    where
        S: Store + ?Sized,
    {
        let generation = self.generation.load(Ordering::SeqCst);
        self.rebuild(store, now, generation).await
    }

    fn is_fresh(&self, index: &PromotionIndex, now: DateTime<Utc>) -> bool {
        if self.max_staleness.is_zero() {
            return false;
        }

        // A negative age (now before built_at) does not convert and counts as stale.
        match (now - index.built_at()).to_std() {
            Ok(age) => age <= self.max_staleness,
            Err(_) => false,
        }
    }

    async fn rebuild<S>(&self, store: &S, now: DateTime<Utc>, generation: u64) -> StoreResult<Arc<PromotionIndex>>
    where
        S: Store + ?Sized,
    {
        let index = Arc::new(store.build_index(now).await?);
        self.rebuilds.fetch_add(1, Ordering::SeqCst);

        let mut snapshot = self.snapshot.write().await;
        if generation >= snapshot.generation {
            *snapshot = Snapshot {
                index: index.clone(),
                generation,
            };
        }
        drop(snapshot);

        info!(
            products = index.len(),
            generation,
            built_at = %now,
            "Promotion index rebuilt"
        );
        Ok(index)
    }
}

// =============================================================================
// Background Refresher
// =============================================================================

/// Rebuilds the index on a fixed interval until shut down.
pub struct IndexRefresher<S: Store + ?Sized> {
    store: Arc<S>,
    cache: Arc<PromotionIndexCache>,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping an [`IndexRefresher`].
#[derive(Debug, Clone)]
pub struct IndexRefresherHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl IndexRefresherHandle {
    /// Asks the refresher to stop. Returns false if it had already stopped.
    pub async fn shutdown(&self) -> bool {
        self.shutdown_tx.send(()).await.is_ok()
    }
}

impl<S: Store + ?Sized + 'static> IndexRefresher<S> {
    pub fn new(
        store: Arc<S>,
        cache: Arc<PromotionIndexCache>,
        interval: Duration,
    ) -> (Self, IndexRefresherHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let refresher = IndexRefresher {
            store,
            cache,
            interval,
            shutdown_rx,
        };

        (refresher, IndexRefresherHandle { shutdown_tx })
    }

    /// Runs the refresh loop. Spawn this as a background task.
    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "Promotion index refresher starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.cache.refresh(self.store.as_ref(), Utc::now()).await {
                        warn!(error = %e, "Failed to refresh promotion index");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Promotion index refresher shutting down");
                    break;
                }
            }
        }

        info!("Promotion index refresher stopped");
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
