//! # Per-Invoice Locks
//!
//! At most one mutation in flight per invoice id. Different invoices never
//! share a lock.
//!
//! The registry hands out one `Arc<Mutex<()>>` per invoice id. Entries nobody
//! holds are pruned once the registry grows past [`PRUNE_THRESHOLD`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry size above which idle entries are dropped on the next acquire.
const PRUNE_THRESHOLD: usize = 256;

/// Registry of per-invoice mutexes.
#[derive(Debug, Default)]
pub struct InvoiceLocks {
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl InvoiceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `invoice_id`. Access lasts as long as
    /// the returned guard lives.
    pub async fn acquire(&self, invoice_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;

            if locks.len() > PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }

            locks.entry(invoice_id).or_default().clone()
        };

        lock.lock_owned().await
    }

    /// Number of invoice ids currently tracked.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.locks.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_same_invoice_is_exclusive() {
        let locks = Arc::new(InvoiceLocks::new());
        let guard = locks.acquire(1).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(1).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_invoices_do_not_contend() {
        let locks = InvoiceLocks::new();
        let _first = locks.acquire(1).await;
        let _second = locks.acquire(2).await;
        assert_eq!(locks.len().await, 2);
    }

    #[tokio::test]
    async fn test_idle_entries_are_pruned() {
        let locks = InvoiceLocks::new();
        for id in 0..=PRUNE_THRESHOLD as i64 {
            drop(locks.acquire(id).await);
        }
        let _held = locks.acquire(10_000).await;
        assert!(locks.len().await <= 2);
    }
}
