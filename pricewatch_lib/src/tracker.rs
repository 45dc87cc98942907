//! Serialized, deduplicating appends to per-product price histories.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::identity::ProductIdentity;
use crate::model::{PriceHistory, ProductSnapshot};
use crate::store::{PriceStore, StoreError};

/// Result of recording one snapshot.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    /// False when the snapshot repeated the latest observation.
    pub appended: bool,
    /// History as of this record call, including the snapshot if appended.
    pub history: PriceHistory,
}

/// Appends snapshots through a [`PriceStore`].
///
/// Records for the same product are serialized behind a per-product async
/// lock; different products proceed in parallel. The store write is a
/// single call, so a cycle dropped before it leaves the store untouched.
/// A product's lock is dropped from the map once no record holds or
/// waits on it.
pub struct Tracker {
    store: Arc<dyn PriceStore>,
    locks: DashMap<ProductIdentity, Arc<Mutex<()>>>,
}

impl Tracker {
    pub fn new(store: Arc<dyn PriceStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn PriceStore> {
        &self.store
    }

    fn lock_for(&self, identity: &ProductIdentity) -> Arc<Mutex<()>> {
        Arc::clone(&self.locks.entry(identity.clone()).or_default())
    }

    pub async fn record(&self, snapshot: ProductSnapshot) -> Result<RecordOutcome, StoreError> {
        let identity = snapshot.identity.clone();
        let lock = self.lock_for(&identity);
        let result = {
            let _guard = lock.lock().await;
            self.record_locked(snapshot)
        };
        drop(lock);
        self.locks
            .remove_if(&identity, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    fn record_locked(&self, snapshot: ProductSnapshot) -> Result<RecordOutcome, StoreError> {
        let mut history = self.store.read_history(&snapshot.identity)?;
        if !history.push(snapshot.clone())? {
            tracing::debug!(
                "{} unchanged since {}, not appending",
                snapshot.identity,
                snapshot.fetched_at
            );
            return Ok(RecordOutcome {
                appended: false,
                history,
            });
        }

        self.store.append(&snapshot)?;
        tracing::info!(
            "Recorded {} at {} ({} entries)",
            snapshot.identity,
            snapshot.display_price(),
            history.len()
        );
        Ok(RecordOutcome {
            appended: true,
            history,
        })
    }

    pub fn history(&self, identity: &ProductIdentity) -> Result<PriceHistory, StoreError> {
        self.store.read_history(identity)
    }
}
