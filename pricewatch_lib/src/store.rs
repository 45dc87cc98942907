//! Storage boundary for price histories and alert rules.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::identity::ProductIdentity;
use crate::model::{AlertKind, AlertRule, PriceHistory, ProductSnapshot};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("date parse error: {0}")]
    Date(#[from] chrono::ParseError),
    #[error("snapshot for {identity} at {attempted} predates latest entry at {latest}")]
    OutOfOrder {
        identity: String,
        latest: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Persistence collaborator for snapshots and rules.
///
/// Implementations only store and load; ordering, dedup and per-product
/// serialization are handled by [`crate::tracker::Tracker`].
pub trait PriceStore: Send + Sync {
    fn append(&self, snapshot: &ProductSnapshot) -> Result<(), StoreError>;
    fn read_history(&self, identity: &ProductIdentity) -> Result<PriceHistory, StoreError>;
    fn read_rules(&self, identity: &ProductIdentity) -> Result<Vec<AlertRule>, StoreError>;
}

impl<S: PriceStore + ?Sized> PriceStore for Arc<S> {
    fn append(&self, snapshot: &ProductSnapshot) -> Result<(), StoreError> {
        (**self).append(snapshot)
    }

    fn read_history(&self, identity: &ProductIdentity) -> Result<PriceHistory, StoreError> {
        (**self).read_history(identity)
    }

    fn read_rules(&self, identity: &ProductIdentity) -> Result<Vec<AlertRule>, StoreError> {
        (**self).read_rules(identity)
    }
}

/// In-memory store backed by `DashMap` for concurrent access.
#[derive(Default)]
pub struct MemoryStore {
    snapshots: DashMap<ProductIdentity, Vec<ProductSnapshot>>,
    rules: DashMap<ProductIdentity, Vec<AlertRule>>,
    next_rule_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(
        &self,
        identity: &ProductIdentity,
        kind: AlertKind,
        threshold: Option<i64>,
        currency: Option<&str>,
    ) -> AlertRule {
        let rule = AlertRule {
            id: self.next_rule_id.fetch_add(1, Ordering::Relaxed) + 1,
            identity: identity.clone(),
            kind,
            threshold,
            currency: currency.map(str::to_string),
        };
        self.rules
            .entry(identity.clone())
            .or_default()
            .push(rule.clone());
        rule
    }

    /// Removes a rule by id; returns whether it existed.
    pub fn remove_rule(&self, id: i64) -> bool {
        let mut removed = false;
        for mut entry in self.rules.iter_mut() {
            let before = entry.len();
            entry.retain(|rule| rule.id != id);
            removed |= entry.len() != before;
        }
        removed
    }

    /// Identities with at least one stored snapshot.
    pub fn tracked(&self) -> Vec<ProductIdentity> {
        let mut ids: Vec<ProductIdentity> = self.snapshots.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

impl PriceStore for MemoryStore {
    fn append(&self, snapshot: &ProductSnapshot) -> Result<(), StoreError> {
        self.snapshots
            .entry(snapshot.identity.clone())
            .or_default()
            .push(snapshot.clone());
        Ok(())
    }

    fn read_history(&self, identity: &ProductIdentity) -> Result<PriceHistory, StoreError> {
        let entries = self
            .snapshots
            .get(identity)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        PriceHistory::from_entries(entries)
    }

    fn read_rules(&self, identity: &ProductIdentity) -> Result<Vec<AlertRule>, StoreError> {
        Ok(self
            .rules
            .get(identity)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: &str) -> ProductIdentity {
        ProductIdentity::new("amazon.com", n)
    }

    #[test]
    fn rules_are_scoped_to_identity() {
        let store = MemoryStore::new();
        let a = store.add_rule(&id("B000000001"), AlertKind::PriceBelow, Some(500), Some("USD"));
        let b = store.add_rule(&id("B000000002"), AlertKind::BackInStock, None, None);
        assert_ne!(a.id, b.id);
        assert_eq!(store.read_rules(&id("B000000001")).unwrap(), vec![a.clone()]);
        assert!(store.remove_rule(a.id));
        assert!(!store.remove_rule(a.id));
        assert!(store.read_rules(&id("B000000001")).unwrap().is_empty());
        assert_eq!(store.read_rules(&id("B000000002")).unwrap().len(), 1);
    }

    #[test]
    fn unknown_identity_has_empty_history() {
        let store = MemoryStore::new();
        assert!(store.read_history(&id("B000000009")).unwrap().is_empty());
        assert!(store.tracked().is_empty());
    }
}
