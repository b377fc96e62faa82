//! Last-known-good snapshot store.
//!
//! Every key maps to an `Arc<CacheEntry<Payload>>`. Writes build a complete new
//! entry and swap the pointer, so a reader either sees the previous entry or
//! the next one, never a mix. Listeners are notified after the swap, outside
//! the map's shard lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;

use super::entry::{CacheEntry, CacheKey, Payload};
use super::subscriptions::{Listener, Subscription, Subscriptions};
use crate::errors::MarketDataError;

/// In-memory snapshot cache with change notification.
pub struct SnapshotCache {
    entries: DashMap<CacheKey, Arc<CacheEntry<Payload>>>,
    subscriptions: Arc<Subscriptions>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            subscriptions: Subscriptions::new(),
        }
    }

    /// Current entry for `key`, if any fetch has completed for it.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry<Payload>>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Store a freshly fetched value. Marks the entry Fresh and clears the last error.
    pub fn put(
        &self,
        key: &CacheKey,
        value: Payload,
        fetched_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Arc<CacheEntry<Payload>> {
        let entry = Arc::new(CacheEntry::fresh(value, fetched_at, ttl));
        self.entries.insert(key.clone(), Arc::clone(&entry));
        debug!("Cache: stored fresh entry for '{}'", key);

        self.subscriptions.notify(key, &entry);
        entry
    }

    /// Record a failed fetch. Any existing value is kept (status Stale);
    /// without one the entry becomes Failed.
    pub fn mark_failed(
        &self,
        key: &CacheKey,
        error: MarketDataError,
        attempted_at: DateTime<Utc>,
    ) -> Arc<CacheEntry<Payload>> {
        let entry = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let next = Arc::new(CacheEntry::failed(
                    Some(occupied.get().as_ref()),
                    error,
                    attempted_at,
                ));
                occupied.insert(Arc::clone(&next));
                next
            }
            Entry::Vacant(vacant) => {
                let next = Arc::new(CacheEntry::failed(None, error, attempted_at));
                vacant.insert(Arc::clone(&next));
                next
            }
        };
        debug!(
            "Cache: recorded failure for '{}' (status {})",
            key, entry.status
        );

        self.subscriptions.notify(key, &entry);
        entry
    }

    /// Register a listener for writes to `key`.
    pub fn subscribe<F>(&self, key: CacheKey, listener: F) -> Subscription
    where
        F: Fn(&CacheKey, &CacheEntry<Payload>) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        self.subscriptions.subscribe(key, listener)
    }

    pub fn listener_count(&self, key: &CacheKey) -> usize {
        self.subscriptions.count(key)
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}
