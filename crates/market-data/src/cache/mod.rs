//! Snapshot cache module.
//!
//! This module holds the only shared mutable state of the engine:
//! - Cache keys and immutable cache entries
//! - The snapshot cache itself (atomic swap per key)
//! - Change subscriptions

mod entry;
mod snapshot_cache;
mod subscriptions;

pub use entry::{CacheEntry, CacheKey, EntryStatus, Payload};
pub use snapshot_cache::SnapshotCache;
pub use subscriptions::{Listener, Subscription};

