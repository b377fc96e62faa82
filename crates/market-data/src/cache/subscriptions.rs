//! Fan-out of cache writes to registered listeners.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::{debug, warn};

use super::entry::{CacheEntry, CacheKey, Payload};

/// Listener invoked with the key and the entry that was just written.
pub type Listener = Arc<dyn Fn(&CacheKey, &CacheEntry<Payload>) + Send + Sync>;

type ListenerMap = HashMap<CacheKey, Vec<(u64, Listener)>>;

/// Per-key listener registry.
pub(crate) struct Subscriptions {
    listeners: Mutex<ListenerMap>,
    next_id: AtomicU64,
}

impl Subscriptions {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn lock_listeners(&self) -> MutexGuard<'_, ListenerMap> {
        self.listeners.lock().unwrap_or_else(|poisoned| {
            warn!("Subscription registry mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub(crate) fn subscribe(self: &Arc<Self>, key: CacheKey, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock_listeners()
            .entry(key.clone())
            .or_default()
            .push((id, listener));
        debug!("Subscribed listener {} to '{}'", id, key);

        Subscription {
            id,
            key,
            registry: Arc::downgrade(self),
        }
    }

    fn remove(&self, key: &CacheKey, id: u64) -> bool {
        let mut listeners = self.lock_listeners();
        let Some(for_key) = listeners.get_mut(key) else {
            return false;
        };
        let before = for_key.len();
        for_key.retain(|(listener_id, _)| *listener_id != id);
        let removed = for_key.len() != before;
        if for_key.is_empty() {
            listeners.remove(key);
        }
        removed
    }

    /// Invoke every listener registered for `key`.
    ///
    /// Listeners run without the registry lock held, so they may subscribe or
    /// unsubscribe (themselves included) while being notified. A listener that
    /// panics is logged and skipped; the rest still run.
    pub(crate) fn notify(&self, key: &CacheKey, entry: &CacheEntry<Payload>) {
        let listeners: Vec<(u64, Listener)> = match self.lock_listeners().get(key) {
            Some(for_key) => for_key.clone(),
            None => return,
        };

        for (id, listener) in listeners {
            // Skip listeners removed by an earlier listener in this round
            if !self.is_registered(key, id) {
                continue;
            }
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(key, entry))) {
                warn!(
                    "Listener {} for '{}' panicked: {}",
                    id,
                    key,
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    fn is_registered(&self, key: &CacheKey, id: u64) -> bool {
        self.lock_listeners()
            .get(key)
            .is_some_and(|for_key| for_key.iter().any(|(listener_id, _)| *listener_id == id))
    }

    pub(crate) fn count(&self, key: &CacheKey) -> usize {
        self.lock_listeners().get(key).map_or(0, Vec::len)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Handle to a registered listener.
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    key: CacheKey,
    registry: Weak<Subscriptions>,
}

impl Subscription {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Remove the listener. Idempotent; safe to call from inside the listener.
    ///
    /// Returns true if this call removed it.
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => {
                let removed = registry.remove(&self.key, self.id);
                if removed {
                    debug!("Unsubscribed listener {} from '{}'", self.id, self.key);
                }
                removed
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MarketDataError;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    fn failed_entry() -> CacheEntry<Payload> {
        CacheEntry::failed(None, MarketDataError::Network("down".to_string()), Utc::now())
    }

    fn counting_listener(counter: &Arc<AtomicUsize>) -> Listener {
        let counter = Arc::clone(counter);
        Arc::new(move |_key, _entry| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_notifies_only_matching_key() {
        let registry = Subscriptions::new();
        let quotes = Arc::new(AtomicUsize::new(0));
        let series = Arc::new(AtomicUsize::new(0));
        registry.subscribe(CacheKey::AllQuotes, counting_listener(&quotes));
        registry.subscribe(CacheKey::series("SPY"), counting_listener(&series));

        registry.notify(&CacheKey::AllQuotes, &failed_entry());

        assert_eq!(quotes.load(Ordering::SeqCst), 1);
        assert_eq!(series.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let registry = Subscriptions::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let subscription = registry.subscribe(CacheKey::AllQuotes, counting_listener(&counter));

        assert!(subscription.unsubscribe());
        assert!(!subscription.unsubscribe());
        assert_eq!(registry.count(&CacheKey::AllQuotes), 0);

        registry.notify(&CacheKey::AllQuotes, &failed_entry());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_from_inside_listener() {
        let registry = Subscriptions::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let handle: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let listener: Listener = {
            let counter = Arc::clone(&counter);
            let handle = Arc::clone(&handle);
            Arc::new(move |_key, _entry| {
                counter.fetch_add(1, Ordering::SeqCst);
                if let Some(subscription) = handle.lock().unwrap().as_ref() {
                    subscription.unsubscribe();
                    subscription.unsubscribe();
                }
            })
        };
        let subscription = registry.subscribe(CacheKey::AllQuotes, listener);
        *handle.lock().unwrap() = Some(subscription);

        registry.notify(&CacheKey::AllQuotes, &failed_entry());
        registry.notify(&CacheKey::AllQuotes, &failed_entry());

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let registry = Subscriptions::new();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.subscribe(
            CacheKey::AllQuotes,
            Arc::new(|_key, _entry| panic!("listener bug")),
        );
        registry.subscribe(CacheKey::AllQuotes, counting_listener(&counter));

        registry.notify(&CacheKey::AllQuotes, &failed_entry());
        registry.notify(&CacheKey::AllQuotes, &failed_entry());

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(registry.count(&CacheKey::AllQuotes), 2);
    }

    #[test]
    fn test_unsubscribe_after_registry_dropped() {
        let registry = Subscriptions::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let subscription = registry.subscribe(CacheKey::AllQuotes, counting_listener(&counter));
        drop(registry);

        assert!(!subscription.unsubscribe());
    }
}
