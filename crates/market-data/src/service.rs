//! Consumer-facing façade over the cache and the refresh scheduler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;

use crate::cache::{CacheEntry, CacheKey, EntryStatus, Payload, SnapshotCache, Subscription};
use crate::config::EngineConfig;
use crate::errors::{MarketDataError, Result};
use crate::models::{QuoteSet, Series, Symbol};
use crate::provider::QuoteProvider;
use crate::refresh::RefreshScheduler;

/// Read-only view of a cached value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedValue<T> {
    pub value: Arc<T>,
    /// Status as of the read: a Fresh entry past its window reads as Stale.
    pub status: EntryStatus,
    /// Error of the most recent failed refresh, if the last attempt failed.
    pub last_error: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl<T> CachedValue<T> {
    pub fn is_fresh(&self) -> bool {
        self.status == EntryStatus::Fresh
    }

    fn project(
        entry: &CacheEntry<Payload>,
        now: DateTime<Utc>,
        select: fn(&Payload) -> Option<&Arc<T>>,
    ) -> Option<Self> {
        let value = entry.value.as_ref().and_then(select)?;
        Some(Self {
            value: Arc::clone(value),
            status: entry.status_at(now),
            last_error: entry.last_error.as_ref().map(ToString::to_string),
            fetched_at: entry.fetched_at,
        })
    }
}

/// The engine as seen by the dashboard.
///
/// Reads never block on upstream when a value is cached: the last known-good
/// value is served (possibly Stale) and refreshes happen in the background or
/// on demand. Only a key that has never been fetched successfully surfaces
/// upstream errors to the caller.
pub struct DataService {
    cache: Arc<SnapshotCache>,
    scheduler: RefreshScheduler,
}

impl DataService {
    /// Build the engine. Fails with `InvalidConfig` for an invalid configuration.
    pub fn new(provider: Arc<dyn QuoteProvider>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(SnapshotCache::new());
        let scheduler = RefreshScheduler::new(provider, Arc::clone(&cache), config);
        Ok(Self { cache, scheduler })
    }

    /// Engine around an existing scheduler and the cache it writes to.
    pub fn with_scheduler(cache: Arc<SnapshotCache>, scheduler: RefreshScheduler) -> Result<Self> {
        scheduler.config().validate()?;
        Ok(Self { cache, scheduler })
    }

    pub fn config(&self) -> &EngineConfig {
        self.scheduler.config()
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    /// Latest quote set.
    ///
    /// A cached set is returned immediately, whatever its age or the outcome
    /// of the last refresh. Without one, this performs (or joins) the first
    /// fetch and returns its error on failure.
    pub async fn get_quotes(&self) -> Result<CachedValue<QuoteSet>> {
        if let Some(cached) = self.cached(&CacheKey::AllQuotes, Payload::as_quotes) {
            return Ok(cached);
        }

        debug!("No cached quotes, fetching");
        let outcome = self.scheduler.refresh_quotes().await;
        self.settle(&CacheKey::AllQuotes, outcome, Payload::as_quotes)
    }

    /// Chart series for `symbol`.
    ///
    /// A fresh cached series is returned as is. A missing or stale one is
    /// refreshed (coalesced with concurrent callers) unless the key is still
    /// backing off from a failure, in which case the cached value, or the
    /// recorded error when there is none, is returned without calling upstream.
    pub async fn get_series(&self, symbol: impl Into<Symbol>) -> Result<CachedValue<Series>> {
        let symbol = symbol.into();
        let key = CacheKey::SeriesOf(symbol.clone());

        if let Some(entry) = self.cache.get(&key) {
            let now = Utc::now();
            if !entry.is_expired_at(now) {
                if let Some(cached) = CachedValue::project(&entry, now, Payload::as_series) {
                    return Ok(cached);
                }
            }
            if !self.scheduler.may_attempt(&key) {
                debug!("Series {} is backing off, serving cache", symbol);
                return served_or_recorded(&entry, now);
            }
        }

        let outcome = self.scheduler.refresh_series(&symbol).await;
        self.settle(&key, outcome, Payload::as_series)
    }

    /// Register `listener` for every write to `key`.
    ///
    /// The listener runs on the writing task, after the write, outside any
    /// cache lock. Dropping the returned handle does not unsubscribe.
    pub fn subscribe<F>(&self, key: CacheKey, listener: F) -> Subscription
    where
        F: Fn(&CacheKey, &CacheEntry<Payload>) + Send + Sync + 'static,
    {
        self.cache.subscribe(key, listener)
    }

    /// Force a quote refresh (still coalesced with one already in flight).
    ///
    /// On failure the previous set is returned with its status and error, if
    /// there is one.
    pub async fn refresh_quotes(&self) -> Result<CachedValue<QuoteSet>> {
        let outcome = self.scheduler.refresh_quotes().await;
        self.settle(&CacheKey::AllQuotes, outcome, Payload::as_quotes)
    }

    /// Force a series refresh, ignoring staleness and backoff.
    pub async fn refresh_series(&self, symbol: impl Into<Symbol>) -> Result<CachedValue<Series>> {
        let symbol = symbol.into();
        let outcome = self.scheduler.refresh_series(&symbol).await;
        self.settle(&CacheKey::SeriesOf(symbol), outcome, Payload::as_series)
    }

    /// Raw cache entry for `key`.
    pub fn entry(&self, key: &CacheKey) -> Option<Arc<CacheEntry<Payload>>> {
        self.cache.get(key)
    }

    /// Start the periodic full-universe refresh. Must be called from within a
    /// Tokio runtime.
    pub fn start(&self) -> bool {
        self.scheduler.start()
    }

    /// Stop refreshing and abandon in-flight fetches.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    fn cached<T>(
        &self,
        key: &CacheKey,
        select: fn(&Payload) -> Option<&Arc<T>>,
    ) -> Option<CachedValue<T>> {
        self.cache
            .get(key)
            .and_then(|entry| CachedValue::project(&entry, Utc::now(), select))
    }

    /// Turn a refresh outcome into what the caller sees: the new value, the
    /// previous value after a failure, or the error when nothing is cached.
    fn settle<T>(
        &self,
        key: &CacheKey,
        outcome: Result<Arc<T>>,
        select: fn(&Payload) -> Option<&Arc<T>>,
    ) -> Result<CachedValue<T>> {
        match outcome {
            Ok(value) => {
                let fetched_at = self.cache.get(key).and_then(|entry| entry.fetched_at);
                Ok(CachedValue {
                    value,
                    status: EntryStatus::Fresh,
                    last_error: None,
                    fetched_at,
                })
            }
            Err(error) => self.cached(key, select).ok_or(error),
        }
    }
}

fn served_or_recorded(entry: &CacheEntry<Payload>, now: DateTime<Utc>) -> Result<CachedValue<Series>> {
    CachedValue::project(entry, now, Payload::as_series).ok_or_else(|| {
        entry.last_error.clone().unwrap_or_else(|| {
            MarketDataError::Cancelled("no series value cached".to_string())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawSeries, RawSeriesPoint};
    use async_trait::async_trait;

    struct EmptyProvider;

    #[async_trait]
    impl QuoteProvider for EmptyProvider {
        fn id(&self) -> &'static str {
            "EMPTY"
        }

        async fn fetch_quotes(&self) -> Result<QuoteSet> {
            Ok(QuoteSet::default())
        }

        async fn fetch_series(&self, symbol: &Symbol) -> Result<RawSeries> {
            Ok(RawSeries {
                symbol: symbol.clone(),
                points: vec![
                    RawSeriesPoint::new("2024-01-01", 95.0),
                    RawSeriesPoint::new("2024-01-02", 101.0),
                ],
            })
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            backoff_cap_multiplier: 0,
            ..EngineConfig::default()
        };

        let result = DataService::new(Arc::new(EmptyProvider), config);

        assert!(matches!(result, Err(MarketDataError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_fresh_series_served_from_cache() {
        let service = DataService::new(Arc::new(EmptyProvider), EngineConfig::default()).unwrap();

        let first = service.get_series("spy").await.unwrap();
        let second = service.get_series("SPY").await.unwrap();

        assert!(first.is_fresh());
        assert!(Arc::ptr_eq(&first.value, &second.value));
        assert_eq!(first.value.symbol.as_str(), "SPY");
    }

    #[test]
    fn test_cached_value_serializes_error_text() {
        let entry: CacheEntry<Payload> = CacheEntry::failed(
            Some(&CacheEntry::fresh(
                Payload::Quotes(Arc::new(QuoteSet::default())),
                Utc::now(),
                std::time::Duration::from_secs(60),
            )),
            MarketDataError::Network("refused".to_string()),
            Utc::now(),
        );

        let cached = CachedValue::project(&entry, Utc::now(), Payload::as_quotes).unwrap();
        let json = serde_json::to_value(&cached).unwrap();

        assert_eq!(json["status"], "Stale");
        assert_eq!(json["lastError"], "Network error: refused");
    }
}
