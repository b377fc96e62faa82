//! Refresh scheduling.
//!
//! The scheduler owns every write to the snapshot cache. It runs the periodic
//! full-universe refresh and on-demand series refreshes, both through the
//! request coalescer, and keeps the per-key backoff state.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use super::coalescer::RequestCoalescer;
use super::state::{KeyState, RefreshStates};
use crate::cache::{CacheKey, Payload, SnapshotCache};
use crate::config::EngineConfig;
use crate::errors::{MarketDataError, Result};
use crate::models::{QuoteSet, Series, Symbol};
use crate::provider::{QuoteProvider, QuoteValidator, RateLimiter};
use crate::shaper;

struct Inner {
    provider: Arc<dyn QuoteProvider>,
    cache: Arc<SnapshotCache>,
    validator: QuoteValidator,
    rate_limiter: Option<RateLimiter>,
    config: EngineConfig,
    quotes: RequestCoalescer<CacheKey, Arc<QuoteSet>>,
    series: RequestCoalescer<CacheKey, Arc<Series>>,
    states: RefreshStates,
    shutdown: CancellationToken,
    periodic: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Drives upstream fetches and writes their outcomes into the cache.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct RefreshScheduler {
    inner: Arc<Inner>,
}

impl RefreshScheduler {
    /// The configuration is expected to be validated already.
    pub fn new(
        provider: Arc<dyn QuoteProvider>,
        cache: Arc<SnapshotCache>,
        config: EngineConfig,
    ) -> Self {
        Self::with_validator(provider, cache, config, QuoteValidator::new())
    }

    /// Scheduler checking quote payloads with a custom validator.
    pub fn with_validator(
        provider: Arc<dyn QuoteProvider>,
        cache: Arc<SnapshotCache>,
        config: EngineConfig,
        validator: QuoteValidator,
    ) -> Self {
        let backoff = Backoff::new(config.backoff_cap_multiplier);
        let rate_limiter = config.rate_limit_per_minute.map(RateLimiter::per_minute);
        Self {
            inner: Arc::new(Inner {
                provider,
                cache,
                validator,
                rate_limiter,
                config,
                quotes: RequestCoalescer::new(),
                series: RequestCoalescer::new(),
                states: RefreshStates::new(backoff),
                shutdown: CancellationToken::new(),
                periodic: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Refresh the full quote universe, joining a refresh already in flight.
    pub async fn refresh_quotes(&self) -> Result<Arc<QuoteSet>> {
        self.ensure_running()?;
        let inner = Arc::clone(&self.inner);
        self.inner
            .quotes
            .run_exclusive(CacheKey::AllQuotes, move || async move {
                inner.ensure_running()?;
                inner.fetch_quotes().await
            })
            .await
    }

    /// Refresh one symbol's series, joining a refresh already in flight.
    ///
    /// A blank symbol fails with `NotFound` without touching upstream or the
    /// cache.
    pub async fn refresh_series(&self, symbol: &Symbol) -> Result<Arc<Series>> {
        self.ensure_running()?;
        if symbol.is_empty() {
            return Err(MarketDataError::NotFound("empty symbol".to_string()));
        }
        let inner = Arc::clone(&self.inner);
        let owned = symbol.clone();
        self.inner
            .series
            .run_exclusive(CacheKey::SeriesOf(symbol.clone()), move || async move {
                inner.ensure_running()?;
                inner.fetch_series(owned).await
            })
            .await
    }

    /// Whether an on-demand refresh of `key` may call upstream now.
    ///
    /// False while the key is inside its post-failure backoff window.
    pub fn may_attempt(&self, key: &CacheKey) -> bool {
        self.inner.states.may_attempt(key)
    }

    /// Refresh state of `key`, if it was ever refreshed.
    pub fn key_state(&self, key: &CacheKey) -> Option<KeyState> {
        self.inner.states.get(key)
    }

    /// Delay before the next scheduled refresh of `key`, backoff included.
    pub fn next_delay(&self, key: &CacheKey) -> Duration {
        self.inner
            .states
            .get(key)
            .map(|state| state.next_delay)
            .unwrap_or_else(|| self.inner.base_interval(key))
    }

    /// Number of keys with an upstream fetch in flight.
    pub fn in_flight_count(&self) -> usize {
        self.inner.quotes.in_flight_count() + self.inner.series.in_flight_count()
    }

    pub fn is_running(&self) -> bool {
        lock_periodic(&self.inner.periodic).is_some() && !self.is_shut_down()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Start the periodic full-universe refresh.
    ///
    /// The first cycle runs immediately; each later one waits the key's next
    /// delay. Returns false if the loop is already running or the scheduler
    /// was shut down. Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        if self.is_shut_down() {
            warn!("Refresh scheduler was shut down, not starting");
            return false;
        }

        let mut periodic = lock_periodic(&self.inner.periodic);
        if periodic.is_some() {
            debug!("Refresh scheduler already running");
            return false;
        }

        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        info!(
            "Refresh scheduler started ({:?} interval, backoff cap {}x)",
            self.inner.config.full_refresh_interval, self.inner.config.backoff_cap_multiplier
        );
        *periodic = Some(tokio::spawn(run_periodic(weak, shutdown)));
        true
    }

    /// Stop the periodic loop and abandon every in-flight fetch.
    ///
    /// Waiters of abandoned fetches receive [`MarketDataError::Cancelled`].
    /// No coalescer slot is held once this returns; later refresh calls fail
    /// with `Cancelled`.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let aborted = self.inner.quotes.cancel_all() + self.inner.series.cancel_all();
        let periodic = lock_periodic(&self.inner.periodic).take();

        if let Some(task) = periodic {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Refresh loop ended abnormally: {}", e);
                }
            }
        }

        info!(
            "Refresh scheduler stopped ({} in-flight fetch(es) abandoned)",
            aborted
        );
    }

    fn ensure_running(&self) -> Result<()> {
        self.inner.ensure_running()
    }
}

impl Inner {
    /// Refresh calls racing a shutdown never reach upstream.
    fn ensure_running(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(MarketDataError::Cancelled(
                "refresh scheduler is shut down".to_string(),
            ));
        }
        Ok(())
    }

    /// Wait for a rate limit token, then run the upstream call capped at the
    /// configured fetch timeout. Time spent waiting for a token is not part of
    /// the timeout.
    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }
        let limit = self.config.fetch_timeout;
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or_else(|_| Err(MarketDataError::Timeout(limit)))
    }

    fn base_interval(&self, key: &CacheKey) -> Duration {
        match key {
            CacheKey::AllQuotes => self.config.full_refresh_interval,
            CacheKey::SeriesOf(_) => self.config.series_staleness,
        }
    }

    /// One upstream quote fetch; the outcome is written to the cache before
    /// the coalescer slot is released.
    async fn fetch_quotes(&self) -> Result<Arc<QuoteSet>> {
        let key = CacheKey::AllQuotes;
        let interval = self.base_interval(&key);
        self.states.begin(&key, interval);

        let result = self
            .bounded(self.provider.fetch_quotes())
            .await
            .and_then(|quotes| self.validator.validate_set(&quotes).map(|_| quotes));
        let now = Utc::now();

        match result {
            Ok(quotes) => {
                let quotes = Arc::new(quotes);
                self.states.succeed(&key, interval);
                self.cache
                    .put(&key, Payload::Quotes(Arc::clone(&quotes)), now, interval);
                info!(
                    "Refreshed {} quote(s) from {}",
                    quotes.len(),
                    self.provider.id()
                );
                Ok(quotes)
            }
            Err(e) => {
                let state = self.states.fail(&key, interval);
                let entry = self.cache.mark_failed(&key, e.clone(), now);
                log_failure(&key, &e, state.consecutive_failures, entry.has_value());
                Err(e)
            }
        }
    }

    async fn fetch_series(&self, symbol: Symbol) -> Result<Arc<Series>> {
        let key = CacheKey::SeriesOf(symbol.clone());
        let staleness = self.base_interval(&key);
        self.states.begin(&key, staleness);

        let result = match self.bounded(self.provider.fetch_series(&symbol)).await {
            Ok(raw) => shaper::shape(raw, Utc::now()),
            Err(e) => Err(e),
        };
        let now = Utc::now();

        match result {
            Ok(series) => {
                let series = Arc::new(series);
                self.states.succeed(&key, staleness);
                self.cache
                    .put(&key, Payload::Series(Arc::clone(&series)), now, staleness);
                debug!("Refreshed series {} ({} points)", symbol, series.len());
                Ok(series)
            }
            Err(e) => {
                let state = self.states.fail(&key, staleness);
                let entry = self.cache.mark_failed(&key, e.clone(), now);
                log_failure(&key, &e, state.consecutive_failures, entry.has_value());
                Err(e)
            }
        }
    }
}

fn log_failure(key: &CacheKey, error: &MarketDataError, failures: u32, kept_value: bool) {
    let kept = if kept_value {
        "serving last known value"
    } else {
        "no value cached"
    };
    if error.is_transient() {
        warn!(
            "Refresh of '{}' failed ({} in a row, {}): {}",
            key, failures, kept, error
        );
    } else {
        warn!(
            "Refresh of '{}' rejected ({} in a row, {}): {}",
            key, failures, kept, error
        );
    }
}

/// Periodic full-universe loop. Holds the scheduler only while a cycle runs,
/// so dropping every handle ends the loop.
async fn run_periodic(weak: Weak<Inner>, shutdown: CancellationToken) {
    loop {
        let delay = {
            let Some(inner) = weak.upgrade() else {
                break;
            };
            let scheduler = RefreshScheduler { inner };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = scheduler.refresh_quotes() => {
                    if let Err(e) = result {
                        debug!("Scheduled quote refresh failed: {}", e);
                    }
                }
            }
            scheduler.next_delay(&CacheKey::AllQuotes)
        };

        debug!("Next full refresh in {:?}", delay);
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    debug!("Refresh loop exited");
}

fn lock_periodic(periodic: &Mutex<Option<JoinHandle<()>>>) -> MutexGuard<'_, Option<JoinHandle<()>>> {
    periodic.lock().unwrap_or_else(|poisoned| {
        warn!("Refresh loop mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}
