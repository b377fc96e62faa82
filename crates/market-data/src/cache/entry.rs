use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::MarketDataError;
use crate::models::{QuoteSet, Series, Symbol};

/// Cache key. `AllQuotes` and `SeriesOf` never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum CacheKey {
    /// The full quote universe
    AllQuotes,
    /// One symbol's time series
    SeriesOf(Symbol),
}

impl CacheKey {
    pub fn series(symbol: impl Into<Symbol>) -> Self {
        Self::SeriesOf(symbol.into())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllQuotes => write!(f, "quotes"),
            Self::SeriesOf(symbol) => write!(f, "series:{}", symbol),
        }
    }
}

/// Freshness of a cache entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum EntryStatus {
    /// Value from the latest fetch, within its freshness window.
    Fresh,
    /// Last known-good value that is past its window or whose refresh failed.
    Stale,
    /// No value has ever been fetched successfully.
    Failed,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh => write!(f, "Fresh"),
            Self::Stale => write!(f, "Stale"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Cached value, one variant per key namespace.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Quotes(Arc<QuoteSet>),
    Series(Arc<Series>),
}

impl Payload {
    pub fn as_quotes(&self) -> Option<&Arc<QuoteSet>> {
        match self {
            Self::Quotes(quotes) => Some(quotes),
            Self::Series(_) => None,
        }
    }

    pub fn as_series(&self) -> Option<&Arc<Series>> {
        match self {
            Self::Series(series) => Some(series),
            Self::Quotes(_) => None,
        }
    }
}

/// Immutable snapshot of one key's cache state.
///
/// Writers never mutate an entry in place; they build the successor with
/// [`CacheEntry::fresh`] or [`CacheEntry::failed`] and swap it in.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry<T> {
    /// Last known-good value; survives failed refreshes.
    pub value: Option<T>,
    pub status: EntryStatus,
    /// Error of the most recent attempt, cleared on success.
    pub last_error: Option<MarketDataError>,
    /// When `value` was fetched.
    pub fetched_at: Option<DateTime<Utc>>,
    /// When `value` stops being fresh.
    pub expires_at: Option<DateTime<Utc>>,
    /// When the most recent fetch attempt finished.
    pub last_attempt_at: DateTime<Utc>,
}

impl<T: Clone> CacheEntry<T> {
    /// Entry for a successful fetch.
    pub fn fresh(value: T, fetched_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            value: Some(value),
            status: EntryStatus::Fresh,
            last_error: None,
            fetched_at: Some(fetched_at),
            expires_at: Some(add_duration(fetched_at, ttl)),
            last_attempt_at: fetched_at,
        }
    }

    /// Successor of `previous` after a failed fetch.
    ///
    /// The previous value, fetch time and expiry are carried over untouched.
    pub fn failed(
        previous: Option<&CacheEntry<T>>,
        error: MarketDataError,
        attempted_at: DateTime<Utc>,
    ) -> Self {
        match previous {
            Some(previous) if previous.value.is_some() => Self {
                value: previous.value.clone(),
                status: EntryStatus::Stale,
                last_error: Some(error),
                fetched_at: previous.fetched_at,
                expires_at: previous.expires_at,
                last_attempt_at: attempted_at,
            },
            _ => Self {
                value: None,
                status: EntryStatus::Failed,
                last_error: Some(error),
                fetched_at: None,
                expires_at: None,
                last_attempt_at: attempted_at,
            },
        }
    }
}

impl<T> CacheEntry<T> {
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Whether the value is past its freshness window at `now`.
    ///
    /// Entries without a value are always expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => true,
        }
    }

    /// Status as seen at `now`: a Fresh entry past its window reports Stale.
    pub fn status_at(&self, now: DateTime<Utc>) -> EntryStatus {
        match self.status {
            EntryStatus::Fresh if self.is_expired_at(now) => EntryStatus::Stale,
            status => status,
        }
    }
}

/// `at + duration`, saturating at the far future.
pub(crate) fn add_duration(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_fresh_entry() {
        let now = Utc::now();
        let entry = CacheEntry::fresh(7, now, TTL);

        assert_eq!(entry.value, Some(7));
        assert_eq!(entry.status, EntryStatus::Fresh);
        assert!(entry.last_error.is_none());
        assert_eq!(entry.fetched_at, Some(now));
        assert_eq!(entry.expires_at, Some(now + chrono::Duration::seconds(60)));
        assert!(!entry.is_expired_at(now));
    }

    #[test]
    fn test_failure_keeps_previous_value() {
        let fetched = Utc::now();
        let fresh = CacheEntry::fresh("spy", fetched, TTL);
        let error = MarketDataError::Network("reset".to_string());

        let failed = CacheEntry::failed(Some(&fresh), error.clone(), fetched);

        assert_eq!(failed.value, Some("spy"));
        assert_eq!(failed.status, EntryStatus::Stale);
        assert_eq!(failed.last_error, Some(error));
        assert_eq!(failed.fetched_at, Some(fetched));
        assert_eq!(failed.expires_at, fresh.expires_at);
    }

    #[test]
    fn test_repeated_failures_keep_value() {
        let fetched = Utc::now();
        let fresh = CacheEntry::fresh(1u32, fetched, TTL);
        let first = CacheEntry::failed(
            Some(&fresh),
            MarketDataError::Network("a".to_string()),
            fetched,
        );
        let second = CacheEntry::failed(
            Some(&first),
            MarketDataError::Timeout(Duration::from_secs(10)),
            fetched,
        );

        assert_eq!(second.value, Some(1));
        assert_eq!(second.status, EntryStatus::Stale);
        assert_eq!(
            second.last_error,
            Some(MarketDataError::Timeout(Duration::from_secs(10)))
        );
    }

    #[test]
    fn test_failure_without_value_is_failed() {
        let now = Utc::now();
        let failed: CacheEntry<u32> =
            CacheEntry::failed(None, MarketDataError::NotFound("ZZZ".to_string()), now);

        assert!(failed.value.is_none());
        assert_eq!(failed.status, EntryStatus::Failed);
        assert!(failed.is_expired_at(now));
    }

    #[test]
    fn test_fresh_entry_reports_stale_after_window() {
        let fetched = Utc::now();
        let entry = CacheEntry::fresh(1u8, fetched, TTL);

        assert_eq!(entry.status_at(fetched), EntryStatus::Fresh);
        assert_eq!(
            entry.status_at(fetched + chrono::Duration::seconds(61)),
            EntryStatus::Stale
        );
    }

    #[test]
    fn test_cache_keys_are_disjoint() {
        assert_ne!(CacheKey::AllQuotes, CacheKey::series("QUOTES"));
        assert_eq!(CacheKey::series("aapl"), CacheKey::series("AAPL"));
        assert_eq!(CacheKey::series("aapl").to_string(), "series:AAPL");
    }
}
