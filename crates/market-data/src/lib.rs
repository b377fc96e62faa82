//! Marketboard Market Data Crate
//!
//! Refresh and cache engine behind the market dashboard: index, sector and
//! stock quotes plus per-symbol daily series, polled from an HTTP backend.
//!
//! # Overview
//!
//! The engine provides:
//! - A periodic full-universe quote refresh with exponential backoff
//! - On-demand series fetches with a staleness threshold
//! - At most one in-flight upstream request per cache key
//! - Last known-good values that survive failed refreshes
//! - Change subscriptions for every cache key
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |   DataService    |  get_quotes / get_series / subscribe
//! +------------------+
//!      |        |
//!      |        v
//!      |  +------------------+     +------------------+
//!      |  | RefreshScheduler | --> | RequestCoalescer |  (one fetch per key)
//!      |  +------------------+     +------------------+
//!      |        |                          |
//!      |        |                          v
//!      |        |                  +------------------+
//!      |        |                  |  QuoteProvider   |  (HTTP backend)
//!      |        |                  +------------------+
//!      |        |                          |
//!      |        |                          v
//!      |        |                  +------------------+
//!      |        |                  |   SeriesShaper   |  (series only)
//!      |        v                          |
//!      |  +------------------+             |
//!      +->|  SnapshotCache   | <-----------+
//!         +------------------+
//! ```
//!
//! # Core Types
//!
//! - [`DataService`] - The façade consumers call
//! - [`CachedValue`] - A cached value with its status and last error
//! - [`CacheEntry`] / [`CacheKey`] - Raw cache records and their keys
//! - [`Quote`] / [`QuoteSet`] - Quote universe
//! - [`Series`] / [`SeriesPoint`] - Chart-ready daily closes
//! - [`EngineConfig`] - Refresh cadence, staleness, timeout, backoff
//! - [`MarketDataError`] - Every failure the engine reports

pub mod cache;
pub mod config;
pub mod errors;
pub mod format;
pub mod models;
pub mod provider;
pub mod refresh;
pub mod service;
pub mod shaper;

// Re-export the consumer-facing types
pub use cache::{CacheEntry, CacheKey, EntryStatus, Payload, SnapshotCache, Subscription};
pub use config::EngineConfig;
pub use errors::{MarketDataError, Result};
pub use models::{Quote, QuoteSet, RawSeries, RawSeriesPoint, Series, SeriesPoint, Symbol};
pub use service::{CachedValue, DataService};

// Re-export provider and refresh types
pub use provider::{HttpQuoteProvider, QuoteProvider, QuoteValidator, RateLimiter};
pub use refresh::{Backoff, KeyState, RefreshPhase, RefreshScheduler, RequestCoalescer};
