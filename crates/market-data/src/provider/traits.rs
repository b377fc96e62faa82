//! Upstream provider contract.

use async_trait::async_trait;

use crate::errors::MarketDataError;
use crate::models::{QuoteSet, RawSeries, Symbol};

/// Source of quotes and raw time series.
///
/// Implementations perform exactly one upstream request per call: retries,
/// coalescing and backoff belong to the refresh scheduler. The scheduler also
/// caps each call at the configured fetch timeout; implementations that can
/// time out earlier report it as [`MarketDataError::Timeout`].
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use marketboard_market_data::provider::QuoteProvider;
///
/// struct FixedProvider;
///
/// #[async_trait]
/// impl QuoteProvider for FixedProvider {
///     fn id(&self) -> &'static str {
///         "FIXED"
///     }
///
///     async fn fetch_quotes(&self) -> Result<QuoteSet, MarketDataError> {
///         Ok(QuoteSet::default())
///     }
///
///     async fn fetch_series(&self, symbol: &Symbol) -> Result<RawSeries, MarketDataError> {
///         Err(MarketDataError::NotFound(symbol.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Constant identifier used in logs, e.g. "HTTP".
    fn id(&self) -> &'static str;

    /// Fetch the whole quote universe.
    ///
    /// Fails with `Network`, `Timeout` or `BadResponse`. A malformed payload
    /// is rejected whole.
    async fn fetch_quotes(&self) -> Result<QuoteSet, MarketDataError>;

    /// Fetch the raw daily series for one symbol.
    ///
    /// Fails with `Network`, `Timeout`, `NotFound` or `BadResponse`. Points
    /// are returned as the provider sent them; cleaning is left to the shaper.
    async fn fetch_series(&self, symbol: &Symbol) -> Result<RawSeries, MarketDataError>;
}
