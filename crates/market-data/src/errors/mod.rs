//! Error types for the market data engine.
//!
//! [`MarketDataError`] is `Clone`: a single coalesced upstream fetch hands the
//! same result to every waiter, so it carries messages rather than
//! transport-level error values.

use std::time::Duration;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, MarketDataError>;

/// Errors that can occur while fetching, shaping or serving market data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarketDataError {
    /// Connection, DNS or upstream availability failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The upstream call exceeded the configured fetch timeout.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// The upstream payload was malformed (missing fields, non-finite numbers,
    /// unparsable body). Malformed payloads are rejected whole.
    #[error("Bad response: {0}")]
    BadResponse(String),

    /// The symbol is unknown to the provider.
    #[error("Symbol not found: {0}")]
    NotFound(String),

    /// Series shaping left fewer than two usable points.
    #[error("Insufficient data for {symbol}: {points} usable point(s)")]
    InsufficientData {
        /// The symbol whose series was shaped.
        symbol: String,
        /// Number of points left after shaping.
        points: usize,
    },

    /// A configuration value is outside its valid range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The in-flight fetch was abandoned before it produced a result.
    #[error("Refresh cancelled: {0}")]
    Cancelled(String),
}

impl MarketDataError {
    /// Returns true for failures that may clear up on their own
    /// (network trouble, timeouts, abandoned fetches).
    ///
    /// Every failure goes through the same backoff; this only decides how loudly
    /// a failure is logged.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::Cancelled(_)
        )
    }

    /// Maps a transport error from the HTTP client.
    pub(crate) fn from_transport(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            Self::Timeout(timeout)
        } else if error.is_decode() {
            Self::BadResponse(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}
