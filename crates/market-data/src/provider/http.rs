//! HTTP provider for the dashboard backend API.
//!
//! # API Endpoints
//!
//! - Quote universe: `{base_url}/quotes`
//! - Daily series: `{base_url}/series/{symbol}` (symbol URL-encoded)
//!
//! Status mapping: 404 is `NotFound` for series and `BadResponse` for quotes;
//! 408 and 504 are `Timeout`; 429 and 5xx are `Network`; any other
//! non-success is `BadResponse`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use super::models::{WirePoint, WireQuote};
use super::traits::QuoteProvider;
use crate::config::DEFAULT_FETCH_TIMEOUT;
use crate::errors::MarketDataError;
use crate::models::{Quote, QuoteSet, RawSeries, RawSeriesPoint, Symbol};

const PROVIDER_ID: &str = "HTTP";

/// Which endpoint a response came from; decides how 404 is reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Endpoint {
    Quotes,
    Series,
}

/// Provider reading quotes and series from a JSON HTTP API.
///
/// # Example
///
/// ```ignore
/// let provider = HttpQuoteProvider::new("http://localhost:8080", Duration::from_secs(10))?;
/// let quotes = provider.fetch_quotes().await?;
/// ```
pub struct HttpQuoteProvider {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpQuoteProvider {
    /// Create a provider for `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, MarketDataError> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(MarketDataError::InvalidConfig(
                "provider base URL is empty".to_string(),
            ));
        }
        if timeout.is_zero() {
            return Err(MarketDataError::InvalidConfig(
                "fetch timeout must be greater than zero".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MarketDataError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// Provider with the default 10 second timeout.
    pub fn with_default_timeout(base_url: impl Into<String>) -> Result<Self, MarketDataError> {
        Self::new(base_url, DEFAULT_FETCH_TIMEOUT)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn quotes_url(&self) -> String {
        format!("{}/quotes", self.base_url)
    }

    fn series_url(&self, symbol: &Symbol) -> String {
        format!(
            "{}/series/{}",
            self.base_url,
            urlencoding::encode(symbol.as_str())
        )
    }

    /// GET `url` and decode its JSON body.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        endpoint: Endpoint,
        subject: &str,
    ) -> Result<T, MarketDataError> {
        debug!("{}: GET {}", PROVIDER_ID, url);
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| MarketDataError::from_transport(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            warn!("{}: {} returned HTTP {}", PROVIDER_ID, url, status);
            return Err(map_status(status, endpoint, subject, self.timeout));
        }

        let body = response
            .text()
            .await
            .map_err(|e| MarketDataError::from_transport(e, self.timeout))?;

        serde_json::from_str(&body).map_err(|e| {
            MarketDataError::BadResponse(format!("unparsable {} body: {}", subject, e))
        })
    }
}

/// Map a non-success HTTP status to an error.
fn map_status(
    status: StatusCode,
    endpoint: Endpoint,
    subject: &str,
    timeout: Duration,
) -> MarketDataError {
    match status {
        StatusCode::NOT_FOUND if endpoint == Endpoint::Series => {
            MarketDataError::NotFound(subject.to_string())
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => MarketDataError::Timeout(timeout),
        StatusCode::TOO_MANY_REQUESTS => {
            MarketDataError::Network("rate limited by upstream (HTTP 429)".to_string())
        }
        s if s.is_server_error() => {
            MarketDataError::Network(format!("upstream unavailable (HTTP {})", s.as_u16()))
        }
        s => MarketDataError::BadResponse(format!("unexpected HTTP {} for {}", s.as_u16(), subject)),
    }
}

#[async_trait]
impl QuoteProvider for HttpQuoteProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    async fn fetch_quotes(&self) -> Result<QuoteSet, MarketDataError> {
        let wire: Vec<WireQuote> = self
            .get_json(&self.quotes_url(), Endpoint::Quotes, "quotes")
            .await?;

        let fetched_at = Utc::now();
        let quotes = wire
            .into_iter()
            .map(|quote| quote.into_quote(fetched_at))
            .collect::<Result<Vec<Quote>, _>>()?;

        debug!("{}: received {} quote(s)", PROVIDER_ID, quotes.len());
        QuoteSet::from_quotes(quotes)
    }

    async fn fetch_series(&self, symbol: &Symbol) -> Result<RawSeries, MarketDataError> {
        let wire: Vec<WirePoint> = self
            .get_json(&self.series_url(symbol), Endpoint::Series, symbol.as_str())
            .await?;

        debug!(
            "{}: received {} series point(s) for {}",
            PROVIDER_ID,
            wire.len(),
            symbol
        );
        Ok(RawSeries {
            symbol: symbol.clone(),
            points: wire.into_iter().map(RawSeriesPoint::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let provider = HttpQuoteProvider::new(" http://localhost:8080/ ", DEFAULT_FETCH_TIMEOUT)
            .unwrap();
        assert_eq!(provider.base_url(), "http://localhost:8080");
        assert_eq!(provider.quotes_url(), "http://localhost:8080/quotes");
    }

    #[test]
    fn test_series_symbol_is_url_encoded() {
        let provider = HttpQuoteProvider::with_default_timeout("http://localhost:8080").unwrap();
        assert_eq!(
            provider.series_url(&Symbol::new("brk/b")),
            "http://localhost:8080/series/BRK%2FB"
        );
        assert_eq!(
            provider.series_url(&Symbol::new("^gspc")),
            "http://localhost:8080/series/%5EGSPC"
        );
    }

    #[test]
    fn test_invalid_construction() {
        assert!(matches!(
            HttpQuoteProvider::new("  ", DEFAULT_FETCH_TIMEOUT),
            Err(MarketDataError::InvalidConfig(_))
        ));
        assert!(matches!(
            HttpQuoteProvider::new("http://localhost", Duration::ZERO),
            Err(MarketDataError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_status_mapping() {
        let timeout = DEFAULT_FETCH_TIMEOUT;
        let map = |status, endpoint, subject| map_status(status, endpoint, subject, timeout);

        assert_eq!(
            map(StatusCode::NOT_FOUND, Endpoint::Series, "ZZZZ"),
            MarketDataError::NotFound("ZZZZ".to_string())
        );
        assert!(matches!(
            map(StatusCode::NOT_FOUND, Endpoint::Quotes, "quotes"),
            MarketDataError::BadResponse(_)
        ));
        assert_eq!(
            map(StatusCode::GATEWAY_TIMEOUT, Endpoint::Quotes, "quotes"),
            MarketDataError::Timeout(timeout)
        );
        assert!(matches!(
            map(StatusCode::TOO_MANY_REQUESTS, Endpoint::Quotes, "quotes"),
            MarketDataError::Network(_)
        ));
        assert!(matches!(
            map(StatusCode::BAD_GATEWAY, Endpoint::Series, "SPY"),
            MarketDataError::Network(_)
        ));
        assert!(matches!(
            map(StatusCode::UNAUTHORIZED, Endpoint::Quotes, "quotes"),
            MarketDataError::BadResponse(_)
        ));
    }
}
