//! Engine configuration.

use std::time::Duration;

use crate::errors::{MarketDataError, Result};

/// Default cadence of the full-universe refresh.
pub const DEFAULT_FULL_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Default age after which a cached series is re-fetched on demand.
pub const DEFAULT_SERIES_STALENESS: Duration = Duration::from_secs(60);

/// Default per-call upstream timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default ceiling on the exponential backoff, as a multiple of the base interval.
pub const DEFAULT_BACKOFF_CAP_MULTIPLIER: u32 = 8;

/// Refresh and cache configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Cadence of the full-universe refresh.
    pub full_refresh_interval: Duration,

    /// Freshness threshold before a series is re-fetched.
    pub series_staleness: Duration,

    /// Per-call upstream timeout.
    pub fetch_timeout: Duration,

    /// Ceiling on the exponential backoff.
    pub backoff_cap_multiplier: u32,

    /// Optional upstream request budget. `None` disables rate limiting.
    pub rate_limit_per_minute: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            full_refresh_interval: DEFAULT_FULL_REFRESH_INTERVAL,
            series_staleness: DEFAULT_SERIES_STALENESS,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            backoff_cap_multiplier: DEFAULT_BACKOFF_CAP_MULTIPLIER,
            rate_limit_per_minute: None,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from whole-second values.
    pub fn from_secs(
        full_refresh_interval_secs: u64,
        series_staleness_secs: u64,
        fetch_timeout_secs: u64,
        backoff_cap_multiplier: u32,
    ) -> Result<Self> {
        let config = Self {
            full_refresh_interval: Duration::from_secs(full_refresh_interval_secs),
            series_staleness: Duration::from_secs(series_staleness_secs),
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            backoff_cap_multiplier,
            rate_limit_per_minute: None,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.rate_limit_per_minute = Some(requests_per_minute);
        self
    }

    /// Reject values outside their valid ranges.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("full_refresh_interval", self.full_refresh_interval),
            ("series_staleness", self.series_staleness),
            ("fetch_timeout", self.fetch_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(MarketDataError::InvalidConfig(format!(
                    "{} must be positive",
                    name
                )));
            }
        }

        if self.backoff_cap_multiplier == 0 {
            return Err(MarketDataError::InvalidConfig(
                "backoff_cap_multiplier must be at least 1".to_string(),
            ));
        }

        if self.rate_limit_per_minute == Some(0) {
            return Err(MarketDataError::InvalidConfig(
                "rate_limit_per_minute must be at least 1 when set".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.full_refresh_interval, Duration::from_secs(300));
        assert_eq!(config.series_staleness, Duration::from_secs(60));
        assert_eq!(config.fetch_timeout, Duration::from_secs(10));
        assert_eq!(config.backoff_cap_multiplier, 8);
        assert!(config.rate_limit_per_minute.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_secs_rejects_zero_interval() {
        let result = EngineConfig::from_secs(0, 60, 10, 8);
        assert!(matches!(result, Err(MarketDataError::InvalidConfig(_))));

        let result = EngineConfig::from_secs(300, 0, 10, 8);
        assert!(matches!(result, Err(MarketDataError::InvalidConfig(_))));

        let result = EngineConfig::from_secs(300, 60, 0, 8);
        assert!(matches!(result, Err(MarketDataError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_zero_backoff_cap() {
        let result = EngineConfig::from_secs(300, 60, 10, 0);
        assert!(matches!(result, Err(MarketDataError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_zero_rate_limit() {
        let config = EngineConfig::default().with_rate_limit(0);
        assert!(config.validate().is_err());
        assert!(EngineConfig::default().with_rate_limit(30).validate().is_ok());
    }
}
