use std::time::Duration;

use anyhow::{bail, Context};
use marketboard_market_data::config::{
    DEFAULT_BACKOFF_CAP_MULTIPLIER, DEFAULT_FETCH_TIMEOUT, DEFAULT_FULL_REFRESH_INTERVAL,
    DEFAULT_SERIES_STALENESS,
};
use marketboard_market_data::{EngineConfig, Symbol};

pub struct Config {
    pub provider_url: String,
    pub engine: EngineConfig,
    pub watch_symbols: Vec<Symbol>,
}

impl Config {
    /// Read the process environment, honoring a `.env` file.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let provider_url = lookup("MB_PROVIDER_URL")
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| "http://localhost:8080".into());

        let full_refresh_interval = secs(
            &lookup,
            "MB_FULL_REFRESH_INTERVAL_SECS",
            DEFAULT_FULL_REFRESH_INTERVAL,
        )?;
        let series_staleness = secs(&lookup, "MB_SERIES_STALENESS_SECS", DEFAULT_SERIES_STALENESS)?;
        let fetch_timeout = secs(&lookup, "MB_FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT)?;
        let backoff_cap_multiplier = number(&lookup, "MB_BACKOFF_CAP_MULTIPLIER")?
            .unwrap_or(DEFAULT_BACKOFF_CAP_MULTIPLIER);
        let rate_limit_per_minute = number(&lookup, "MB_RATE_LIMIT_PER_MINUTE")?;

        let engine = EngineConfig {
            full_refresh_interval,
            series_staleness,
            fetch_timeout,
            backoff_cap_multiplier,
            rate_limit_per_minute,
        };
        engine.validate().context("Invalid engine configuration")?;

        let watch_symbols = lookup("MB_WATCH_SYMBOLS")
            .unwrap_or_default()
            .split(',')
            .map(Symbol::new)
            .filter(|symbol| !symbol.is_empty())
            .collect();

        Ok(Self {
            provider_url,
            engine,
            watch_symbols,
        })
    }
}

fn number(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> anyhow::Result<Option<u32>> {
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid {}: {:?}", name, raw)),
        _ => Ok(None),
    }
}

fn secs(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> anyhow::Result<Duration> {
    let Some(raw) = lookup(name).filter(|raw| !raw.trim().is_empty()) else {
        return Ok(default);
    };
    let secs: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("Invalid {}: {:?}", name, raw))?;
    if secs == 0 {
        bail!("{} must be greater than zero", name);
    }
    Ok(Duration::from_secs(secs))
}
