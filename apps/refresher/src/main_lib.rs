use std::sync::Arc;

use marketboard_market_data::format::{format_change, format_date, format_percent, format_usd};
use marketboard_market_data::{
    CacheEntry, CacheKey, DataService, HttpQuoteProvider, Payload, QuoteProvider, Subscription,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

pub fn init_tracing() {
    let log_format = std::env::var("MB_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

pub fn build_service(config: &Config) -> anyhow::Result<DataService> {
    let provider = HttpQuoteProvider::new(&config.provider_url, config.engine.fetch_timeout)?;
    match config.engine.rate_limit_per_minute {
        Some(limit) => tracing::info!(
            "Polling {} ({}), at most {} requests/min",
            provider.base_url(),
            provider.id(),
            limit
        ),
        None => tracing::info!("Polling {} ({})", provider.base_url(), provider.id()),
    }

    let provider: Arc<dyn QuoteProvider> = Arc::new(provider);
    Ok(DataService::new(provider, config.engine.clone())?)
}

/// Log every write to the quote set and to each watched series.
pub fn watch(service: &DataService, config: &Config) -> Vec<Subscription> {
    let mut keys = vec![CacheKey::AllQuotes];
    keys.extend(config.watch_symbols.iter().cloned().map(CacheKey::SeriesOf));

    keys.into_iter()
        .map(|key| service.subscribe(key, log_change))
        .collect()
}

fn log_change(key: &CacheKey, entry: &CacheEntry<Payload>) {
    if let Some(error) = &entry.last_error {
        tracing::warn!("{} is {}: {}", key, entry.status, error);
        return;
    }

    match &entry.value {
        Some(Payload::Quotes(quotes)) => {
            tracing::info!("{} updated with {} quotes", key, quotes.len());
            for quote in quotes.iter() {
                tracing::debug!(
                    "{:<8} {:>14} {:>10} {:>9}",
                    quote.symbol,
                    format_usd(quote.price),
                    format_change(quote.change),
                    format_percent(quote.change_percent)
                );
            }
        }
        Some(Payload::Series(series)) => match (series.first(), series.latest()) {
            (Some(first), Some(latest)) => tracing::info!(
                "{} updated: {} points {}..{}, last {} ({})",
                key,
                series.len(),
                format_date(first.date),
                format_date(latest.date),
                format_usd(latest.close),
                series
                    .period_change_percent()
                    .map(format_percent)
                    .unwrap_or_else(|| "n/a".to_string())
            ),
            _ => tracing::info!("{} updated with an empty series", key),
        },
        None => tracing::info!("{} is {}", key, entry.status),
    }
}

/// Keep the watched series warm: each pass reads through the service, which
/// re-fetches stale entries and honors backoff.
pub async fn poll_watched(service: Arc<DataService>, config: Arc<Config>) {
    let mut interval = tokio::time::interval(config.engine.series_staleness);
    loop {
        interval.tick().await;
        if service.scheduler().is_shut_down() {
            break;
        }
        for symbol in &config.watch_symbols {
            if let Err(e) = service.get_series(symbol.clone()).await {
                tracing::warn!("Series {} unavailable: {}", symbol, e);
            }
        }
    }
}
