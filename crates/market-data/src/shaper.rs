//! Series shaping: raw provider points to chart-ready series.
//!
//! Rules, applied in order:
//! - drop points with a non-finite or negative close, or one outside the
//!   range a `Decimal` can hold (above ~7.9e28, or positive below 1e-28)
//! - drop points whose date cannot be read as a calendar day
//! - keep the last occurrence of each date (providers emit same-day revisions)
//! - sort ascending by date
//! - fewer than two remaining points is [`MarketDataError::InsufficientData`]

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::warn;
use num_traits::FromPrimitive;
use rust_decimal::Decimal;

use crate::errors::{MarketDataError, Result};
use crate::models::{RawSeries, RawSeriesPoint, Series, SeriesPoint, Symbol};

/// Minimum number of points a chartable series must have.
pub const MIN_SERIES_POINTS: usize = 2;

/// Shape a raw provider response into a [`Series`].
pub fn shape(raw: RawSeries, fetched_at: DateTime<Utc>) -> Result<Series> {
    let points = shape_points(&raw.symbol, &raw.points)?;
    Ok(Series {
        symbol: raw.symbol,
        points,
        fetched_at,
    })
}

/// Shape raw points for `symbol` into ordered, de-duplicated chart points.
pub fn shape_points(symbol: &Symbol, raw: &[RawSeriesPoint]) -> Result<Vec<SeriesPoint>> {
    let mut by_date: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();

    for point in raw {
        let close = match normalize_close(point.close) {
            Ok(close) => close,
            Err(reason) => {
                warn!(
                    "Dropping point {} for {}: {} close {}",
                    point.date, symbol, reason, point.close
                );
                continue;
            }
        };
        let Some(date) = parse_day(&point.date) else {
            warn!("Dropping point for {}: unparsable date '{}'", symbol, point.date);
            continue;
        };
        // Later occurrences overwrite earlier ones
        by_date.insert(date, close);
    }

    if by_date.len() < MIN_SERIES_POINTS {
        return Err(MarketDataError::InsufficientData {
            symbol: symbol.to_string(),
            points: by_date.len(),
        });
    }

    Ok(by_date
        .into_iter()
        .map(|(date, close)| SeriesPoint::new(date, close))
        .collect())
}

/// Convert a raw close into a fixed-point decimal. The error names why the
/// close is unusable.
fn normalize_close(close: f64) -> std::result::Result<Decimal, &'static str> {
    if !close.is_finite() {
        return Err("non-finite");
    }
    if close < 0.0 {
        return Err("negative");
    }
    match Decimal::from_f64(close) {
        Some(decimal) if decimal.is_zero() && close > 0.0 => Err("out-of-range"),
        Some(decimal) => Ok(decimal.normalize()),
        None => Err("out-of-range"),
    }
}

/// Read a provider date as a calendar day. Time components are discarded.
pub(crate) fn parse_day(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(text) {
        return Some(timestamp.with_timezone(&Utc).date_naive());
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|timestamp| timestamp.date())
}
