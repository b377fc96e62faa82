use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::Symbol;

/// Series point exactly as the provider sent it, before shaping.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSeriesPoint {
    /// Provider date text (`2024-01-02`, or a timestamp)
    pub date: String,

    /// Close value; may be non-finite or negative
    pub close: f64,
}

impl RawSeriesPoint {
    pub fn new(date: impl Into<String>, close: f64) -> Self {
        Self {
            date: date.into(),
            close,
        }
    }
}

/// Unshaped provider response for one symbol.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSeries {
    pub symbol: Symbol,
    pub points: Vec<RawSeriesPoint>,
}

/// Chart-ready daily close.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Calendar day, no time component
    pub date: NaiveDate,

    /// Close value (positive expected, not enforced)
    pub close: Decimal,
}

impl SeriesPoint {
    pub fn new(date: NaiveDate, close: Decimal) -> Self {
        Self { date, close }
    }
}

/// Chart-ready series for one symbol, ascending by date with unique dates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    pub symbol: Symbol,
    pub points: Vec<SeriesPoint>,
    pub fetched_at: DateTime<Utc>,
}

impl Series {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&SeriesPoint> {
        self.points.first()
    }

    /// Most recent point.
    pub fn latest(&self) -> Option<&SeriesPoint> {
        self.points.last()
    }

    /// Lowest and highest close, for axis scaling.
    pub fn close_range(&self) -> Option<(Decimal, Decimal)> {
        let mut closes = self.points.iter().map(|point| point.close);
        let first = closes.next()?;
        Some(closes.fold((first, first), |(low, high), close| {
            (low.min(close), high.max(close))
        }))
    }

    /// Change from the first to the latest close.
    pub fn period_change(&self) -> Option<Decimal> {
        self.latest()?.close.checked_sub(self.first()?.close)
    }

    /// Change from the first to the latest close, in percent.
    ///
    /// `None` when the first close is zero or the result does not fit a
    /// `Decimal`.
    pub fn period_change_percent(&self) -> Option<Decimal> {
        let first = self.first()?.close;
        if first.is_zero() {
            return None;
        }
        self.period_change()?
            .checked_div(first)?
            .checked_mul(Decimal::ONE_HUNDRED)
    }
}
