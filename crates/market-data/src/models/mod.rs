//! Market data models
//!
//! This module contains the core data types handled by the engine:
//! - `types` - Ticker symbol newtype (Symbol)
//! - `quote` - Universe quotes (Quote, QuoteSet)
//! - `series` - Time series before and after shaping (RawSeries, Series, SeriesPoint)

mod quote;
mod series;
mod types;

pub use quote::{Quote, QuoteSet};
pub use series::{RawSeries, RawSeriesPoint, Series, SeriesPoint};
pub use types::Symbol;
