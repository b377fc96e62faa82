//! Wire models for the upstream HTTP API.
//!
//! ```text
//! GET /quotes          -> [{symbol, price, change, changePercent, name?}]
//! GET /series/{symbol} -> [{date, close}]
//! ```

use std::str::FromStr;

use chrono::{DateTime, Utc};
use num_traits::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::errors::MarketDataError;
use crate::models::{Quote, RawSeriesPoint};

/// A numeric field sent either as a JSON number or as text (`"1.25"`, `"0.54%"`).
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub(crate) enum WireNumber {
    Number(f64),
    Text(String),
}

impl WireNumber {
    /// Exact decimal value; `field` names the field in error messages.
    pub(crate) fn to_decimal(&self, field: &str) -> Result<Decimal, MarketDataError> {
        match self {
            Self::Number(value) => Decimal::from_f64(*value)
                .map(|decimal| decimal.normalize())
                .ok_or_else(|| {
                    MarketDataError::BadResponse(format!("{} out of range: {}", field, value))
                }),
            Self::Text(text) => {
                let trimmed = strip_number_text(text);
                Decimal::from_str(trimmed)
                    .or_else(|_| Decimal::from_scientific(trimmed))
                    .map(|decimal| decimal.normalize())
                    .map_err(|_| {
                        MarketDataError::BadResponse(format!("{} is not a number: {:?}", field, text))
                    })
            }
        }
    }

    /// Floating value; unparsable text becomes NaN.
    pub(crate) fn to_f64(&self) -> f64 {
        match self {
            Self::Number(value) => *value,
            Self::Text(text) => strip_number_text(text).parse().unwrap_or(f64::NAN),
        }
    }
}

fn strip_number_text(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed.strip_suffix('%').unwrap_or(trimmed).trim_end()
}

/// One element of the `/quotes` response.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireQuote {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    pub price: WireNumber,
    pub change: WireNumber,
    pub change_percent: WireNumber,
}

impl WireQuote {
    pub(crate) fn into_quote(self, fetched_at: DateTime<Utc>) -> Result<Quote, MarketDataError> {
        if self.symbol.trim().is_empty() {
            return Err(MarketDataError::BadResponse(
                "quote with an empty symbol".to_string(),
            ));
        }

        let price = self.price.to_decimal("price")?;
        let change = self.change.to_decimal("change")?;
        let change_percent = self.change_percent.to_decimal("changePercent")?;

        let quote = Quote::new(self.symbol, price, change, change_percent, fetched_at);
        Ok(match self.name.filter(|name| !name.trim().is_empty()) {
            Some(name) => quote.with_name(name),
            None => quote,
        })
    }
}

/// One element of the `/series/{symbol}` response.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct WirePoint {
    pub date: String,
    pub close: WireNumber,
}

impl From<WirePoint> for RawSeriesPoint {
    fn from(point: WirePoint) -> Self {
        RawSeriesPoint::new(point.date, point.close.to_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_numbers_and_numeric_text() {
        let json = r#"[
            {"symbol": "spy", "price": 512.34, "change": "-1.20", "changePercent": "-0.2337%"},
            {"symbol": "XLK", "name": "Technology", "price": "210.5", "change": 0, "changePercent": 0}
        ]"#;
        let wire: Vec<WireQuote> = serde_json::from_str(json).unwrap();
        let now = Utc::now();

        let spy = wire[0].clone().into_quote(now).unwrap();
        assert_eq!(spy.symbol.as_str(), "SPY");
        assert_eq!(spy.price, dec!(512.34));
        assert_eq!(spy.change, dec!(-1.2));
        assert_eq!(spy.change_percent, dec!(-0.2337));
        assert_eq!(spy.name, None);

        let xlk = wire[1].clone().into_quote(now).unwrap();
        assert_eq!(xlk.name.as_deref(), Some("Technology"));
        assert_eq!(xlk.price, dec!(210.5));
    }

    #[test]
    fn test_non_numeric_text_is_bad_response() {
        let number = WireNumber::Text("n/a".to_string());
        assert!(matches!(
            number.to_decimal("price"),
            Err(MarketDataError::BadResponse(_))
        ));
    }

    #[test]
    fn test_missing_field_fails_to_parse() {
        let json = r#"[{"symbol": "SPY", "price": 1, "change": 1}]"#;
        assert!(serde_json::from_str::<Vec<WireQuote>>(json).is_err());
    }

    #[test]
    fn test_series_close_text() {
        let json = r#"[{"date": "2024-01-02", "close": "101.5"}, {"date": "2024-01-03", "close": "-"}]"#;
        let points: Vec<RawSeriesPoint> = serde_json::from_str::<Vec<WirePoint>>(json)
            .unwrap()
            .into_iter()
            .map(RawSeriesPoint::from)
            .collect();

        assert_eq!(points[0], RawSeriesPoint::new("2024-01-02", 101.5));
        assert!(points[1].close.is_nan());
    }
}
