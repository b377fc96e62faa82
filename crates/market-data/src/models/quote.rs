use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::Symbol;
use crate::errors::{MarketDataError, Result};

/// Market data quote for one symbol of the polled universe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Ticker symbol (unique within a [`QuoteSet`])
    pub symbol: Symbol,

    /// Display name (e.g. the sector an ETF tracks), when the provider sends one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Last traded price
    pub price: Decimal,

    /// Absolute change versus previous close
    pub change: Decimal,

    /// Relative change versus previous close, in percent
    pub change_percent: Decimal,

    /// When the quote was received from the provider
    pub fetched_at: DateTime<Utc>,
}

impl Quote {
    /// Create a new quote without a display name
    pub fn new(
        symbol: impl Into<Symbol>,
        price: Decimal,
        change: Decimal,
        change_percent: Decimal,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            name: None,
            price,
            change,
            change_percent,
            fetched_at,
        }
    }

    /// Attach a display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether `change` and `change_percent` agree in sign (or are both zero).
    pub fn has_consistent_sign(&self) -> bool {
        sign(self.change) == sign(self.change_percent)
    }
}

fn sign(value: Decimal) -> i8 {
    if value.is_zero() {
        0
    } else if value.is_sign_negative() {
        -1
    } else {
        1
    }
}

/// Ordered collection of quotes, one per distinct symbol.
///
/// Iteration order is the provider's response order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct QuoteSet {
    quotes: Vec<Quote>,
    #[serde(skip)]
    index: HashMap<Symbol, usize>,
}

impl QuoteSet {
    /// Build a set from provider-ordered quotes.
    ///
    /// A repeated symbol makes the whole payload invalid.
    pub fn from_quotes(quotes: Vec<Quote>) -> Result<Self> {
        let mut index = HashMap::with_capacity(quotes.len());
        for (position, quote) in quotes.iter().enumerate() {
            if index.insert(quote.symbol.clone(), position).is_some() {
                return Err(MarketDataError::BadResponse(format!(
                    "duplicate symbol in quote list: {}",
                    quote.symbol
                )));
            }
        }
        Ok(Self { quotes, index })
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&Quote> {
        self.index.get(symbol).map(|&position| &self.quotes[position])
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.index.contains_key(symbol)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Quote> {
        self.quotes.iter()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.quotes.iter().map(|quote| &quote.symbol)
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Quotes in provider order.
    pub fn as_slice(&self) -> &[Quote] {
        &self.quotes
    }
}

impl<'a> IntoIterator for &'a QuoteSet {
    type Item = &'a Quote;
    type IntoIter = std::slice::Iter<'a, Quote>;

    fn into_iter(self) -> Self::IntoIter {
        self.quotes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn quote(symbol: &str, change: Decimal, change_percent: Decimal) -> Quote {
        Quote::new(symbol, dec!(100), change, change_percent, Utc::now())
    }

    #[test]
    fn test_sign_consistency() {
        assert!(quote("SPY", dec!(1.25), dec!(0.5)).has_consistent_sign());
        assert!(quote("SPY", dec!(-1.25), dec!(-0.5)).has_consistent_sign());
        assert!(quote("SPY", dec!(0), dec!(0.00)).has_consistent_sign());
        assert!(!quote("SPY", dec!(1.25), dec!(-0.5)).has_consistent_sign());
        assert!(!quote("SPY", dec!(0), dec!(0.1)).has_consistent_sign());
    }

    #[test]
    fn test_quote_set_keeps_provider_order() {
        let set = QuoteSet::from_quotes(vec![
            quote("XLK", dec!(1), dec!(1)),
            quote("SPY", dec!(1), dec!(1)),
            quote("AGG", dec!(1), dec!(1)),
        ])
        .unwrap();

        let symbols: Vec<&str> = set.symbols().map(Symbol::as_str).collect();
        assert_eq!(symbols, vec!["XLK", "SPY", "AGG"]);
        assert_eq!(set.len(), 3);
        assert_eq!(set.get(&Symbol::new("spy")).unwrap().symbol.as_str(), "SPY");
        assert!(!set.contains(&Symbol::new("QQQ")));
    }

    #[test]
    fn test_quote_set_rejects_duplicate_symbols() {
        let result = QuoteSet::from_quotes(vec![
            quote("SPY", dec!(1), dec!(1)),
            quote("spy", dec!(2), dec!(2)),
        ]);
        assert!(matches!(result, Err(MarketDataError::BadResponse(_))));
    }

    #[test]
    fn test_quote_serializes_camel_case() {
        let quote = quote("QQQ", dec!(-2.5), dec!(-0.61)).with_name("Nasdaq 100");
        let json = serde_json::to_value(&quote).unwrap();
        assert_eq!(json["symbol"], "QQQ");
        assert_eq!(json["name"], "Nasdaq 100");
        assert!(json.get("changePercent").is_some());
        assert!(json.get("fetchedAt").is_some());
    }
}
