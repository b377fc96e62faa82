//! Quote payload validation.
//!
//! Runs on every quote set before it reaches the cache:
//! - Non-negative prices
//! - `change` and `change_percent` agree in sign
//! - Prices within a sanity ceiling
//!
//! Hard issues reject the whole payload; soft issues are logged.

use log::warn;
use rust_decimal::Decimal;

use crate::errors::MarketDataError;
use crate::models::{Quote, QuoteSet};

/// Validation severity levels.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationSeverity {
    /// Reject the payload.
    Hard,
    /// Accept but log.
    Soft,
}

#[derive(Clone, Debug)]
struct ValidationIssue {
    severity: ValidationSeverity,
    message: String,
}

/// Quote validator configuration.
#[derive(Clone, Debug)]
pub struct ValidatorConfig {
    /// Whether to reject quotes with negative prices.
    pub reject_negative_prices: bool,
    /// Whether to reject quotes whose change and change percent disagree in sign.
    pub reject_sign_mismatch: bool,
    /// Prices above this are rejected.
    pub max_price: Option<Decimal>,
    /// Whether to warn on a zero price.
    pub warn_on_zero_price: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            reject_negative_prices: true,
            reject_sign_mismatch: true,
            max_price: Some(Decimal::from(1_000_000_000i64)),
            warn_on_zero_price: true,
        }
    }
}

/// Quote data validator.
#[derive(Clone, Debug, Default)]
pub struct QuoteValidator {
    config: ValidatorConfig,
}

impl QuoteValidator {
    /// Create a new validator with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a validator with custom configuration.
    pub fn with_config(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate a single quote.
    pub fn validate(&self, quote: &Quote) -> Result<(), MarketDataError> {
        let mut issues = Vec::new();

        self.validate_price(quote, &mut issues);
        self.validate_change_sign(quote, &mut issues);

        let errors: Vec<&str> = issues
            .iter()
            .filter(|issue| issue.severity == ValidationSeverity::Hard)
            .map(|issue| issue.message.as_str())
            .collect();

        if !errors.is_empty() {
            return Err(MarketDataError::BadResponse(format!(
                "invalid quote for {}: {}",
                quote.symbol,
                errors.join("; ")
            )));
        }

        for issue in issues
            .iter()
            .filter(|issue| issue.severity == ValidationSeverity::Soft)
        {
            warn!("Quote validation warning for {}: {}", quote.symbol, issue.message);
        }

        Ok(())
    }

    /// Validate every quote of a set. The first invalid quote rejects the set.
    pub fn validate_set(&self, quotes: &QuoteSet) -> Result<(), MarketDataError> {
        if quotes.is_empty() {
            warn!("Quote validation warning: provider returned an empty quote set");
        }
        quotes.iter().try_for_each(|quote| self.validate(quote))
    }

    fn validate_price(&self, quote: &Quote, issues: &mut Vec<ValidationIssue>) {
        if self.config.reject_negative_prices && quote.price < Decimal::ZERO {
            issues.push(ValidationIssue {
                severity: ValidationSeverity::Hard,
                message: format!("negative price {}", quote.price),
            });
        }

        if self.config.warn_on_zero_price && quote.price.is_zero() {
            issues.push(ValidationIssue {
                severity: ValidationSeverity::Soft,
                message: "zero price".to_string(),
            });
        }

        if let Some(max_price) = self.config.max_price {
            if quote.price > max_price {
                issues.push(ValidationIssue {
                    severity: ValidationSeverity::Hard,
                    message: format!("price {} exceeds sanity limit {}", quote.price, max_price),
                });
            }
        }
    }

    fn validate_change_sign(&self, quote: &Quote, issues: &mut Vec<ValidationIssue>) {
        if self.config.reject_sign_mismatch && !quote.has_consistent_sign() {
            issues.push(ValidationIssue {
                severity: ValidationSeverity::Hard,
                message: format!(
                    "change {} and change percent {} disagree in sign",
                    quote.change, quote.change_percent
                ),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn make_quote(price: Decimal, change: Decimal, change_percent: Decimal) -> Quote {
        Quote::new("SPY", price, change, change_percent, Utc::now())
    }

    #[test]
    fn test_valid_quote() {
        let validator = QuoteValidator::new();
        assert!(validator
            .validate(&make_quote(dec!(512.34), dec!(-1.20), dec!(-0.23)))
            .is_ok());
        assert!(validator
            .validate(&make_quote(dec!(512.34), dec!(0), dec!(0.00)))
            .is_ok());
    }

    #[test]
    fn test_negative_price_rejected() {
        let result = QuoteValidator::new().validate(&make_quote(dec!(-10), dec!(1), dec!(1)));

        match result {
            Err(MarketDataError::BadResponse(message)) => {
                assert!(message.contains("SPY"));
                assert!(message.contains("negative price"));
            }
            other => panic!("expected BadResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_sign_mismatch_rejected() {
        let validator = QuoteValidator::new();
        assert!(validator
            .validate(&make_quote(dec!(100), dec!(1.5), dec!(-1.5)))
            .is_err());
        assert!(validator
            .validate(&make_quote(dec!(100), dec!(0), dec!(0.4)))
            .is_err());
    }

    #[test]
    fn test_sign_check_can_be_disabled() {
        let validator = QuoteValidator::with_config(ValidatorConfig {
            reject_sign_mismatch: false,
            ..ValidatorConfig::default()
        });
        assert!(validator
            .validate(&make_quote(dec!(100), dec!(1.5), dec!(-1.5)))
            .is_ok());
    }

    #[test]
    fn test_price_above_sanity_limit_rejected() {
        let result =
            QuoteValidator::new().validate(&make_quote(dec!(2000000000), dec!(1), dec!(0.1)));
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_price_is_only_a_warning() {
        assert!(QuoteValidator::new()
            .validate(&make_quote(dec!(0), dec!(0), dec!(0)))
            .is_ok());
    }

    #[test]
    fn test_set_rejected_by_one_bad_quote() {
        let quotes = QuoteSet::from_quotes(vec![
            Quote::new("SPY", dec!(500), dec!(1), dec!(0.2), Utc::now()),
            Quote::new("QQQ", dec!(430), dec!(2), dec!(-0.5), Utc::now()),
        ])
        .unwrap();

        let error = QuoteValidator::new().validate_set(&quotes).unwrap_err();
        assert!(error.to_string().contains("QQQ"));
        assert!(QuoteValidator::new().validate_set(&QuoteSet::default()).is_ok());
    }
}
