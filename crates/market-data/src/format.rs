//! Display formatting for dashboard tables and chart tooltips.
//!
//! All helpers are locale-independent: `,` groups thousands, `.` separates
//! decimals, and midpoints round away from zero.

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};

/// `1234.5` -> `"1,234.50"`.
pub fn format_decimal(value: Decimal) -> String {
    let rounded = round2(value);
    let body = group_thousands(&format!("{:.2}", rounded.abs()));
    if rounded.is_sign_negative() && !rounded.is_zero() {
        format!("-{}", body)
    } else {
        body
    }
}

/// `1234.5` -> `"$1,234.50"`, `-3` -> `"-$3.00"`.
pub fn format_usd(value: Decimal) -> String {
    let formatted = format_decimal(value);
    match formatted.strip_prefix('-') {
        Some(magnitude) => format!("-${}", magnitude),
        None => format!("${}", formatted),
    }
}

/// Signed absolute change: `"+1.20"`, `"-0.35"`, `"0.00"`.
pub fn format_change(change: Decimal) -> String {
    with_sign(change, format_decimal(change))
}

/// Signed percentage of a value already in percent: `0.5432` -> `"+0.54%"`.
pub fn format_percent(change_percent: Decimal) -> String {
    format!("{}%", with_sign(change_percent, format_decimal(change_percent)))
}

/// ISO-8601 calendar date.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn with_sign(value: Decimal, formatted: String) -> String {
    if round2(value) > Decimal::ZERO {
        format!("+{}", formatted)
    } else {
        formatted
    }
}

/// Insert `,` every three digits of the integer part of an unsigned decimal.
fn group_thousands(digits: &str) -> String {
    let (integer, fraction) = match digits.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (digits, None),
    };

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, ch) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    match fraction {
        Some(fraction) => format!("{}.{}", grouped, fraction),
        None => grouped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(dec!(0)), "0.00");
        assert_eq!(format_decimal(dec!(512.345)), "512.35");
        assert_eq!(format_decimal(dec!(1234.5)), "1,234.50");
        assert_eq!(format_decimal(dec!(1234567.891)), "1,234,567.89");
        assert_eq!(format_decimal(dec!(-98765.4321)), "-98,765.43");
        assert_eq!(format_decimal(dec!(-0.001)), "0.00");
    }

    #[test]
    fn test_format_usd() {
        assert_eq!(format_usd(dec!(4512.3)), "$4,512.30");
        assert_eq!(format_usd(dec!(-3)), "-$3.00");
    }

    #[test]
    fn test_signed_change_and_percent() {
        assert_eq!(format_change(dec!(1.2)), "+1.20");
        assert_eq!(format_change(dec!(-0.35)), "-0.35");
        assert_eq!(format_change(dec!(0)), "0.00");
        assert_eq!(format_percent(dec!(0.5432)), "+0.54%");
        assert_eq!(format_percent(dec!(-1.005)), "-1.01%");
    }

    #[test]
    fn test_format_date() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(format_date(date), "2024-01-02");
    }
}
