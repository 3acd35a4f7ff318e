//! Field parsers shared by ingest and store validation.

use chrono::{NaiveDate, NaiveDateTime};

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%m-%d-%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d %b %Y",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a statement date in any of the common bank export formats.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
            return Some(date);
        }
    }

    // Timestamps, with or without a trailing zone designator
    let without_zone = value.trim_end_matches('Z');
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(without_zone, fmt) {
            return Some(dt.date());
        }
    }

    None
}

/// Parse a signed currency amount.
///
/// Accepts `$`, thousands separators, a leading `+`/`-`, a trailing `-`
/// and accounting parentheses (`(4.50)` is negative).
pub fn parse_amount(raw: &str) -> Option<f64> {
    let mut value = raw.trim();
    if value.is_empty() {
        return None;
    }

    let mut negative = false;

    if value.starts_with('(') && value.ends_with(')') {
        negative = true;
        value = &value[1..value.len() - 1];
    }
    if let Some(rest) = value.strip_suffix('-') {
        negative = !negative;
        value = rest;
    }

    let cleaned: String = value
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ',' | ' '))
        .collect();

    let (sign_negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }

    let parsed: f64 = digits.parse().ok()?;
    if !parsed.is_finite() {
        return None;
    }

    if negative ^ sign_negative {
        Some(-parsed)
    } else {
        Some(parsed)
    }
}
