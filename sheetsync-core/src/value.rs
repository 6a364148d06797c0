//! Column values as they travel between the two stores.
//!
//! Spreadsheet cells are always text; the empty string is the canonical
//! "no value" and maps to SQL `NULL` in the other direction.

use serde::Serialize;
use std::collections::HashMap;

/// A single column value read from the relational store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

/// One relational row, keyed by column name.
pub type Row = HashMap<String, Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Renders the value as cell text. `NULL` becomes the empty string.
    pub fn to_cell_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Integer(v) => v.to_string(),
            Value::Real(v) => v.to_string(),
            Value::Text(s) => s.clone(),
        }
    }

    /// Parses cell text back into a value. Blank cells become `NULL`.
    pub fn from_cell_text(text: &str) -> Self {
        if text.trim().is_empty() {
            Value::Null
        } else {
            Value::Text(text.to_string())
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

/// Renders an amount stored in minor units (cents) as a major-unit decimal.
///
/// Integers are formatted exactly so repeated runs produce identical text.
pub fn format_minor_units(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(v) => format_cents(*v),
        Value::Real(v) => format!("{:.2}", v / 100.0),
        Value::Text(s) => match s.trim().parse::<i64>() {
            Ok(v) => format_cents(v),
            Err(_) => s.clone(),
        },
    }
}

fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Parses a major-unit decimal back into minor units.
///
/// Digits past the second decimal place round half away from zero. Amounts
/// that do not fit an `i64` are rejected.
pub fn parse_minor_units(text: &str) -> Option<i64> {
    let normalized = text.trim().replace(',', ".");
    let (negative, unsigned) = match normalized.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, normalized.strip_prefix('+').unwrap_or(normalized.as_str())),
    };
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let units: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let digit = |i: usize| fraction.as_bytes().get(i).map_or(0, |d| i64::from(d - b'0'));
    let mut cents = digit(0) * 10 + digit(1);
    if digit(2) >= 5 {
        cents += 1;
    }
    let total = units.checked_mul(100)?.checked_add(cents)?;
    Some(if negative { -total } else { total })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_renders_as_empty_string() {
        assert_eq!(Value::Null.to_cell_text(), "");
        assert_ne!(Value::Null.to_cell_text(), "None");
    }

    #[test]
    fn test_cell_text_round_trip() {
        assert_eq!(Value::from_cell_text("  "), Value::Null);
        assert_eq!(Value::from_cell_text("abc"), Value::Text("abc".into()));
        assert_eq!(Value::Integer(42).to_cell_text(), "42");
    }

    #[test]
    fn test_format_minor_units() {
        assert_eq!(format_minor_units(&Value::Integer(12345)), "123.45");
        assert_eq!(format_minor_units(&Value::Integer(5)), "0.05");
        assert_eq!(format_minor_units(&Value::Integer(-250)), "-2.50");
        assert_eq!(format_minor_units(&Value::Text("1000".into())), "10.00");
        assert_eq!(format_minor_units(&Value::Null), "");
    }

    #[test]
    fn test_parse_minor_units() {
        assert_eq!(parse_minor_units("123.45"), Some(12345));
        assert_eq!(parse_minor_units("10"), Some(1000));
        assert_eq!(parse_minor_units("0,5"), Some(50));
        assert_eq!(parse_minor_units(""), None);
        assert_eq!(parse_minor_units("n/a"), None);
        assert_eq!(parse_minor_units("-0.5"), Some(-50));
        assert_eq!(parse_minor_units("1.005"), Some(101));
        assert_eq!(parse_minor_units(".25"), Some(25));
        assert_eq!(parse_minor_units("-"), None);
        assert_eq!(parse_minor_units("1e3"), None);
    }

    #[test]
    fn test_parse_minor_units_keeps_large_amounts_exact() {
        // above 2^53 minor units
        assert_eq!(parse_minor_units("90071992547409.93"), Some(9_007_199_254_740_993));
        assert_eq!(parse_minor_units("92233720368547758.07"), Some(i64::MAX));
        assert_eq!(parse_minor_units("92233720368547758.08"), None);
        assert_eq!(parse_minor_units("99999999999999999999"), None);
    }
}
