// 🧹 Value Layer - Typed cell values + permissive coercion
// Every extract cell passes through here exactly once, on the way
// from raw CSV text to a typed, store-bindable value.

use chrono::NaiveDate;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

// ============================================================================
// FIELD TYPE
// ============================================================================

/// Declared type of a contract column. Drives both coercion and the
/// generated SQLite column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Integer,
    Real,
    Date,
}

impl FieldType {
    /// SQLite column type for target/staging DDL
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Text => "TEXT",
            FieldType::Integer => "INTEGER",
            FieldType::Real => "REAL",
            FieldType::Date => "TEXT",
        }
    }
}

// ============================================================================
// TOLERANCE POLICY
// ============================================================================

/// What to do when a non-empty value fails type coercion.
///
/// The source system silently nulled malformed values, which masks
/// upstream data-quality defects. Both behaviors are kept, but the
/// policy is declared per column instead of being an unstated default,
/// and nulled coercions are counted separately in the run stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tolerance {
    /// Replace the malformed value with null and keep the row
    NullOnError,
    /// Route the whole row to the reject sink with a malformed_<column> reason
    RejectRow,
}

// ============================================================================
// VALUE
// ============================================================================

/// A single normalized cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Textual form used for natural-key and foreign-key comparison.
    /// Returns None for null values (a null can never participate in a key).
    pub fn key_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(f) => Some(f.to_string()),
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Integer(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*f)),
            Value::Date(d) => ToSqlOutput::Owned(rusqlite::types::Value::Text(
                d.format("%Y-%m-%d").to_string(),
            )),
        })
    }
}

// ============================================================================
// KEY NORMALIZATION POLICY
// ============================================================================

/// The one key-normalization policy for the whole pipeline.
///
/// Applied uniformly to natural-key and foreign-key components by the
/// deduplicator, the validator, and (because keys are stored in this
/// form) the merge itself. Key comparison is case-insensitive.
pub fn normalize_key_component(s: &str) -> String {
    s.trim().to_lowercase()
}

// ============================================================================
// PERMISSIVE COERCION
// ============================================================================

/// Trim a raw cell; empty strings (and common null spellings) become None
pub fn clean_str(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("null") || s.eq_ignore_ascii_case("nan") {
        return None;
    }
    Some(s.to_string())
}

/// Parse a decimal, stripping currency symbols and thousands separators.
/// "$1,299.50" → 1299.5. Returns None when nothing numeric remains.
pub fn clean_decimal(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ',' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Parse an integer with the same stripping rules as [`clean_decimal`].
/// Whole-number decimals ("12.0") are accepted; fractional values are not.
pub fn clean_integer(raw: &str) -> Option<i64> {
    let f = clean_decimal(raw)?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Tolerant date parser - tries the formats seen in real extracts
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();

    const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%d-%b-%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }

    // Timestamps: keep the date part
    const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }

    None
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_str_trims_and_nulls() {
        assert_eq!(clean_str("  Ann  "), Some("Ann".to_string()));
        assert_eq!(clean_str(""), None);
        assert_eq!(clean_str("   "), None);
        assert_eq!(clean_str("NULL"), None);
        assert_eq!(clean_str("NaN"), None);
    }

    #[test]
    fn test_clean_decimal_strips_currency() {
        assert_eq!(clean_decimal("$1,299.50"), Some(1299.5));
        assert_eq!(clean_decimal("  42 "), Some(42.0));
        assert_eq!(clean_decimal("€15,000"), Some(15000.0));
        assert_eq!(clean_decimal("-3.25"), Some(-3.25));
    }

    #[test]
    fn test_clean_decimal_rejects_garbage() {
        assert_eq!(clean_decimal("abc"), None);
        assert_eq!(clean_decimal("$"), None);
        assert_eq!(clean_decimal("12.3.4"), None);
    }

    #[test]
    fn test_clean_integer() {
        assert_eq!(clean_integer("1,200"), Some(1200));
        assert_eq!(clean_integer("12.0"), Some(12));
        assert_eq!(clean_integer("12.5"), None);
        assert_eq!(clean_integer("five"), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 12, 25).unwrap();
        assert_eq!(parse_date("2024-12-25"), Some(expected));
        assert_eq!(parse_date("12/25/2024"), Some(expected));
        assert_eq!(parse_date("2024/12/25"), Some(expected));
        assert_eq!(parse_date("25-Dec-2024"), Some(expected));
        assert_eq!(parse_date("2024-12-25 10:30:00"), Some(expected));
    }

    #[test]
    fn test_parse_date_garbage() {
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date("2024-13-45"), None);
    }

    #[test]
    fn test_key_text() {
        assert_eq!(Value::Text("C1".to_string()).key_text(), Some("C1".to_string()));
        assert_eq!(Value::Integer(7).key_text(), Some("7".to_string()));
        assert_eq!(Value::Null.key_text(), None);
    }

    #[test]
    fn test_normalize_key_component() {
        assert_eq!(normalize_key_component("  CUST-01 "), "cust-01");
    }
}
