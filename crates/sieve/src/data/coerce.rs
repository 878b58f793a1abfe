//! Shared, panic-free type coercion.
//!
//! Numeric strings convert to decimals, date-like strings to timestamps and
//! yes/no style strings to booleans. Comparisons fall back to a
//! case-insensitive ordinal string comparison when neither side coerces.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use super::value::CellValue;

/// Date-time formats tried after RFC 3339.
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

/// Date-only formats.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];

/// Coerce a value to a decimal.
pub fn to_decimal(value: &CellValue) -> Option<f64> {
    match value {
        CellValue::Integer(i) => Some(*i as f64),
        CellValue::Decimal(d) if d.is_finite() => Some(*d),
        CellValue::Text(s) => s.trim().parse::<f64>().ok().filter(|d| d.is_finite()),
        _ => None,
    }
}

/// Coerce a value to a UTC timestamp.
pub fn to_timestamp(value: &CellValue) -> Option<DateTime<Utc>> {
    match value {
        CellValue::Timestamp(ts) => Some(*ts),
        CellValue::Text(s) => parse_timestamp(s.trim()),
        _ => None,
    }
}

/// Coerce a value to a boolean.
pub fn to_bool(value: &CellValue) -> Option<bool> {
    match value {
        CellValue::Bool(b) => Some(*b),
        CellValue::Text(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "t" => Some(true),
            "false" | "no" | "n" | "f" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
        }
    }
    None
}

/// Compare two values after coercion.
///
/// Tries numeric, then temporal, then boolean comparison; falls back to a
/// case-insensitive string comparison.
pub fn compare_values(left: &CellValue, right: &CellValue) -> Ordering {
    if let (Some(a), Some(b)) = (to_decimal(left), to_decimal(right)) {
        if let Some(ord) = a.partial_cmp(&b) {
            return ord;
        }
    }
    if let (Some(a), Some(b)) = (to_timestamp(left), to_timestamp(right)) {
        return a.cmp(&b);
    }
    if let (Some(a), Some(b)) = (to_bool(left), to_bool(right)) {
        return a.cmp(&b);
    }
    left.to_string()
        .to_lowercase()
        .cmp(&right.to_string().to_lowercase())
}

/// Returns true when both sides coerce to the same type family.
pub fn comparable(left: &CellValue, right: &CellValue) -> bool {
    (to_decimal(left).is_some() && to_decimal(right).is_some())
        || (to_timestamp(left).is_some() && to_timestamp(right).is_some())
        || (to_bool(left).is_some() && to_bool(right).is_some())
}

/// Equality under coercion.
pub fn values_equal(left: &CellValue, right: &CellValue) -> bool {
    compare_values(left, right) == Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(to_decimal(&CellValue::from(" 42 ")), Some(42.0));
        assert_eq!(to_decimal(&CellValue::from(7)), Some(7.0));
        assert_eq!(to_decimal(&CellValue::from("abc")), None);
        assert_eq!(to_decimal(&CellValue::from("NaN")), None);
    }

    #[test]
    fn test_timestamp_coercion() {
        let a = to_timestamp(&CellValue::from("2024-03-01")).unwrap();
        let b = to_timestamp(&CellValue::from("2024-03-01T00:00:00Z")).unwrap();
        assert_eq!(a, b);
        assert!(to_timestamp(&CellValue::from("03/15/2024")).is_some());
        assert!(to_timestamp(&CellValue::from("not a date")).is_none());
    }

    #[test]
    fn test_compare_mixed() {
        assert_eq!(compare_values(&CellValue::from("10"), &CellValue::from(9)), Ordering::Greater);
        assert_eq!(
            compare_values(&CellValue::from("2024-01-01"), &CellValue::from("2023-12-31")),
            Ordering::Greater
        );
        // Neither side coerces: case-insensitive ordinal comparison.
        assert_eq!(compare_values(&CellValue::from("Apple"), &CellValue::from("apple")), Ordering::Equal);
        assert!(values_equal(&CellValue::from("YES"), &CellValue::from(true)));
        assert!(!comparable(&CellValue::from("x"), &CellValue::from(1)));
    }
}
