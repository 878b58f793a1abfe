//! Cell values.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single cell value.
///
/// Deserializes untagged, so rule files can write literals as plain JSON
/// (`null`, `true`, `42`, `4.2`, `"text"`, `[..]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    /// Missing value.
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    /// Multi-valued cell; an empty list counts as blank.
    List(Vec<CellValue>),
}

impl CellValue {
    /// Returns true for null, whitespace-only text and empty lists.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::List(items) => items.is_empty(),
            CellValue::Bool(_)
            | CellValue::Integer(_)
            | CellValue::Decimal(_)
            | CellValue::Timestamp(_) => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Borrow the text payload, if this is a text cell.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get a short label for the value's type.
    pub fn type_label(&self) -> &'static str {
        match self {
            CellValue::Null => "null",
            CellValue::Bool(_) => "boolean",
            CellValue::Integer(_) => "integer",
            CellValue::Decimal(_) => "decimal",
            CellValue::Text(_) => "string",
            CellValue::Timestamp(_) => "timestamp",
            CellValue::List(_) => "list",
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::Integer(i) => write!(f, "{i}"),
            CellValue::Decimal(d) => write!(f, "{d}"),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Timestamp(ts) => f.write_str(&ts.to_rfc3339()),
            CellValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Integer(value)
    }
}

impl From<i32> for CellValue {
    fn from(value: i32) -> Self {
        CellValue::Integer(i64::from(value))
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Decimal(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for CellValue {
    fn from(value: DateTime<Utc>) -> Self {
        CellValue::Timestamp(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(CellValue::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_values() {
        assert!(CellValue::Null.is_blank());
        assert!(CellValue::from("   ").is_blank());
        assert!(CellValue::List(Vec::new()).is_blank());
        assert!(!CellValue::from(0).is_blank());
        assert!(!CellValue::from(false).is_blank());
        assert!(!CellValue::List(vec![CellValue::Null]).is_blank());
    }

    #[test]
    fn test_untagged_literals() {
        let values: Vec<CellValue> = serde_json::from_str(r#"[null, true, 3, 2.5, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                CellValue::Null,
                CellValue::Bool(true),
                CellValue::Integer(3),
                CellValue::Decimal(2.5),
                CellValue::Text("x".to_string()),
            ]
        );
    }

    #[test]
    fn test_display() {
        let list = CellValue::List(vec![CellValue::from("a"), CellValue::from(2)]);
        assert_eq!(list.to_string(), "a, 2");
        assert_eq!(CellValue::Null.to_string(), "");
    }
}
