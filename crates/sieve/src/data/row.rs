//! Rows addressed by stable identifiers.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::value::CellValue;

/// Stable row identifier assigned by the row source.
///
/// Positions shift when rows are deleted; identifiers never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub u64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared null for missing cells.
pub(crate) static NULL: CellValue = CellValue::Null;

/// An ordered mapping from column name to value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: RowId,
    cells: IndexMap<String, CellValue>,
}

impl Row {
    /// Create an empty row.
    pub fn new(id: RowId) -> Self {
        Self {
            id,
            cells: IndexMap::new(),
        }
    }

    /// Set a cell, builder style.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.set(column, value);
        self
    }

    /// Build a row from parallel header/value slices, treating NA-like
    /// strings as null.
    pub fn from_strings(id: RowId, headers: &[String], values: &[String]) -> Self {
        let mut row = Row::new(id);
        for (i, header) in headers.iter().enumerate() {
            let raw = values.get(i).map(String::as_str).unwrap_or("");
            let value = if is_null_value(raw) {
                CellValue::Null
            } else {
                CellValue::Text(raw.to_string())
            };
            row.cells.insert(header.clone(), value);
        }
        row
    }

    /// Insert or replace a cell value.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<CellValue>) {
        self.cells.insert(column.into(), value.into());
    }

    /// Get a cell value. Missing columns read as null.
    pub fn get(&self, column: &str) -> &CellValue {
        self.cells.get(column).unwrap_or(&NULL)
    }

    pub fn contains_column(&self, column: &str) -> bool {
        self.cells.contains_key(column)
    }

    /// Iterate over `(column, value)` pairs in column order.
    pub fn cells(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.cells.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    /// Columns holding a non-blank value.
    pub fn populated_columns(&self) -> impl Iterator<Item = &str> {
        self.cells
            .iter()
            .filter(|(_, v)| !v.is_blank())
            .map(|(k, _)| k.as_str())
    }

    /// Number of blank cells.
    pub fn blank_count(&self) -> usize {
        self.cells.values().filter(|v| v.is_blank()).count()
    }

    /// A row is empty when every cell is blank.
    pub fn is_empty(&self) -> bool {
        self.cells.values().all(CellValue::is_blank)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }
}

/// Check if a raw string represents a missing/null value.
pub fn is_null_value(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("na")
        || trimmed.eq_ignore_ascii_case("n/a")
        || trimmed.eq_ignore_ascii_case("null")
        || trimmed.eq_ignore_ascii_case("none")
        || trimmed.eq_ignore_ascii_case("nil")
        || trimmed == "."
        || trimmed == "-"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_column_reads_null() {
        let row = Row::new(RowId(1)).with("name", "Alice");
        assert_eq!(row.get("name"), &CellValue::from("Alice"));
        assert!(row.get("email").is_null());
        assert!(!row.contains_column("email"));
    }

    #[test]
    fn test_from_strings_converts_na() {
        let headers = vec!["id".to_string(), "status".to_string(), "age".to_string()];
        let values = vec!["S1".to_string(), "N/A".to_string()];
        let row = Row::from_strings(RowId(7), &headers, &values);

        assert_eq!(row.len(), 3);
        assert!(row.get("status").is_null());
        assert!(row.get("age").is_null());
        assert_eq!(row.populated_columns().collect::<Vec<_>>(), vec!["id"]);
        assert_eq!(row.blank_count(), 2);
    }

    #[test]
    fn test_empty_row() {
        let row = Row::new(RowId(0)).with("a", "  ").with("b", CellValue::Null);
        assert!(row.is_empty());
        assert!(!row.with("c", 1).is_empty());
    }
}
