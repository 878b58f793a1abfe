//! Declarative row predicates.
//!
//! These cover the common cross-column, conditional and group checks without
//! code, so they can be loaded from a rule file. Closure predicates cover the rest.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::data::{coerce, CellValue, Row};

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// Returns true when `ordering` satisfies this operator.
    pub fn matches(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// Another column of the same row.
    Column(String),
    /// A literal value.
    Value(CellValue),
}

impl Operand {
    fn resolve<'a>(&'a self, row: &'a Row) -> &'a CellValue {
        match self {
            Operand::Column(name) => row.get(name),
            Operand::Value(value) => value,
        }
    }
}

/// A serializable predicate over a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RowCondition {
    IsEmpty {
        column: String,
    },
    IsNotEmpty {
        column: String,
    },
    /// Coerced equality with a literal.
    Equals {
        column: String,
        value: CellValue,
    },
    /// Coerced comparison. Passes when either side is blank, so absence is
    /// left to `Required` rules.
    Compare {
        column: String,
        op: CompareOp,
        other: Operand,
    },
    AtLeastOneNonEmpty {
        columns: Vec<String>,
    },
    AllNonEmpty {
        columns: Vec<String>,
    },
    All {
        conditions: Vec<RowCondition>,
    },
    Any {
        conditions: Vec<RowCondition>,
    },
    Not {
        condition: Box<RowCondition>,
    },
}

impl RowCondition {
    /// Evaluate against a row.
    pub fn evaluate(&self, row: &Row) -> bool {
        match self {
            RowCondition::IsEmpty { column } => row.get(column).is_blank(),
            RowCondition::IsNotEmpty { column } => !row.get(column).is_blank(),
            RowCondition::Equals { column, value } => {
                let cell = row.get(column);
                if cell.is_blank() || value.is_blank() {
                    cell.is_blank() && value.is_blank()
                } else {
                    coerce::values_equal(cell, value)
                }
            }
            RowCondition::Compare { column, op, other } => {
                let left = row.get(column);
                let right = other.resolve(row);
                if left.is_blank() || right.is_blank() {
                    return true;
                }
                op.matches(coerce::compare_values(left, right))
            }
            RowCondition::AtLeastOneNonEmpty { columns } => {
                columns.iter().any(|c| !row.get(c).is_blank())
            }
            RowCondition::AllNonEmpty { columns } => columns.iter().all(|c| !row.get(c).is_blank()),
            RowCondition::All { conditions } => conditions.iter().all(|c| c.evaluate(row)),
            RowCondition::Any { conditions } => conditions.iter().any(|c| c.evaluate(row)),
            RowCondition::Not { condition } => !condition.evaluate(row),
        }
    }

    /// Columns this condition reads.
    pub fn columns(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut Vec<String>) {
        match self {
            RowCondition::IsEmpty { column }
            | RowCondition::IsNotEmpty { column }
            | RowCondition::Equals { column, .. } => push_unique(out, column),
            RowCondition::Compare { column, other, .. } => {
                push_unique(out, column);
                if let Operand::Column(other) = other {
                    push_unique(out, other);
                }
            }
            RowCondition::AtLeastOneNonEmpty { columns } | RowCondition::AllNonEmpty { columns } => {
                for column in columns {
                    push_unique(out, column);
                }
            }
            RowCondition::All { conditions } | RowCondition::Any { conditions } => {
                for condition in conditions {
                    condition.collect_columns(out);
                }
            }
            RowCondition::Not { condition } => condition.collect_columns(out),
        }
    }

    /// A short description, used in default failure messages.
    pub fn describe(&self) -> String {
        match self {
            RowCondition::IsEmpty { column } => format!("'{column}' is empty"),
            RowCondition::IsNotEmpty { column } => format!("'{column}' is not empty"),
            RowCondition::Equals { column, value } => format!("'{column}' = {value}"),
            RowCondition::Compare { column, op, other } => match other {
                Operand::Column(c) => format!("'{column}' {} '{c}'", op.symbol()),
                Operand::Value(v) => format!("'{column}' {} {v}", op.symbol()),
            },
            RowCondition::AtLeastOneNonEmpty { columns } => {
                format!("at least one of [{}] is filled in", columns.join(", "))
            }
            RowCondition::AllNonEmpty { columns } => {
                format!("all of [{}] are filled in", columns.join(", "))
            }
            RowCondition::All { conditions } => conditions
                .iter()
                .map(RowCondition::describe)
                .collect::<Vec<_>>()
                .join(" and "),
            RowCondition::Any { conditions } => conditions
                .iter()
                .map(RowCondition::describe)
                .collect::<Vec<_>>()
                .join(" or "),
            RowCondition::Not { condition } => format!("not ({})", condition.describe()),
        }
    }
}

fn push_unique(out: &mut Vec<String>, column: &str) {
    if !out.iter().any(|c| c == column) {
        out.push(column.to_string());
    }
}

/// User-supplied row predicate.
pub type RowFn = Arc<dyn Fn(&Row) -> bool + Send + Sync>;

/// A predicate over a whole row: declarative or a closure.
#[derive(Clone)]
pub enum RowPredicate {
    Condition(RowCondition),
    Function(RowFn),
}

impl RowPredicate {
    /// Wrap a closure.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Row) -> bool + Send + Sync + 'static,
    {
        RowPredicate::Function(Arc::new(f))
    }

    /// Columns read by a declarative condition; closures are opaque.
    pub fn columns(&self) -> Vec<String> {
        match self {
            RowPredicate::Condition(c) => c.columns(),
            RowPredicate::Function(_) => Vec::new(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            RowPredicate::Condition(c) => c.describe(),
            RowPredicate::Function(_) => "custom predicate".to_string(),
        }
    }
}

impl From<RowCondition> for RowPredicate {
    fn from(condition: RowCondition) -> Self {
        RowPredicate::Condition(condition)
    }
}

impl fmt::Debug for RowPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowPredicate::Condition(c) => f.debug_tuple("Condition").field(c).finish(),
            RowPredicate::Function(_) => f.write_str("Function(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RowId;

    fn row() -> Row {
        Row::new(RowId(1))
            .with("start", "2024-01-10")
            .with("end", "2024-01-05")
            .with("status", "Shipped")
            .with("phone", CellValue::Null)
            .with("email", "a@x.org")
    }

    #[test]
    fn test_compare_columns() {
        let cond = RowCondition::Compare {
            column: "end".into(),
            op: CompareOp::Ge,
            other: Operand::Column("start".into()),
        };
        assert!(!cond.evaluate(&row()));
        assert_eq!(cond.columns(), vec!["end", "start"]);
    }

    #[test]
    fn test_compare_blank_passes() {
        let cond = RowCondition::Compare {
            column: "phone".into(),
            op: CompareOp::Gt,
            other: Operand::Value(CellValue::from(5)),
        };
        assert!(cond.evaluate(&row()));
    }

    #[test]
    fn test_equals_is_case_insensitive_text() {
        let cond = RowCondition::Equals {
            column: "status".into(),
            value: CellValue::from("shipped"),
        };
        assert!(cond.evaluate(&row()));
    }

    #[test]
    fn test_group_conditions() {
        let one = RowCondition::AtLeastOneNonEmpty {
            columns: vec!["phone".into(), "email".into()],
        };
        let all = RowCondition::AllNonEmpty {
            columns: vec!["phone".into(), "email".into()],
        };
        assert!(one.evaluate(&row()));
        assert!(!all.evaluate(&row()));
        assert!(RowCondition::Not { condition: Box::new(all) }.evaluate(&row()));
    }

    #[test]
    fn test_deserialize_condition() {
        let json = r#"{"type": "compare", "column": "age", "op": "ge", "other": {"value": 18}}"#;
        let cond: RowCondition = serde_json::from_str(json).unwrap();
        assert_eq!(
            cond,
            RowCondition::Compare {
                column: "age".into(),
                op: CompareOp::Ge,
                other: Operand::Value(CellValue::from(18)),
            }
        );

        let json = r#"{"type": "equals", "column": "status", "value": "active"}"#;
        let cond: RowCondition = serde_json::from_str(json).unwrap();
        assert_eq!(
            cond,
            RowCondition::Equals {
                column: "status".into(),
                value: CellValue::from("active"),
            }
        );
    }
}
