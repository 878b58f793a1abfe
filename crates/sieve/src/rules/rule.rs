//! Validation rule definitions.
//!
//! Rules are immutable values: a [`RuleKind`] tagged union plus the metadata
//! every rule carries. Once registered a rule is shared behind an `Arc`;
//! changing behavior means registering a replacement under the same name.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::data::{coerce, CellValue, Row};
use crate::duplicate::DuplicateOptions;
use crate::error::{Result, SieveError};
use crate::validation::{Severity, ValidationContext};

use super::condition::{CompareOp, Operand, RowCondition, RowPredicate};

/// Verdict from a user-supplied predicate. `Err` signals a fault, not a failure.
pub type Verdict = std::result::Result<bool, String>;

/// Synchronous user predicate over a cell value and its row.
pub type CustomPredicate = Arc<dyn Fn(&CellValue, &Row, &ValidationContext) -> Verdict + Send + Sync>;

/// Asynchronous user predicate. Receives owned copies so the future can be spawned.
pub type AsyncPredicate =
    Arc<dyn Fn(CellValue, Row, ValidationContext) -> BoxFuture<'static, Verdict> + Send + Sync>;

/// Discriminant of a [`RuleKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Required,
    Range,
    Pattern,
    Custom,
    CrossColumn,
    Conditional,
    Async,
    Group,
    Duplicate,
}

impl RuleType {
    /// Get a human-readable label for the rule type.
    pub fn label(&self) -> &'static str {
        match self {
            RuleType::Required => "Required",
            RuleType::Range => "Range",
            RuleType::Pattern => "Pattern",
            RuleType::Custom => "Custom",
            RuleType::CrossColumn => "Cross-Column",
            RuleType::Conditional => "Conditional",
            RuleType::Async => "Async",
            RuleType::Group => "Group",
            RuleType::Duplicate => "Duplicate",
        }
    }

    /// Group and duplicate rules need visibility of more than one cell.
    pub fn is_dataset_scoped(&self) -> bool {
        matches!(self, RuleType::Group | RuleType::Duplicate)
    }
}

/// One end of a range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub value: CellValue,
    #[serde(default = "default_inclusive")]
    pub inclusive: bool,
}

fn default_inclusive() -> bool {
    true
}

impl Bound {
    pub fn inclusive(value: impl Into<CellValue>) -> Self {
        Self {
            value: value.into(),
            inclusive: true,
        }
    }

    pub fn exclusive(value: impl Into<CellValue>) -> Self {
        Self {
            value: value.into(),
            inclusive: false,
        }
    }
}

/// Variant-specific rule data.
#[derive(Clone)]
pub enum RuleKind {
    /// Value must not be null, blank or an empty list.
    Required,
    /// Coerced value must fall between the bounds.
    Range {
        min: Option<Bound>,
        max: Option<Bound>,
    },
    /// Text form of the value must match.
    Pattern { regex: Regex, case_sensitive: bool },
    Custom { predicate: CustomPredicate },
    /// Reads a primary column plus other values of the same row.
    CrossColumn { primary: String, check: RowPredicate },
    /// Like `CrossColumn`, but only applies when `guard` holds.
    Conditional {
        primary: String,
        guard: RowPredicate,
        check: RowPredicate,
    },
    Async { function: AsyncPredicate },
    /// Predicate over the whole row.
    Group {
        columns: Vec<String>,
        check: RowPredicate,
    },
    /// Dataset-scoped duplicate detection over the comparison columns.
    Duplicate {
        columns: Vec<String>,
        options: DuplicateOptions,
    },
}

impl RuleKind {
    pub fn rule_type(&self) -> RuleType {
        match self {
            RuleKind::Required => RuleType::Required,
            RuleKind::Range { .. } => RuleType::Range,
            RuleKind::Pattern { .. } => RuleType::Pattern,
            RuleKind::Custom { .. } => RuleType::Custom,
            RuleKind::CrossColumn { .. } => RuleType::CrossColumn,
            RuleKind::Conditional { .. } => RuleType::Conditional,
            RuleKind::Async { .. } => RuleType::Async,
            RuleKind::Group { .. } => RuleType::Group,
            RuleKind::Duplicate { .. } => RuleType::Duplicate,
        }
    }

    /// Stable textual form of the declarative parts, for fingerprinting.
    fn signature(&self) -> String {
        match self {
            RuleKind::Required | RuleKind::Custom { .. } | RuleKind::Async { .. } => String::new(),
            RuleKind::Range { min, max } => format!("{min:?}..{max:?}"),
            RuleKind::Pattern {
                regex,
                case_sensitive,
            } => format!("{}|{case_sensitive}", regex.as_str()),
            RuleKind::CrossColumn { primary, check } => format!("{primary}|{check:?}"),
            RuleKind::Conditional {
                primary,
                guard,
                check,
            } => format!("{primary}|{guard:?}|{check:?}"),
            RuleKind::Group { columns, check } => format!("{}|{check:?}", columns.join(",")),
            RuleKind::Duplicate { columns, options } => {
                format!("{}|{options:?}", columns.join(","))
            }
        }
    }
}

impl fmt::Debug for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Required => f.write_str("Required"),
            RuleKind::Range { min, max } => f
                .debug_struct("Range")
                .field("min", min)
                .field("max", max)
                .finish(),
            RuleKind::Pattern {
                regex,
                case_sensitive,
            } => f
                .debug_struct("Pattern")
                .field("regex", &regex.as_str())
                .field("case_sensitive", case_sensitive)
                .finish(),
            RuleKind::Custom { .. } => f.write_str("Custom(..)"),
            RuleKind::CrossColumn { primary, check } => f
                .debug_struct("CrossColumn")
                .field("primary", primary)
                .field("check", check)
                .finish(),
            RuleKind::Conditional {
                primary,
                guard,
                check,
            } => f
                .debug_struct("Conditional")
                .field("primary", primary)
                .field("guard", guard)
                .field("check", check)
                .finish(),
            RuleKind::Async { .. } => f.write_str("Async(..)"),
            RuleKind::Group { columns, check } => f
                .debug_struct("Group")
                .field("columns", columns)
                .field("check", check)
                .finish(),
            RuleKind::Duplicate { columns, options } => f
                .debug_struct("Duplicate")
                .field("columns", columns)
                .field("options", options)
                .finish(),
        }
    }
}

/// A named validation rule.
#[derive(Debug, Clone)]
pub struct ValidationRule {
    /// Unique within a registry.
    pub name: String,
    pub severity: Severity,
    pub enabled: bool,
    /// Lower runs first.
    pub priority: i32,
    /// Columns whose change must trigger re-evaluation.
    pub dependent_columns: Vec<String>,
    /// Time limit for async rules (the evaluator default when unset) and for
    /// custom rules (none when unset).
    pub timeout: Option<Duration>,
    /// Overrides the generated failure message.
    pub message: Option<String>,
    pub kind: RuleKind,
}

impl ValidationRule {
    /// Create a rule with default metadata (Error severity, enabled, priority 0).
    pub fn new(name: impl Into<String>, dependent_columns: Vec<String>, kind: RuleKind) -> Self {
        Self {
            name: name.into(),
            severity: Severity::Error,
            enabled: true,
            priority: 0,
            dependent_columns,
            timeout: None,
            message: None,
            kind,
        }
    }

    /// Value in `column` must be present.
    pub fn required(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self::new(name, vec![column.into()], RuleKind::Required)
    }

    /// Value in `column` must fall within the bounds.
    pub fn range(
        name: impl Into<String>,
        column: impl Into<String>,
        min: Option<Bound>,
        max: Option<Bound>,
    ) -> Self {
        Self::new(name, vec![column.into()], RuleKind::Range { min, max })
    }

    /// Value in `column` must match `pattern`.
    pub fn pattern(
        name: impl Into<String>,
        column: impl Into<String>,
        pattern: &str,
        case_sensitive: bool,
    ) -> Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .build()?;
        Ok(Self::new(
            name,
            vec![column.into()],
            RuleKind::Pattern {
                regex,
                case_sensitive,
            },
        ))
    }

    /// Closure over the cell value, its row and the context.
    pub fn custom<I, S, F>(name: impl Into<String>, columns: I, predicate: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&CellValue, &Row, &ValidationContext) -> Verdict + Send + Sync + 'static,
    {
        Self::new(
            name,
            columns.into_iter().map(Into::into).collect(),
            RuleKind::Custom {
                predicate: Arc::new(predicate),
            },
        )
    }

    /// Check reading `primary` and other columns of the row.
    ///
    /// Dependencies are `primary` plus any columns a declarative check reads.
    pub fn cross_column(
        name: impl Into<String>,
        primary: impl Into<String>,
        check: impl Into<RowPredicate>,
    ) -> Self {
        let primary = primary.into();
        let check = check.into();
        let mut deps = vec![primary.clone()];
        extend_unique(&mut deps, check.columns());
        Self::new(name, deps, RuleKind::CrossColumn { primary, check })
    }

    /// `column op other_column`, e.g. `end_date >= start_date`.
    pub fn compare_columns(
        name: impl Into<String>,
        column: impl Into<String>,
        op: CompareOp,
        other_column: impl Into<String>,
    ) -> Self {
        let column = column.into();
        let condition = RowCondition::Compare {
            column: column.clone(),
            op,
            other: Operand::Column(other_column.into()),
        };
        Self::cross_column(name, column, condition)
    }

    /// `check` applies only to rows where `guard` holds.
    pub fn conditional(
        name: impl Into<String>,
        primary: impl Into<String>,
        guard: impl Into<RowPredicate>,
        check: impl Into<RowPredicate>,
    ) -> Self {
        let primary = primary.into();
        let guard = guard.into();
        let check = check.into();
        let mut deps = vec![primary.clone()];
        extend_unique(&mut deps, guard.columns());
        extend_unique(&mut deps, check.columns());
        Self::new(
            name,
            deps,
            RuleKind::Conditional {
                primary,
                guard,
                check,
            },
        )
    }

    /// Asynchronous check, raced against the rule's timeout.
    pub fn async_rule<I, S, F>(name: impl Into<String>, columns: I, function: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(CellValue, Row, ValidationContext) -> BoxFuture<'static, Verdict>
            + Send
            + Sync
            + 'static,
    {
        Self::new(
            name,
            columns.into_iter().map(Into::into).collect(),
            RuleKind::Async {
                function: Arc::new(function),
            },
        )
    }

    /// Predicate over the whole row, depending on `columns`.
    pub fn group<I, S>(name: impl Into<String>, columns: I, check: impl Into<RowPredicate>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        Self::new(
            name,
            Vec::new(),
            RuleKind::Group {
                columns,
                check: check.into(),
            },
        )
    }

    /// At least one of `columns` must be filled in.
    pub fn at_least_one_of<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let check = RowCondition::AtLeastOneNonEmpty {
            columns: columns.clone(),
        };
        Self::group(name, columns, check)
    }

    /// Rows must not duplicate each other on `columns`.
    pub fn duplicate<I, S>(name: impl Into<String>, columns: I, options: DuplicateOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            Vec::new(),
            RuleKind::Duplicate {
                columns: columns.into_iter().map(Into::into).collect(),
                options,
            },
        )
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add columns that should also trigger re-evaluation.
    pub fn with_dependencies<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        extend_unique(
            &mut self.dependent_columns,
            columns.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn disabled(self) -> Self {
        self.enabled(false)
    }

    pub fn rule_type(&self) -> RuleType {
        self.kind.rule_type()
    }

    pub fn is_dataset_scoped(&self) -> bool {
        self.rule_type().is_dataset_scoped()
    }

    /// The columns that trigger this rule: the comparison columns for
    /// group/duplicate rules, `dependent_columns` otherwise.
    pub fn effective_dependencies(&self) -> &[String] {
        match &self.kind {
            RuleKind::Group { columns, .. } | RuleKind::Duplicate { columns, .. } => columns,
            _ => &self.dependent_columns,
        }
    }

    /// The column a column-scoped rule reads its value from.
    pub fn primary_column(&self) -> Option<&str> {
        match &self.kind {
            RuleKind::CrossColumn { primary, .. } | RuleKind::Conditional { primary, .. } => {
                Some(primary)
            }
            RuleKind::Group { .. } | RuleKind::Duplicate { .. } => None,
            _ => self.dependent_columns.first().map(String::as_str),
        }
    }

    /// Reject malformed rules.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SieveError::rule_config(&self.name, "rule name is empty"));
        }
        if self.effective_dependencies().is_empty() {
            let what = if self.is_dataset_scoped() {
                "comparison column set is empty"
            } else {
                "dependent column set is empty"
            };
            return Err(SieveError::rule_config(&self.name, what));
        }
        if self.effective_dependencies().iter().any(|c| c.trim().is_empty()) {
            return Err(SieveError::rule_config(&self.name, "column name is empty"));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(SieveError::rule_config(&self.name, "timeout must be positive"));
        }
        if let RuleKind::Range { min, max } = &self.kind {
            match (min, max) {
                (None, None) => {
                    return Err(SieveError::rule_config(&self.name, "range has no bounds"));
                }
                (Some(lo), Some(hi)) if coerce::comparable(&lo.value, &hi.value) => {
                    let ord = coerce::compare_values(&lo.value, &hi.value);
                    let empty = ord.is_gt()
                        || (ord.is_eq() && !(lo.inclusive && hi.inclusive));
                    if empty {
                        return Err(SieveError::rule_config(
                            &self.name,
                            format!("range [{}, {}] is empty", lo.value, hi.value),
                        ));
                    }
                }
                _ => {}
            }
        }
        if let RuleKind::Duplicate { options, .. } = &self.kind {
            options.validate().map_err(|m| SieveError::rule_config(&self.name, m))?;
        }
        Ok(())
    }

    /// Stable textual form of everything that affects results.
    pub(crate) fn signature(&self) -> String {
        format!(
            "{}|{:?}|{:?}|{}|{}|{}|{:?}|{:?}|{}",
            self.name,
            self.rule_type(),
            self.severity,
            self.enabled,
            self.priority,
            self.effective_dependencies().join(","),
            self.timeout,
            self.message,
            self.kind.signature()
        )
    }
}

fn extend_unique(target: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_constructors_set_dependencies() {
        let rule = ValidationRule::compare_columns("dates", "end_date", CompareOp::Ge, "start_date");
        assert_eq!(rule.dependent_columns, vec!["end_date", "start_date"]);
        assert_eq!(rule.primary_column(), Some("end_date"));
        assert_eq!(rule.rule_type(), RuleType::CrossColumn);

        let rule = ValidationRule::at_least_one_of("contact", ["phone", "email"]);
        assert!(rule.is_dataset_scoped());
        assert_eq!(rule.effective_dependencies(), ["phone", "email"]);
        assert_eq!(rule.primary_column(), None);
    }

    #[test]
    fn test_builder_metadata() {
        let rule = ValidationRule::required("email_required", "email")
            .with_severity(Severity::Critical)
            .with_priority(-5)
            .with_message("Email is required")
            .with_dependencies(["email", "name"])
            .disabled();

        assert_eq!(rule.severity, Severity::Critical);
        assert_eq!(rule.priority, -5);
        assert!(!rule.enabled);
        assert_eq!(rule.dependent_columns, vec!["email", "name"]);
    }

    #[test]
    fn test_validate_rejects_empty_dependencies() {
        let rule = ValidationRule::custom("bad", Vec::<String>::new(), |_, _, _| Ok(true));
        let err = rule.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RuleConfiguration);

        let rule = ValidationRule::group("bad_group", Vec::<String>::new(), RowPredicate::function(|_| true));
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_range() {
        let rule = ValidationRule::range("age", "age", Some(Bound::inclusive(10)), Some(Bound::inclusive(5)));
        assert!(rule.validate().is_err());

        let rule = ValidationRule::range("age", "age", Some(Bound::inclusive(5)), Some(Bound::exclusive(5)));
        assert!(rule.validate().is_err());

        let rule = ValidationRule::range("age", "age", None, None);
        assert!(rule.validate().is_err());

        let rule = ValidationRule::range("age", "age", Some(Bound::inclusive(0)), Some(Bound::inclusive(120)));
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_pattern_compiles() {
        assert!(ValidationRule::pattern("zip", "zip", r"^\d{5}$", true).is_ok());
        assert!(ValidationRule::pattern("bad", "zip", r"(", true).is_err());
    }

    #[test]
    fn test_signature_tracks_changes() {
        let a = ValidationRule::required("r", "a");
        let b = ValidationRule::required("r", "a").with_severity(Severity::Warning);
        assert_ne!(a.signature(), b.signature());
        assert_eq!(a.signature(), ValidationRule::required("r", "a").signature());
    }
}
