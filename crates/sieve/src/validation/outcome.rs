//! Validation outcome and alert types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::RowId;

/// Severity level of a rule failure.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational only, may not require action.
    #[default]
    Information,
    /// Potential issue that should be reviewed.
    Warning,
    /// Definite issue that should be addressed.
    Error,
    /// Issue that blocks any further processing of the row.
    Critical,
}

impl Severity {
    /// Get a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Information => "Info",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Critical => "Critical",
        }
    }

    pub const ALL: [Severity; 4] = [
        Severity::Information,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
    ];
}

/// The result of evaluating one or more rules.
///
/// Outcomes are immutable once built; use [`combine`](super::combine) to merge them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub severity: Severity,
    /// Human-readable messages, in order of first occurrence.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_columns: Vec<String>,
    /// Names of the rules that produced this outcome.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_names: Vec<String>,
}

impl ValidationOutcome {
    /// A passing outcome.
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            severity: Severity::Information,
            messages: Vec::new(),
            affected_columns: Vec::new(),
            rule_names: Vec::new(),
        }
    }

    /// A failing outcome.
    pub fn invalid(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            severity,
            messages: vec![message.into()],
            affected_columns: Vec::new(),
            rule_names: Vec::new(),
        }
    }

    /// Set the affected columns.
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affected_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Record the rule that produced this outcome.
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule_names = vec![rule.into()];
        self
    }
}

impl Default for ValidationOutcome {
    fn default() -> Self {
        Self::valid()
    }
}

/// Per-row, per-column aggregation of failing outcomes, ready for display or export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationAlert {
    pub row_id: RowId,
    /// Affected column; `None` for row-level alerts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub severity: Severity,
    pub messages: Vec<String>,
    pub rules: Vec<String>,
    /// When detected.
    pub detected_at: DateTime<Utc>,
}

/// All alerts for one row. Present (possibly empty) for every evaluated row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowAlerts {
    pub row_id: RowId,
    pub alerts: Vec<ValidationAlert>,
}

impl RowAlerts {
    pub fn empty(row_id: RowId) -> Self {
        Self {
            row_id,
            alerts: Vec::new(),
        }
    }

    /// Returns true when the row carries no alerts.
    pub fn is_valid(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Highest severity among the alerts.
    pub fn max_severity(&self) -> Option<Severity> {
        self.alerts.iter().map(|a| a.severity).max()
    }

    /// Returns true when any alert was produced by `rule`.
    pub fn has_rule(&self, rule: &str) -> bool {
        self.alerts.iter().any(|a| a.rules.iter().any(|r| r == rule))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Information < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
    }

    #[test]
    fn test_outcome_builder() {
        let outcome = ValidationOutcome::invalid(Severity::Warning, "Email is required")
            .with_columns(["email"])
            .with_rule("email_required");

        assert!(!outcome.is_valid);
        assert_eq!(outcome.affected_columns, vec!["email".to_string()]);
        assert_eq!(outcome.rule_names, vec!["email_required".to_string()]);
        assert!(ValidationOutcome::valid().is_valid);
    }
}
