//! Row selection for deletion plans.

use std::fmt;

use crate::data::Row;
use crate::duplicate::DuplicateOptions;
use crate::rules::RowFn;
use crate::validation::{RowAlerts, Severity};

/// Which rows a deletion plan selects.
#[derive(Clone)]
pub enum DeletionCriteria {
    /// Rows with an alert of one of these severities; any severity when empty.
    Invalid { severities: Vec<Severity> },
    /// Non-empty rows without alerts.
    Valid,
    /// Rows with an alert from the named rule.
    ByRuleName(String),
    Custom(RowFn),
    /// Duplicate rows, per the handling mode and retention of `options`.
    Duplicates {
        columns: Vec<String>,
        options: DuplicateOptions,
    },
}

impl DeletionCriteria {
    pub fn invalid() -> Self {
        DeletionCriteria::Invalid {
            severities: Vec::new(),
        }
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&Row) -> bool + Send + Sync + 'static,
    {
        DeletionCriteria::Custom(std::sync::Arc::new(predicate))
    }

    pub fn duplicates<I, S>(columns: I, options: DuplicateOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DeletionCriteria::Duplicates {
            columns: columns.into_iter().map(Into::into).collect(),
            options,
        }
    }

    /// Alert-based selection. Always false for row-based criteria.
    pub(crate) fn selects_alerts(&self, alerts: &RowAlerts) -> bool {
        match self {
            DeletionCriteria::Invalid { severities } => alerts
                .alerts
                .iter()
                .any(|a| severities.is_empty() || severities.contains(&a.severity)),
            DeletionCriteria::Valid => alerts.is_valid(),
            DeletionCriteria::ByRuleName(name) => alerts.has_rule(name),
            DeletionCriteria::Custom(_) | DeletionCriteria::Duplicates { .. } => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeletionCriteria::Invalid { .. } => "invalid",
            DeletionCriteria::Valid => "valid",
            DeletionCriteria::ByRuleName(_) => "by_rule_name",
            DeletionCriteria::Custom(_) => "custom",
            DeletionCriteria::Duplicates { .. } => "duplicates",
        }
    }
}

impl fmt::Debug for DeletionCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeletionCriteria::Invalid { severities } => f
                .debug_struct("Invalid")
                .field("severities", severities)
                .finish(),
            DeletionCriteria::Valid => f.write_str("Valid"),
            DeletionCriteria::ByRuleName(name) => f.debug_tuple("ByRuleName").field(name).finish(),
            DeletionCriteria::Custom(_) => f.write_str("Custom(..)"),
            DeletionCriteria::Duplicates { columns, options } => f
                .debug_struct("Duplicates")
                .field("columns", columns)
                .field("options", options)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::data::RowId;
    use crate::validation::ValidationAlert;

    fn alerts(severity: Severity, rule: &str) -> RowAlerts {
        RowAlerts {
            row_id: RowId(1),
            alerts: vec![ValidationAlert {
                row_id: RowId(1),
                column: Some("email".into()),
                severity,
                messages: vec!["bad".into()],
                rules: vec![rule.into()],
                detected_at: Utc::now(),
            }],
        }
    }

    #[test]
    fn test_alert_selection() {
        let warning = alerts(Severity::Warning, "email_format");
        assert!(DeletionCriteria::invalid().selects_alerts(&warning));
        assert!(!DeletionCriteria::Invalid {
            severities: vec![Severity::Error, Severity::Critical]
        }
        .selects_alerts(&warning));
        assert!(DeletionCriteria::ByRuleName("email_format".into()).selects_alerts(&warning));
        assert!(!DeletionCriteria::Valid.selects_alerts(&warning));
        assert!(DeletionCriteria::Valid.selects_alerts(&RowAlerts::empty(RowId(2))));
    }
}
