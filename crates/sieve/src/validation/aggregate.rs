//! Combining rule outcomes and early termination.

use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::data::RowId;

use super::outcome::{Severity, ValidationAlert, ValidationOutcome};

/// Controls whether a row's rule chain halts after a failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    /// Evaluate every rule.
    #[default]
    Continue,
    /// Stop after the first failing rule of any severity.
    StopOnFirstError,
    /// Stop after a critical failure.
    StopOnCritical,
    /// Stop after an error or critical failure.
    StopOnError,
    /// Stop after a warning, error or critical failure.
    StopOnWarning,
}

/// Decide whether a row's rule chain should stop after `outcome`.
///
/// Only ever consulted within one row's chain, never across rows.
pub fn should_stop(outcome: &ValidationOutcome, policy: StopPolicy) -> bool {
    if outcome.is_valid {
        return false;
    }
    match policy {
        StopPolicy::Continue => false,
        StopPolicy::StopOnFirstError => true,
        StopPolicy::StopOnCritical => outcome.severity >= Severity::Critical,
        StopPolicy::StopOnError => outcome.severity >= Severity::Error,
        StopPolicy::StopOnWarning => outcome.severity >= Severity::Warning,
    }
}

/// Combine outcomes into one.
///
/// Valid when every outcome is valid. Otherwise the severity is the maximum
/// among invalid outcomes, and messages, columns and rule names are the
/// order-preserving, deduplicated union over the invalid outcomes.
pub fn combine<'a, I>(outcomes: I) -> ValidationOutcome
where
    I: IntoIterator<Item = &'a ValidationOutcome>,
{
    let mut combined = ValidationOutcome::valid();
    for outcome in outcomes.into_iter().filter(|o| !o.is_valid) {
        if combined.is_valid || outcome.severity > combined.severity {
            combined.severity = outcome.severity;
        }
        combined.is_valid = false;
        extend_unique(&mut combined.messages, &outcome.messages);
        extend_unique(&mut combined.affected_columns, &outcome.affected_columns);
        extend_unique(&mut combined.rule_names, &outcome.rule_names);
    }
    combined
}

fn extend_unique(target: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}

/// Group a row's failing outcomes into per-column alerts.
///
/// Outcomes without affected columns become a single row-level alert.
pub fn alerts_for_row(row_id: RowId, outcomes: &[ValidationOutcome]) -> Vec<ValidationAlert> {
    let now = Utc::now();
    let mut by_column: IndexMap<Option<String>, ValidationAlert> = IndexMap::new();

    for outcome in outcomes.iter().filter(|o| !o.is_valid) {
        let columns: Vec<Option<String>> = if outcome.affected_columns.is_empty() {
            vec![None]
        } else {
            outcome.affected_columns.iter().cloned().map(Some).collect()
        };

        for column in columns {
            let alert = by_column
                .entry(column.clone())
                .or_insert_with(|| ValidationAlert {
                    row_id,
                    column,
                    severity: outcome.severity,
                    messages: Vec::new(),
                    rules: Vec::new(),
                    detected_at: now,
                });
            alert.severity = alert.severity.max(outcome.severity);
            extend_unique(&mut alert.messages, &outcome.messages);
            extend_unique(&mut alert.rules, &outcome.rule_names);
        }
    }

    by_column.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail(severity: Severity, message: &str, column: &str) -> ValidationOutcome {
        ValidationOutcome::invalid(severity, message)
            .with_columns([column])
            .with_rule(format!("{column}_rule"))
    }

    #[test]
    fn test_combine_all_valid() {
        let outcomes = vec![ValidationOutcome::valid(), ValidationOutcome::valid()];
        assert!(combine(&outcomes).is_valid);
        assert!(combine(&Vec::<ValidationOutcome>::new()).is_valid);
    }

    #[test]
    fn test_combine_takes_max_severity_and_unions() {
        let outcomes = vec![
            fail(Severity::Warning, "too short", "name"),
            ValidationOutcome::valid(),
            fail(Severity::Critical, "missing", "email"),
            fail(Severity::Warning, "too short", "name"),
        ];
        let combined = combine(&outcomes);

        assert!(!combined.is_valid);
        assert_eq!(combined.severity, Severity::Critical);
        assert_eq!(combined.messages, vec!["too short", "missing"]);
        assert_eq!(combined.affected_columns, vec!["name", "email"]);
    }

    #[test]
    fn test_combine_lower_severity_after_information() {
        let outcomes = vec![fail(Severity::Information, "note", "a")];
        assert_eq!(combine(&outcomes).severity, Severity::Information);
    }

    #[test]
    fn test_should_stop_policies() {
        let warning = fail(Severity::Warning, "w", "a");
        let error = fail(Severity::Error, "e", "a");
        let critical = fail(Severity::Critical, "c", "a");

        assert!(!should_stop(&ValidationOutcome::valid(), StopPolicy::StopOnFirstError));
        assert!(!should_stop(&critical, StopPolicy::Continue));
        assert!(should_stop(&warning, StopPolicy::StopOnFirstError));
        assert!(!should_stop(&error, StopPolicy::StopOnCritical));
        assert!(should_stop(&critical, StopPolicy::StopOnCritical));
        assert!(!should_stop(&warning, StopPolicy::StopOnError));
        assert!(should_stop(&error, StopPolicy::StopOnError));
        assert!(should_stop(&warning, StopPolicy::StopOnWarning));
    }

    #[test]
    fn test_alerts_grouped_by_column() {
        let outcomes = vec![
            fail(Severity::Warning, "too short", "name"),
            fail(Severity::Error, "not capitalized", "name"),
            ValidationOutcome::invalid(Severity::Error, "needs a contact").with_rule("contact"),
        ];
        let alerts = alerts_for_row(RowId(4), &outcomes);

        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].column.as_deref(), Some("name"));
        assert_eq!(alerts[0].severity, Severity::Error);
        assert_eq!(alerts[0].messages.len(), 2);
        assert_eq!(alerts[1].column, None);
        assert_eq!(alerts[1].rules, vec!["contact"]);
    }
}
