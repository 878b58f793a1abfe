//! Structured results of dataset and row validation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::data::RowId;
use crate::duplicate::DuplicateGroup;
use crate::source::Scope;
use crate::strategy::EvaluationMode;
use crate::validation::{RowAlerts, Severity, ValidationAlert, ValidationOutcome};

/// Alert counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub information: usize,
    pub warning: usize,
    pub error: usize,
    pub critical: usize,
}

impl SeverityCounts {
    pub fn from_alerts<'a, I>(alerts: I) -> Self
    where
        I: IntoIterator<Item = &'a RowAlerts>,
    {
        let mut counts = Self::default();
        for alert in alerts.into_iter().flat_map(|r| r.alerts.iter()) {
            match alert.severity {
                Severity::Information => counts.information += 1,
                Severity::Warning => counts.warning += 1,
                Severity::Error => counts.error += 1,
                Severity::Critical => counts.critical += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.information + self.warning + self.error + self.critical
    }
}

/// Result of a full evaluation of one scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub scope: Scope,
    /// True when no evaluated row carries an alert.
    pub all_valid: bool,
    pub rows_evaluated: usize,
    /// Rows skipped because every cell was blank.
    pub empty_rows: usize,
    pub invalid_rows: usize,
    pub counts: SeverityCounts,
    /// One entry per row in scope, in source order. Empty rows carry none.
    pub alerts: Vec<RowAlerts>,
    pub duplicate_groups: Vec<DuplicateGroup>,
    pub duration: Duration,
    /// Mode recommended for the next evaluation.
    pub mode: EvaluationMode,
    pub fingerprint: String,
}

impl ValidationReport {
    /// Rows carrying at least one alert.
    pub fn invalid(&self) -> impl Iterator<Item = &RowAlerts> {
        self.alerts.iter().filter(|r| !r.is_valid())
    }

    pub fn alerts_for(&self, row_id: RowId) -> Option<&RowAlerts> {
        self.alerts.iter().find(|r| r.row_id == row_id)
    }
}

/// Result of evaluating a single row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowReport {
    pub row_id: RowId,
    /// Combined outcome of every evaluated rule.
    pub outcome: ValidationOutcome,
    pub alerts: Vec<ValidationAlert>,
    /// Names of the rules that ran, in order.
    pub evaluated: Vec<String>,
    pub stopped_early: bool,
}

impl RowReport {
    pub fn is_valid(&self) -> bool {
        self.outcome.is_valid
    }
}
