//! Deletion plans and the reports of applying them.

use serde::{Deserialize, Serialize};

use crate::data::RowId;
use crate::duplicate::{DuplicateGroup, DuplicateSummary};
use crate::error::{Result, SieveError};
use crate::source::Scope;

/// Rows a deletion would remove. Building a plan never mutates the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionPlan {
    pub scope: Scope,
    /// Rows the criteria were checked against.
    pub evaluated: usize,
    pub to_remove: Vec<RowId>,
    pub retained: Vec<RowId>,
    /// Populated for duplicate criteria only.
    pub duplicate_groups: Vec<DuplicateGroup>,
}

impl DeletionPlan {
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty()
    }

    pub fn duplicate_summary(&self) -> Option<DuplicateSummary> {
        if self.duplicate_groups.is_empty() {
            None
        } else {
            Some(DuplicateSummary::from_groups(&self.duplicate_groups))
        }
    }
}

/// A row the source refused to remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    pub row_id: RowId,
    pub reason: String,
}

/// Outcome of applying a [`DeletionPlan`]. Partial success is normal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionReport {
    pub evaluated: usize,
    pub deleted: usize,
    pub failed: Vec<RowFailure>,
    /// Rows left in the dataset.
    pub remaining: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_summary: Option<DuplicateSummary>,
}

impl DeletionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Turn per-row failures into an error.
    pub fn into_result(self) -> Result<Self> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(SieveError::Deletion {
                failed: self.failed.iter().map(|f| f.row_id).collect(),
            })
        }
    }
}
