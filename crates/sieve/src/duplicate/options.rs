//! Duplicate detection options and results.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::data::{CellValue, Row, RowId};

/// Pairwise equality decided by the caller.
pub type DuplicateComparer = Arc<dyn Fn(&Row, &Row) -> bool + Send + Sync>;

/// Picks the row to keep from a group; returns an index into the slice.
pub type RetentionSelector = Arc<dyn Fn(&[&Row]) -> usize + Send + Sync>;

/// Rows at or below this count use pairwise numeric comparison.
pub const DEFAULT_WINDOW_THRESHOLD: usize = 512;

/// How rows are compared on the comparison columns.
#[derive(Clone, Default)]
pub enum ComparisonStrategy {
    /// Tuple of values after [`Normalization`].
    #[default]
    Exact,
    /// Lowercased, trimmed, whitespace-collapsed text with punctuation stripped.
    Fuzzy,
    /// Numeric values within `epsilon` of each other are merged, transitively.
    NumericTolerance { epsilon: f64 },
    /// Caller-supplied pairwise comparer.
    Custom(DuplicateComparer),
    /// SHA-256 of the normalized values as bucket key.
    Hash,
}

impl ComparisonStrategy {
    /// Wrap a pairwise comparer.
    pub fn custom<F>(comparer: F) -> Self
    where
        F: Fn(&Row, &Row) -> bool + Send + Sync + 'static,
    {
        ComparisonStrategy::Custom(Arc::new(comparer))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ComparisonStrategy::Exact => "exact",
            ComparisonStrategy::Fuzzy => "fuzzy",
            ComparisonStrategy::NumericTolerance { .. } => "numeric_tolerance",
            ComparisonStrategy::Custom(_) => "custom",
            ComparisonStrategy::Hash => "hash",
        }
    }
}

impl fmt::Debug for ComparisonStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonStrategy::NumericTolerance { epsilon } => f
                .debug_struct("NumericTolerance")
                .field("epsilon", epsilon)
                .finish(),
            ComparisonStrategy::Custom(_) => f.write_str("Custom(..)"),
            other => f.write_str(other.label()),
        }
    }
}

/// Text normalization applied before comparing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Normalization {
    #[serde(default)]
    pub ignore_case: bool,
    #[serde(default = "default_true")]
    pub trim_whitespace: bool,
    #[serde(default)]
    pub collapse_whitespace: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            ignore_case: false,
            trim_whitespace: true,
            collapse_whitespace: false,
        }
    }
}

impl Normalization {
    /// Case-insensitive, trimmed and whitespace-collapsed.
    pub fn loose() -> Self {
        Self {
            ignore_case: true,
            trim_whitespace: true,
            collapse_whitespace: true,
        }
    }

    pub fn with_ignore_case(mut self, ignore_case: bool) -> Self {
        self.ignore_case = ignore_case;
        self
    }

    pub fn apply(&self, text: &str) -> String {
        let mut out = if self.collapse_whitespace {
            text.split_whitespace().collect::<Vec<_>>().join(" ")
        } else if self.trim_whitespace {
            text.trim().to_string()
        } else {
            text.to_string()
        };
        if self.ignore_case {
            out = out.to_lowercase();
        }
        out
    }
}

/// Which row of a duplicate group survives.
#[derive(Clone, Default)]
pub enum RetentionStrategy {
    /// Earliest row in source order.
    #[default]
    KeepFirst,
    /// Latest row in source order.
    KeepLast,
    /// Fewest null/blank cells; ties go to the earliest row.
    KeepMostComplete,
    /// Highest (or lowest) value of `column`; blanks never win.
    KeepExtreme { column: String, highest: bool },
    Custom(RetentionSelector),
}

impl RetentionStrategy {
    /// Wrap a selector returning the index of the row to keep.
    pub fn custom<F>(selector: F) -> Self
    where
        F: Fn(&[&Row]) -> usize + Send + Sync + 'static,
    {
        RetentionStrategy::Custom(Arc::new(selector))
    }
}

impl fmt::Debug for RetentionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionStrategy::KeepFirst => f.write_str("KeepFirst"),
            RetentionStrategy::KeepLast => f.write_str("KeepLast"),
            RetentionStrategy::KeepMostComplete => f.write_str("KeepMostComplete"),
            RetentionStrategy::KeepExtreme { column, highest } => f
                .debug_struct("KeepExtreme")
                .field("column", column)
                .field("highest", highest)
                .finish(),
            RetentionStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// What happens to the rows of a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlingMode {
    /// Remove every row except the retained one.
    #[default]
    DeleteDuplicates,
    /// Remove the whole group, retained row included.
    DeleteAll,
    /// Flag duplicates without removing anything.
    MarkOnly,
}

/// Duplicate detection configuration.
#[derive(Debug, Clone)]
pub struct DuplicateOptions {
    pub strategy: ComparisonStrategy,
    pub normalization: Normalization,
    pub retention: RetentionStrategy,
    pub handling: HandlingMode,
    /// Above this row count numeric tolerance uses a sorted sliding window.
    pub window_threshold: usize,
}

impl Default for DuplicateOptions {
    fn default() -> Self {
        Self {
            strategy: ComparisonStrategy::Exact,
            normalization: Normalization::default(),
            retention: RetentionStrategy::KeepFirst,
            handling: HandlingMode::DeleteDuplicates,
            window_threshold: DEFAULT_WINDOW_THRESHOLD,
        }
    }
}

impl DuplicateOptions {
    pub fn new(strategy: ComparisonStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Exact comparison, keep the first row, delete the rest.
    pub fn keep_first_delete_rest() -> Self {
        Self::default()
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn ignore_case(mut self) -> Self {
        self.normalization.ignore_case = true;
        self
    }

    pub fn with_retention(mut self, retention: RetentionStrategy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_handling(mut self, handling: HandlingMode) -> Self {
        self.handling = handling;
        self
    }

    pub fn with_window_threshold(mut self, threshold: usize) -> Self {
        self.window_threshold = threshold;
        self
    }

    /// Check option consistency.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let ComparisonStrategy::NumericTolerance { epsilon } = self.strategy {
            if !epsilon.is_finite() || epsilon < 0.0 {
                return Err(format!("epsilon must be a non-negative number, got {epsilon}"));
            }
        }
        if let RetentionStrategy::KeepExtreme { column, .. } = &self.retention {
            if column.trim().is_empty() {
                return Err("extreme-value retention needs a column".to_string());
            }
        }
        Ok(())
    }
}

/// A set of rows considered duplicates of each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Comparison-column values of the first row in the group.
    pub key: Vec<CellValue>,
    /// Members in source order.
    pub row_ids: Vec<RowId>,
    /// `None` when the whole group is deleted.
    pub retained: Option<RowId>,
    /// Rows slated for removal.
    pub removed: Vec<RowId>,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize {
        self.row_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_ids.is_empty()
    }

    /// Members that are duplicates of the retained row (every member when
    /// nothing is retained).
    pub fn flagged(&self) -> impl Iterator<Item = RowId> + '_ {
        self.row_ids
            .iter()
            .copied()
            .filter(move |id| Some(*id) != self.retained)
    }
}

/// Aggregate figures over a set of duplicate groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateSummary {
    pub groups: usize,
    pub duplicate_rows: usize,
    pub retained: usize,
    pub removed: usize,
}

impl DuplicateSummary {
    pub fn from_groups(groups: &[DuplicateGroup]) -> Self {
        Self {
            groups: groups.len(),
            duplicate_rows: groups.iter().map(DuplicateGroup::len).sum(),
            retained: groups.iter().filter(|g| g.retained.is_some()).count(),
            removed: groups.iter().map(|g| g.removed.len()).sum(),
        }
    }
}
