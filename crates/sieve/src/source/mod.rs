//! Row sources the engine streams rows from and writes alerts back to.
//!
//! The engine never owns the dataset. It reads rows in batches through
//! [`RowSource`], writes the alerts of a completed evaluation back, and asks the
//! source to remove rows when a deletion plan is applied.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::data::{Row, RowId};
use crate::error::Result;
use crate::validation::RowAlerts;

mod delimited;
mod memory;

pub use delimited::{detect_delimiter, DelimitedFileSource, FileMetadata, ParserConfig};
pub use memory::MemoryRowSource;

/// Which rows an operation covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Every row in the dataset.
    #[default]
    Whole,
    /// Only rows passing the source's active filter. Same as `Whole` when
    /// no filter is active.
    Filtered,
}

impl Scope {
    pub fn label(&self) -> &'static str {
        match self {
            Scope::Whole => "whole",
            Scope::Filtered => "filtered",
        }
    }
}

/// Lazy sequence of row batches.
pub type RowBatches = Box<dyn Iterator<Item = Result<Vec<Row>>> + Send>;

/// Result of removing one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalResult {
    pub row_id: RowId,
    pub removed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RemovalResult {
    pub fn removed(row_id: RowId) -> Self {
        Self {
            row_id,
            removed: true,
            error: None,
        }
    }

    pub fn failed(row_id: RowId, error: impl Into<String>) -> Self {
        Self {
            row_id,
            removed: false,
            error: Some(error.into()),
        }
    }
}

/// Storage backend the engine validates.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Stream the rows of `scope` in batches of at most `batch_size`.
    ///
    /// # Errors
    ///
    /// Returns [`SieveError::ScopeResolution`](crate::SieveError::ScopeResolution)
    /// when the scope cannot be streamed.
    async fn stream_rows(&self, scope: Scope, batch_size: usize) -> Result<RowBatches>;

    /// Number of rows in `scope`, when cheaply known.
    async fn total_rows(&self, scope: Scope) -> Option<usize>;

    fn has_active_filter(&self) -> bool;

    /// Counter that moves whenever the rows or the filter change.
    ///
    /// Engine-side cached results are tied to the version they were computed
    /// against. A source whose data never changes may keep the default.
    fn data_version(&self) -> u64 {
        0
    }

    /// Store the alerts of a completed evaluation of `scope`.
    async fn write_validation_alerts(
        &self,
        scope: Scope,
        fingerprint: &str,
        alerts: Vec<RowAlerts>,
    ) -> Result<()>;

    /// Whether alerts written under `fingerprint` are still current for `scope`.
    async fn has_cached_validation_state(&self, _scope: Scope, _fingerprint: &str) -> bool {
        false
    }

    /// Alerts last written for `scope`.
    async fn cached_alerts(&self, _scope: Scope) -> Vec<RowAlerts> {
        Vec::new()
    }

    /// Remove rows by id, reporting each removal separately.
    async fn remove_rows(&self, ids: &[RowId]) -> Vec<RemovalResult>;
}
