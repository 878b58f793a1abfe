//! Error types for the Sieve library.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::RowId;

/// Stable classification of a [`SieveError`] for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RuleConfiguration,
    DuplicateRuleName,
    Evaluation,
    ScopeResolution,
    RowSource,
    Deletion,
    Cancelled,
    Config,
    Io,
    Parse,
}

/// Main error type for Sieve operations.
#[derive(Debug, Error)]
pub enum SieveError {
    /// A rule was malformed and rejected at registration time.
    #[error("Rule '{rule}' is misconfigured: {message}")]
    RuleConfiguration { rule: String, message: String },

    /// A rule with this name is already registered and replacement is disabled.
    #[error("A rule named '{0}' is already registered")]
    DuplicateRuleName(String),

    /// A custom or asynchronous predicate failed or timed out.
    #[error("Rule '{rule}' failed to evaluate: {message}")]
    Evaluation { rule: String, message: String },

    /// The row source could not stream the requested scope.
    #[error("Cannot resolve scope '{scope}': {message}")]
    ScopeResolution { scope: String, message: String },

    /// The row source rejected an operation.
    #[error("Row source error: {0}")]
    RowSource(String),

    /// One or more rows could not be removed.
    #[error("{} row(s) could not be removed", failed.len())]
    Deletion { failed: Vec<RowId> },

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error reading or accessing a file.
    #[error("IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error from the CSV library.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Regex compilation error.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Empty file or no data to validate.
    #[error("Empty data: {0}")]
    EmptyData(String),
}

impl SieveError {
    /// Shorthand for a [`SieveError::RuleConfiguration`].
    pub fn rule_config(rule: impl Into<String>, message: impl Into<String>) -> Self {
        SieveError::RuleConfiguration {
            rule: rule.into(),
            message: message.into(),
        }
    }

    /// The stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SieveError::RuleConfiguration { .. } => ErrorKind::RuleConfiguration,
            SieveError::DuplicateRuleName(_) => ErrorKind::DuplicateRuleName,
            SieveError::Evaluation { .. } => ErrorKind::Evaluation,
            SieveError::ScopeResolution { .. } => ErrorKind::ScopeResolution,
            SieveError::RowSource(_) => ErrorKind::RowSource,
            SieveError::Deletion { .. } => ErrorKind::Deletion,
            SieveError::Cancelled => ErrorKind::Cancelled,
            SieveError::Config(_) => ErrorKind::Config,
            SieveError::Io { .. } => ErrorKind::Io,
            SieveError::Csv(_) | SieveError::Json(_) | SieveError::Regex(_) => ErrorKind::Parse,
            SieveError::EmptyData(_) => ErrorKind::Parse,
        }
    }

    /// Rule names or row identifiers this error refers to, rendered as strings.
    pub fn affected(&self) -> Vec<String> {
        match self {
            SieveError::RuleConfiguration { rule, .. } | SieveError::Evaluation { rule, .. } => {
                vec![rule.clone()]
            }
            SieveError::DuplicateRuleName(name) => vec![name.clone()],
            SieveError::ScopeResolution { scope, .. } => vec![scope.clone()],
            SieveError::Deletion { failed } => failed.iter().map(|id| id.to_string()).collect(),
            SieveError::Io { path, .. } => vec![path.display().to_string()],
            _ => Vec::new(),
        }
    }
}

/// Result type alias for Sieve operations.
pub type Result<T> = std::result::Result<T, SieveError>;
