//! Sieve: rule-driven validation engine for tabular datasets.
//!
//! Sieve evaluates declarative and programmatic rules against rows streamed
//! from a [`RowSource`], answers whether every non-empty row is valid, and
//! detects and removes duplicate rows.
//!
//! # Core Principles
//!
//! - **Streaming**: Rows arrive in batches; dataset-scoped rules run once all batches are in
//! - **Cached**: Results are keyed by a fingerprint of the registered rules
//! - **Never panics on bad rules**: Faulty predicates become Error outcomes
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sieve::{DelimitedFileSource, Scope, Sieve, ValidationRule};
//!
//! # async fn run() -> sieve::Result<()> {
//! let source = Arc::new(DelimitedFileSource::load("samples.csv")?);
//! let sieve = Sieve::new(source);
//! sieve.add_rule(ValidationRule::required("email_required", "email"))?;
//!
//! let report = sieve.validate_dataset(Scope::Whole, &sieve.context()).await?;
//! println!("Invalid rows: {}", report.invalid_rows);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod deletion;
pub mod duplicate;
pub mod error;
pub mod progress;
pub mod report;
pub mod rules;
pub mod source;
pub mod strategy;
pub mod validation;

mod sieve;

pub use crate::sieve::Sieve;
pub use config::{RuleFile, RuleSpec, SieveConfig};
pub use data::{CellValue, Row, RowId};
pub use deletion::{DeletionCriteria, DeletionPlan, DeletionReport};
pub use duplicate::{
    ComparisonStrategy, DuplicateDetector, DuplicateGroup, DuplicateOptions, HandlingMode,
    RetentionStrategy,
};
pub use error::{ErrorKind, Result, SieveError};
pub use report::{RowReport, ValidationReport};
pub use rules::{RuleRegistry, RuleType, ValidationRule};
pub use source::{DelimitedFileSource, MemoryRowSource, RowSource, Scope};
pub use strategy::EvaluationMode;
pub use validation::{
    RowAlerts, Severity, StopPolicy, ValidationAlert, ValidationContext, ValidationOutcome,
};
