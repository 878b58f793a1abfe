//! Duplicate row detection.

mod detector;
mod options;

pub use detector::DuplicateDetector;
pub use options::{
    ComparisonStrategy, DuplicateComparer, DuplicateGroup, DuplicateOptions, DuplicateSummary,
    HandlingMode, Normalization, RetentionSelector, RetentionStrategy, DEFAULT_WINDOW_THRESHOLD,
};
