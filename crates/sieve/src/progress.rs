//! Coarse-grained progress reporting for batched operations.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Progress of a batched operation. Reported once per batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub operation: String,
    pub processed: usize,
    /// `None` when the source cannot count the scope up front.
    pub total: Option<usize>,
    pub elapsed: Duration,
}

impl Progress {
    /// Fraction complete, when the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.processed as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Receives progress updates.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: Progress);
}

impl<F> ProgressSink for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn report(&self, progress: Progress) {
        self(progress)
    }
}

/// Logs progress at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, progress: Progress) {
        debug!(
            operation = %progress.operation,
            processed = progress.processed,
            total = ?progress.total,
            elapsed_ms = progress.elapsed.as_millis() as u64,
            "Progress"
        );
    }
}

/// Shared handle to a sink.
#[derive(Clone)]
pub struct ProgressHandle(Arc<dyn ProgressSink>);

impl ProgressHandle {
    pub fn new(sink: impl ProgressSink + 'static) -> Self {
        Self(Arc::new(sink))
    }

    pub fn report(&self, progress: Progress) {
        self.0.report(progress);
    }
}

impl Default for ProgressHandle {
    fn default() -> Self {
        Self::new(TracingProgress)
    }
}

impl fmt::Debug for ProgressHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressHandle(..)")
    }
}
