//! Rule evaluation, outcome aggregation and alerts.

mod aggregate;
mod context;
mod evaluator;
mod outcome;

pub use aggregate::{alerts_for_row, combine, should_stop, StopPolicy};
pub use context::{Services, Trigger, ValidationContext};
pub use evaluator::{RowEvaluation, RuleEvaluator, DEFAULT_ASYNC_TIMEOUT};
pub(crate) use evaluator::filter_severity;
pub use outcome::{RowAlerts, Severity, ValidationAlert, ValidationOutcome};
