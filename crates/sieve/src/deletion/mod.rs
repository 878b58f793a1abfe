//! Planning and applying row deletions.

mod criteria;
mod plan;

pub use criteria::DeletionCriteria;
pub use plan::{DeletionPlan, DeletionReport, RowFailure};
