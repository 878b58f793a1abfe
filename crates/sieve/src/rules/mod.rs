//! Rule model and registry.

mod condition;
mod registry;
mod rule;

pub use condition::{CompareOp, Operand, RowCondition, RowFn, RowPredicate};
pub use registry::{ReplacePolicy, RuleRegistry, ValidationState};
pub use rule::{
    AsyncPredicate, Bound, CustomPredicate, RuleKind, RuleType, ValidationRule, Verdict,
};
