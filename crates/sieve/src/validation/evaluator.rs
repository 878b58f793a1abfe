//! Evaluating rules against cells and rows.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::data::{coerce, CellValue, Row, RowId, NULL};
use crate::error::SieveError;
use crate::rules::{
    AsyncPredicate, Bound, CustomPredicate, RowPredicate, RuleKind, RuleType, ValidationRule,
    Verdict,
};

use super::aggregate::should_stop;
use super::context::ValidationContext;
use super::outcome::{Severity, ValidationOutcome};

/// Default time an async rule may run when it has no timeout of its own.
pub const DEFAULT_ASYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcomes of one row's rule chain.
#[derive(Debug, Clone)]
pub struct RowEvaluation {
    pub row_id: RowId,
    /// One entry per evaluated rule, after severity filtering.
    pub outcomes: Vec<ValidationOutcome>,
    /// Names of the rules that ran, in order.
    pub evaluated: Vec<String>,
    /// True when the stop policy cut the chain short.
    pub stopped_early: bool,
}

impl RowEvaluation {
    pub fn is_valid(&self) -> bool {
        self.outcomes.iter().all(|o| o.is_valid)
    }
}

/// Evaluates single rules and per-row rule chains.
#[derive(Debug, Clone)]
pub struct RuleEvaluator {
    default_timeout: Duration,
}

impl Default for RuleEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_ASYNC_TIMEOUT)
    }
}

impl RuleEvaluator {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Evaluate one rule against `value` (the rule's primary cell) and its row.
    ///
    /// Never fails: predicate errors, panics, timeouts and cancellation all
    /// become Error outcomes naming the rule.
    pub async fn evaluate(
        &self,
        rule: &ValidationRule,
        value: &CellValue,
        row: &Row,
        ctx: &ValidationContext,
    ) -> ValidationOutcome {
        let verdict = match &rule.kind {
            RuleKind::Required => Ok(!value.is_blank()),
            RuleKind::Range { min, max } => {
                return check_range(rule, value, min.as_ref(), max.as_ref());
            }
            RuleKind::Pattern { regex, .. } => {
                Ok(value.is_blank() || regex.is_match(&value.to_string()))
            }
            RuleKind::Custom { predicate } => self.run_custom(rule, predicate, value, row, ctx).await,
            RuleKind::CrossColumn { check, .. } | RuleKind::Group { check, .. } => {
                test_predicate(check, row)
            }
            RuleKind::Conditional { guard, check, .. } => match test_predicate(guard, row) {
                Ok(true) => test_predicate(check, row),
                other => other.map(|_| true),
            },
            RuleKind::Async { function } => self.run_async(rule, function, value, row, ctx).await,
            // Duplicates are a property of the dataset, never of a single row.
            RuleKind::Duplicate { .. } => Ok(true),
        };

        match verdict {
            Ok(true) => ValidationOutcome::valid(),
            Ok(false) => failure(rule, default_message(rule, value)),
            Err(fault) => {
                let error = SieveError::Evaluation {
                    rule: rule.name.clone(),
                    message: fault,
                };
                warn!(error = %error, "Rule evaluation fault");
                fault_outcome(rule, &error)
            }
        }
    }

    /// Custom predicates run inline unless the rule sets a timeout, in which
    /// case they move to the blocking pool and race it.
    async fn run_custom(
        &self,
        rule: &ValidationRule,
        predicate: &CustomPredicate,
        value: &CellValue,
        row: &Row,
        ctx: &ValidationContext,
    ) -> Verdict {
        let Some(limit) = rule.timeout else {
            return guarded(|| predicate(value, row, ctx)).and_then(|verdict| verdict);
        };
        if ctx.is_cancelled() {
            return Err("cancelled".to_string());
        }
        let predicate = Arc::clone(predicate);
        let (value, row, task_ctx) = (value.clone(), row.clone(), ctx.clone());
        let handle = tokio::task::spawn_blocking(move || predicate(&value, &row, &task_ctx));
        race(rule, limit, handle, ctx).await
    }

    async fn run_async(
        &self,
        rule: &ValidationRule,
        function: &AsyncPredicate,
        value: &CellValue,
        row: &Row,
        ctx: &ValidationContext,
    ) -> Verdict {
        if ctx.is_cancelled() {
            return Err("cancelled".to_string());
        }
        let limit = rule.timeout.unwrap_or(self.default_timeout);
        let future = guarded(|| function(value.clone(), row.clone(), ctx.clone()))?;
        race(rule, limit, tokio::spawn(future), ctx).await
    }

    /// Run `rules` over one row in order.
    ///
    /// Outcomes below `ctx.minimum_severity` are dropped. After each rule the
    /// stop policy is consulted; Required outcomes never stop the chain.
    pub async fn evaluate_row(
        &self,
        row: &Row,
        rules: &[Arc<ValidationRule>],
        ctx: &ValidationContext,
    ) -> RowEvaluation {
        let mut evaluation = RowEvaluation {
            row_id: row.id,
            outcomes: Vec::with_capacity(rules.len()),
            evaluated: Vec::with_capacity(rules.len()),
            stopped_early: false,
        };

        for rule in rules.iter().filter(|r| r.enabled) {
            let value = rule.primary_column().map_or(&NULL, |c| row.get(c));
            let outcome = self.evaluate(rule, value, row, ctx).await;
            let outcome = filter_severity(outcome, ctx.minimum_severity);
            evaluation.evaluated.push(rule.name.clone());

            let stop = rule.rule_type() != RuleType::Required && should_stop(&outcome, ctx.stop_policy);
            evaluation.outcomes.push(outcome);
            if stop {
                debug!(row = %row.id, rule = %rule.name, policy = ?ctx.stop_policy, "Stopping rule chain");
                evaluation.stopped_early = true;
                break;
            }
        }

        evaluation
    }
}

/// Wait for a spawned predicate, bounded by `limit` and the context's
/// cancellation.
async fn race(
    rule: &ValidationRule,
    limit: Duration,
    mut handle: JoinHandle<Verdict>,
    ctx: &ValidationContext,
) -> Verdict {
    tokio::select! {
        joined = timeout(limit, &mut handle) => match joined {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(join_error)) if join_error.is_panic() => {
                Err(format!("panicked: {}", panic_message(&*join_error.into_panic())))
            }
            Ok(Err(join_error)) => Err(format!("task failed: {join_error}")),
            Err(_) => {
                handle.abort();
                warn!(rule = %rule.name, timeout_ms = limit.as_millis() as u64, "Rule timed out");
                Err(format!("timed out after {} ms", limit.as_millis()))
            }
        },
        _ = ctx.cancellation.cancelled() => {
            handle.abort();
            Err("cancelled".to_string())
        }
    }
}

/// Replace a failure below `minimum` with a passing outcome.
pub(crate) fn filter_severity(outcome: ValidationOutcome, minimum: Severity) -> ValidationOutcome {
    if !outcome.is_valid && outcome.severity < minimum {
        ValidationOutcome::valid()
    } else {
        outcome
    }
}

fn check_range(
    rule: &ValidationRule,
    value: &CellValue,
    min: Option<&Bound>,
    max: Option<&Bound>,
) -> ValidationOutcome {
    if value.is_blank() {
        return ValidationOutcome::valid();
    }
    for bound in min.iter().chain(max.iter()) {
        let textual = value.as_str().is_some() && bound.value.as_str().is_some();
        if !coerce::comparable(value, &bound.value) && !textual {
            let message = format!(
                "'{}' value '{value}' cannot be compared with {}",
                column_label(rule),
                bound.value
            );
            return failure(rule, rule.message.clone().unwrap_or(message));
        }
    }

    let above_min = min.is_none_or(|b| {
        let ord = coerce::compare_values(value, &b.value);
        ord.is_gt() || (b.inclusive && ord.is_eq())
    });
    let below_max = max.is_none_or(|b| {
        let ord = coerce::compare_values(value, &b.value);
        ord.is_lt() || (b.inclusive && ord.is_eq())
    });

    if above_min && below_max {
        ValidationOutcome::valid()
    } else {
        failure(rule, default_message(rule, value))
    }
}

fn test_predicate(predicate: &RowPredicate, row: &Row) -> Verdict {
    match predicate {
        RowPredicate::Condition(condition) => Ok(condition.evaluate(row)),
        RowPredicate::Function(f) => guarded(|| f(row)),
    }
}

/// Run user code, turning a panic into an error message.
fn guarded<T, F>(f: F) -> Result<T, String>
where
    F: FnOnce() -> T,
{
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| format!("panicked: {}", panic_message(&*payload)))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn affected_columns(rule: &ValidationRule) -> Vec<String> {
    match &rule.kind {
        RuleKind::Group { columns, .. } | RuleKind::Duplicate { columns, .. } => columns.clone(),
        _ => rule.primary_column().map(str::to_string).into_iter().collect(),
    }
}

fn column_label(rule: &ValidationRule) -> String {
    affected_columns(rule).join(", ")
}

fn failure(rule: &ValidationRule, message: String) -> ValidationOutcome {
    ValidationOutcome::invalid(rule.severity, message)
        .with_columns(affected_columns(rule))
        .with_rule(&rule.name)
}

fn fault_outcome(rule: &ValidationRule, error: &SieveError) -> ValidationOutcome {
    ValidationOutcome::invalid(Severity::Error, error.to_string())
        .with_columns(affected_columns(rule))
        .with_rule(&rule.name)
}

fn describe_bounds(min: Option<&Bound>, max: Option<&Bound>) -> String {
    let lo = min.map_or("(-inf".to_string(), |b| {
        format!("{}{}", if b.inclusive { "[" } else { "(" }, b.value)
    });
    let hi = max.map_or("+inf)".to_string(), |b| {
        format!("{}{}", b.value, if b.inclusive { "]" } else { ")" })
    });
    format!("{lo}, {hi}")
}

fn default_message(rule: &ValidationRule, value: &CellValue) -> String {
    if let Some(message) = &rule.message {
        return message.clone();
    }
    let column = column_label(rule);
    match &rule.kind {
        RuleKind::Required => format!("'{column}' is required"),
        RuleKind::Range { min, max } => format!(
            "'{column}' value {value} is outside {}",
            describe_bounds(min.as_ref(), max.as_ref())
        ),
        RuleKind::Pattern { regex, .. } => {
            format!("'{column}' value '{value}' does not match {}", regex.as_str())
        }
        RuleKind::CrossColumn { check, .. } | RuleKind::Group { check, .. } => {
            format!("Expected {}", check.describe())
        }
        RuleKind::Conditional { guard, check, .. } => {
            format!("Expected {} when {}", check.describe(), guard.describe())
        }
        RuleKind::Custom { .. } | RuleKind::Async { .. } => {
            format!("'{column}' failed check '{}'", rule.name)
        }
        RuleKind::Duplicate { .. } => format!("Duplicate values in [{column}]"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use futures::FutureExt;

    use super::*;
    use crate::rules::{CompareOp, RowCondition};
    use crate::validation::StopPolicy;

    fn row() -> Row {
        Row::new(RowId(7))
            .with("name", "Ada")
            .with("email", CellValue::Null)
            .with("age", "42")
            .with("zip", "1234")
            .with("status", "active")
            .with("tags", CellValue::List(Vec::new()))
    }

    async fn eval(rule: &ValidationRule) -> ValidationOutcome {
        let row = row();
        let value = rule.primary_column().map(|c| row.get(c).clone()).unwrap_or_default();
        RuleEvaluator::default()
            .evaluate(rule, &value, &row, &ValidationContext::default())
            .await
    }

    #[tokio::test]
    async fn test_required() {
        let outcome = eval(&ValidationRule::required("email_required", "email").with_severity(Severity::Warning)).await;
        assert!(!outcome.is_valid);
        assert_eq!(outcome.severity, Severity::Warning);
        assert_eq!(outcome.messages, vec!["'email' is required"]);
        assert_eq!(outcome.affected_columns, vec!["email"]);

        assert!(!eval(&ValidationRule::required("tags", "tags")).await.is_valid);
        assert!(eval(&ValidationRule::required("name", "name")).await.is_valid);
    }

    #[tokio::test]
    async fn test_range_bounds() {
        let inside = ValidationRule::range("age", "age", Some(Bound::inclusive(0)), Some(Bound::inclusive(42)));
        assert!(eval(&inside).await.is_valid);

        let exclusive = ValidationRule::range("age", "age", Some(Bound::inclusive(0)), Some(Bound::exclusive(42)));
        let outcome = eval(&exclusive).await;
        assert!(!outcome.is_valid);
        assert_eq!(outcome.messages, vec!["'age' value 42 is outside [0, 42)"]);

        let blank = ValidationRule::range("email", "email", Some(Bound::inclusive(0)), None);
        assert!(eval(&blank).await.is_valid);

        let text = ValidationRule::range("name", "name", Some(Bound::inclusive(0)), None);
        assert!(!eval(&text).await.is_valid);
    }

    #[tokio::test]
    async fn test_pattern() {
        let zip = ValidationRule::pattern("zip", "zip", r"^\d{5}$", true).unwrap();
        assert!(!eval(&zip).await.is_valid);

        let status = ValidationRule::pattern("status", "status", "^ACTIVE$", false).unwrap();
        assert!(eval(&status).await.is_valid);

        let blank = ValidationRule::pattern("email", "email", "@", true).unwrap();
        assert!(eval(&blank).await.is_valid);
    }

    #[tokio::test]
    async fn test_custom_fault_and_panic() {
        let rule = ValidationRule::custom("lookup", ["name"], |_, _, _| Err("directory offline".into()))
            .with_severity(Severity::Warning);
        let outcome = eval(&rule).await;
        assert!(!outcome.is_valid);
        assert_eq!(outcome.severity, Severity::Error);
        assert_eq!(outcome.messages, vec!["Rule 'lookup' failed to evaluate: directory offline"]);

        let rule = ValidationRule::custom("boom", ["name"], |_, _, _| panic!("bad input"));
        let outcome = eval(&rule).await;
        assert_eq!(outcome.severity, Severity::Error);
        assert!(outcome.messages[0].contains("panicked: bad input"));
        assert_eq!(outcome.rule_names, vec!["boom"]);
    }

    #[tokio::test]
    async fn test_custom_message_override() {
        let rule = ValidationRule::custom("short", ["name"], |v, _, _| Ok(v.to_string().len() > 5))
            .with_message("Name too short");
        assert_eq!(eval(&rule).await.messages, vec!["Name too short"]);
    }

    #[tokio::test]
    async fn test_conditional_guard() {
        let guard = RowCondition::Equals {
            column: "status".into(),
            value: CellValue::from("active"),
        };
        let check = RowCondition::IsNotEmpty {
            column: "email".into(),
        };
        let rule = ValidationRule::conditional("active_needs_email", "email", guard, check.clone());
        let outcome = eval(&rule).await;
        assert!(!outcome.is_valid);
        assert_eq!(outcome.messages, vec!["Expected 'email' is not empty when 'status' = active"]);

        let guard = RowCondition::Equals {
            column: "status".into(),
            value: CellValue::from("closed"),
        };
        let rule = ValidationRule::conditional("closed_needs_email", "email", guard, check);
        assert!(eval(&rule).await.is_valid);
    }

    #[tokio::test]
    async fn test_cross_column_compare() {
        let rule = ValidationRule::compare_columns("age_vs_zip", "age", CompareOp::Lt, "zip");
        assert!(eval(&rule).await.is_valid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_timeout() {
        let rule = ValidationRule::async_rule("hangs", ["name"], |_, _, _| {
            futures::future::pending::<Verdict>().boxed()
        })
        .with_timeout(Duration::from_millis(50));

        let started = Instant::now();
        let outcome = eval(&rule).await;
        assert!(!outcome.is_valid);
        assert_eq!(outcome.severity, Severity::Error);
        assert_eq!(outcome.messages, vec!["Rule 'hangs' failed to evaluate: timed out after 50 ms"]);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_custom_timeout() {
        let rule = ValidationRule::custom("slow_lookup", ["name"], |_, _, _| {
            std::thread::sleep(Duration::from_millis(400));
            Ok(true)
        })
        .with_timeout(Duration::from_millis(50));

        let started = Instant::now();
        let outcome = eval(&rule).await;
        assert!(started.elapsed() < Duration::from_millis(300));
        assert!(!outcome.is_valid);
        assert_eq!(outcome.severity, Severity::Error);
        assert_eq!(
            outcome.messages,
            vec!["Rule 'slow_lookup' failed to evaluate: timed out after 50 ms"]
        );
    }

    #[tokio::test]
    async fn test_custom_with_timeout_keeps_verdict_and_panics() {
        let rule = ValidationRule::custom("short", ["name"], |v, _, _| Ok(v.to_string().len() > 5))
            .with_timeout(Duration::from_secs(1));
        assert!(!eval(&rule).await.is_valid);

        let rule = ValidationRule::custom("boom", ["name"], |_, _, _| panic!("bad input"))
            .with_timeout(Duration::from_secs(1));
        let outcome = eval(&rule).await;
        assert_eq!(outcome.severity, Severity::Error);
        assert!(outcome.messages[0].contains("panicked: bad input"));
    }

    #[tokio::test]
    async fn test_async_verdict() {
        let rule = ValidationRule::async_rule("remote", ["name"], |value, _, _| {
            async move { Ok(value.to_string() == "Ada") }.boxed()
        });
        assert!(eval(&rule).await.is_valid);
    }

    #[tokio::test]
    async fn test_async_cancelled() {
        let rule = ValidationRule::async_rule("slow", ["name"], |_, _, _| {
            futures::future::pending::<Verdict>().boxed()
        });
        let ctx = ValidationContext::default();
        ctx.cancellation.cancel();
        let row = row();
        let outcome = RuleEvaluator::default()
            .evaluate(&rule, row.get("name"), &row, &ctx)
            .await;
        assert_eq!(outcome.messages, vec!["Rule 'slow' failed to evaluate: cancelled"]);
    }

    #[tokio::test]
    async fn test_required_never_stops_chain() {
        let probe = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&probe);
        let rules = vec![
            Arc::new(ValidationRule::required("email_required", "email").with_severity(Severity::Critical)),
            Arc::new(ValidationRule::custom("probe", ["name"], move |_, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            })),
            Arc::new(ValidationRule::required("name_required", "name")),
        ];

        for policy in [
            StopPolicy::Continue,
            StopPolicy::StopOnFirstError,
            StopPolicy::StopOnCritical,
            StopPolicy::StopOnError,
            StopPolicy::StopOnWarning,
        ] {
            let ctx = ValidationContext::default().with_stop_policy(policy);
            let result = RuleEvaluator::default().evaluate_row(&row(), &rules, &ctx).await;
            assert!(!result.outcomes[0].is_valid);
            assert!(result.evaluated.contains(&"probe".to_string()), "{policy:?}");
        }
        assert_eq!(probe.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_stop_policy_cuts_chain() {
        let rules = vec![
            Arc::new(ValidationRule::custom("first", ["name"], |_, _, _| Ok(false))),
            Arc::new(ValidationRule::required("name_required", "name")),
        ];
        let ctx = ValidationContext::default().with_stop_policy(StopPolicy::StopOnError);
        let result = RuleEvaluator::default().evaluate_row(&row(), &rules, &ctx).await;
        assert!(result.stopped_early);
        assert_eq!(result.evaluated, vec!["first"]);
    }

    #[tokio::test]
    async fn test_minimum_severity_filters() {
        let rules = vec![Arc::new(
            ValidationRule::required("email_hint", "email").with_severity(Severity::Information),
        )];
        let ctx = ValidationContext::default().with_minimum_severity(Severity::Warning);
        let result = RuleEvaluator::default().evaluate_row(&row(), &rules, &ctx).await;
        assert!(result.is_valid());
    }
}
