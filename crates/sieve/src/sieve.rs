//! Main Sieve struct and public API.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::future::join_all;
use indexmap::IndexMap;
use tracing::{debug, info, instrument, warn};

use crate::config::SieveConfig;
use crate::data::{Row, RowId, NULL};
use crate::deletion::{DeletionCriteria, DeletionPlan, DeletionReport, RowFailure};
use crate::duplicate::{DuplicateDetector, DuplicateGroup};
use crate::error::{Result, SieveError};
use crate::progress::{Progress, ProgressHandle, ProgressSink};
use crate::report::{RowReport, SeverityCounts, ValidationReport};
use crate::rules::{RuleKind, RuleRegistry, ValidationRule};
use crate::source::{RowSource, Scope};
use crate::strategy::{EvaluationMode, StrategySelector};
use crate::validation::{
    alerts_for_row, combine, filter_severity, RowAlerts, RuleEvaluator, ValidationContext,
    ValidationOutcome,
};

/// Everything a full pass over one scope produced.
struct Pass {
    scope: Scope,
    fingerprint: String,
    data_version: u64,
    /// One entry per row in scope, empty rows included.
    alerts: Vec<RowAlerts>,
    empty: HashSet<RowId>,
    duplicate_groups: Vec<DuplicateGroup>,
    duration: Duration,
}

impl Pass {
    fn all_valid(&self) -> bool {
        self.alerts.iter().all(RowAlerts::is_valid)
    }

    /// Alerts of the rows that were evaluated, empty rows excluded.
    fn evaluated(&self) -> impl Iterator<Item = &RowAlerts> {
        self.alerts.iter().filter(|r| !self.empty.contains(&r.row_id))
    }

    fn rows_evaluated(&self) -> usize {
        self.alerts.len() - self.empty.len()
    }
}

/// Validation engine for one dataset session.
///
/// Owns the rule registry and evaluates rows streamed from a [`RowSource`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use sieve::{MemoryRowSource, Row, RowId, Scope, Sieve, ValidationRule};
///
/// # async fn run() -> sieve::Result<()> {
/// let rows = vec![Row::new(RowId(1)).with("email", "a@x.org")];
/// let sieve = Sieve::new(Arc::new(MemoryRowSource::new(rows)));
/// sieve.add_rule(ValidationRule::required("email_required", "email"))?;
///
/// assert!(sieve.are_all_non_empty_rows_valid(Scope::Whole).await?);
/// # Ok(())
/// # }
/// ```
pub struct Sieve {
    source: Arc<dyn RowSource>,
    registry: RuleRegistry,
    evaluator: RuleEvaluator,
    selector: StrategySelector,
    config: SieveConfig,
    progress: ProgressHandle,
    last_duration: Mutex<Option<Duration>>,
}

impl Sieve {
    /// Create an engine over `source` with the default configuration.
    pub fn new(source: Arc<dyn RowSource>) -> Self {
        Self::with_config(source, SieveConfig::default())
    }

    pub fn with_config(source: Arc<dyn RowSource>, config: SieveConfig) -> Self {
        Self {
            source,
            registry: RuleRegistry::new(config.replace_policy),
            evaluator: RuleEvaluator::new(config.default_async_timeout),
            selector: StrategySelector::new(config.strategy),
            config,
            progress: ProgressHandle::default(),
            last_duration: Mutex::new(None),
        }
    }

    /// Report per-batch progress to `sink`.
    pub fn with_progress(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.progress = ProgressHandle::new(sink);
        self
    }

    pub fn config(&self) -> &SieveConfig {
        &self.config
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn source(&self) -> &Arc<dyn RowSource> {
        &self.source
    }

    /// A context carrying the configured stop policy and severity filter.
    pub fn context(&self) -> ValidationContext {
        ValidationContext::default()
            .with_stop_policy(self.config.stop_policy)
            .with_minimum_severity(self.config.minimum_severity)
    }

    pub fn add_rule(&self, rule: ValidationRule) -> Result<()> {
        self.registry.add_rule(rule)
    }

    pub fn add_rules<I>(&self, rules: I) -> Result<usize>
    where
        I: IntoIterator<Item = ValidationRule>,
    {
        self.registry.add_rules(rules)
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        self.registry.remove_rule(name)
    }

    /// Remove rules by name. Returns how many existed.
    pub fn remove_rules<I, S>(&self, names: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .filter(|name| self.registry.remove_rule(name.as_ref()))
            .count()
    }

    pub fn remove_rules_by_column(&self, column: &str) -> usize {
        self.registry.remove_rules_by_column(column)
    }

    pub fn clear_all_rules(&self) {
        self.registry.clear_all();
    }

    /// The source's rows or its filter changed in bulk.
    ///
    /// Sources that report a [`RowSource::data_version`] are noticed without
    /// this call.
    pub fn notify_bulk_change(&self) {
        debug!("Bulk change; cached validation state dropped");
        self.registry.invalidate_states();
    }

    /// Some rows changed outside the engine.
    pub fn notify_rows_changed(&self, rows: &[RowId]) {
        if !rows.is_empty() {
            debug!(rows = rows.len(), "Rows changed; cached validation state dropped");
            self.registry.invalidate_states();
        }
    }

    pub fn last_evaluation_duration(&self) -> Option<Duration> {
        *self.last_duration.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Real-time or batched evaluation, given the dataset size, the number of
    /// enabled rules and the last full evaluation time.
    pub async fn recommended_mode(&self) -> EvaluationMode {
        let rows = self.source.total_rows(Scope::Whole).await.unwrap_or(usize::MAX);
        self.selector.recommend(
            rows,
            self.registry.enabled_rule_count(),
            self.last_evaluation_duration(),
        )
    }

    /// `Filtered` without an active filter is the whole dataset.
    fn resolve_scope(&self, scope: Scope) -> Scope {
        if scope == Scope::Filtered && !self.source.has_active_filter() {
            Scope::Whole
        } else {
            scope
        }
    }

    /// The canonical completeness check: true when no non-empty row in
    /// `scope` carries an alert.
    ///
    /// Returns true without touching the source when no rule is enabled, and
    /// serves cached results while neither rules nor data changed.
    #[instrument(skip(self), fields(scope = scope.label()))]
    pub async fn are_all_non_empty_rows_valid(&self, scope: Scope) -> Result<bool> {
        if self.registry.enabled_rule_count() == 0 {
            debug!("No enabled rules; dataset is valid");
            return Ok(true);
        }

        let scope = self.resolve_scope(scope);
        let data_version = self.source.data_version();
        if let Some(state) = self.registry.cached_state(scope, data_version) {
            debug!(all_valid = state.all_valid, "Serving cached validation state");
            return Ok(state.all_valid);
        }

        let fingerprint = self.registry.fingerprint();
        if self.source.has_cached_validation_state(scope, &fingerprint).await {
            let alerts = self.source.cached_alerts(scope).await;
            let all_valid = alerts.iter().all(RowAlerts::is_valid);
            self.registry
                .store_state(scope, all_valid, &fingerprint, data_version);
            debug!(all_valid, "Serving validation state cached by the row source");
            return Ok(all_valid);
        }

        let ctx = self.context();
        let pass = self.evaluate_scope(scope, &ctx).await?;
        self.commit(&pass).await?;
        Ok(pass.all_valid())
    }

    /// Evaluate `scope` in full and return a structured report.
    ///
    /// Results are written back to the source and cached only when `ctx`
    /// uses the configured stop policy and severity filter.
    #[instrument(skip(self, ctx), fields(scope = scope.label()))]
    pub async fn validate_dataset(
        &self,
        scope: Scope,
        ctx: &ValidationContext,
    ) -> Result<ValidationReport> {
        let scope = self.resolve_scope(scope);
        let pass = self.evaluate_scope(scope, ctx).await?;

        let canonical = ctx.stop_policy == self.config.stop_policy
            && ctx.minimum_severity == self.config.minimum_severity;
        if canonical {
            self.commit(&pass).await?;
        }

        let rows_evaluated = pass.rows_evaluated();
        let mode = self.selector.recommend(
            pass.alerts.len(),
            self.registry.enabled_rule_count(),
            Some(pass.duration),
        );
        Ok(ValidationReport {
            scope: pass.scope,
            all_valid: pass.all_valid(),
            rows_evaluated,
            empty_rows: pass.empty.len(),
            invalid_rows: pass.alerts.iter().filter(|r| !r.is_valid()).count(),
            counts: SeverityCounts::from_alerts(&pass.alerts),
            alerts: pass.alerts,
            duplicate_groups: pass.duplicate_groups,
            duration: pass.duration,
            mode,
            fingerprint: pass.fingerprint,
        })
    }

    /// Evaluate one row against every enabled column-scoped and group rule.
    ///
    /// Duplicate rules need the whole dataset and are skipped.
    #[instrument(skip(self, row, ctx), fields(row = %row.id))]
    pub async fn validate_row(&self, row: &Row, ctx: &ValidationContext) -> RowReport {
        let mut rules = self.registry.column_scoped_rules();
        rules.extend(
            self.registry
                .all_dataset_scoped_rules()
                .into_iter()
                .filter(|r| matches!(r.kind, RuleKind::Group { .. })),
        );
        self.row_report(row, &rules, ctx).await
    }

    /// Re-evaluate exactly the rules depending on `column` after it changed.
    ///
    /// Cached dataset state is dropped, since the data changed.
    #[instrument(skip(self, row, ctx), fields(row = %row.id))]
    pub async fn validate_cell_change(
        &self,
        row: &Row,
        column: &str,
        ctx: &ValidationContext,
    ) -> RowReport {
        self.registry.invalidate_states();
        let rules: Vec<Arc<ValidationRule>> = self
            .registry
            .rules_for_column(column)
            .into_iter()
            .filter(|r| !matches!(r.kind, RuleKind::Duplicate { .. }))
            .collect();
        debug!(column, rules = rules.len(), "Re-evaluating rules for changed cell");
        self.row_report(row, &rules, ctx).await
    }

    async fn row_report(
        &self,
        row: &Row,
        rules: &[Arc<ValidationRule>],
        ctx: &ValidationContext,
    ) -> RowReport {
        let evaluation = self.evaluator.evaluate_row(row, rules, ctx).await;
        RowReport {
            row_id: row.id,
            outcome: combine(&evaluation.outcomes),
            alerts: alerts_for_row(row.id, &evaluation.outcomes),
            evaluated: evaluation.evaluated,
            stopped_early: evaluation.stopped_early,
        }
    }

    /// Select rows for deletion without touching the source.
    pub async fn plan_deletion(&self, criteria: &DeletionCriteria) -> Result<DeletionPlan> {
        self.plan_deletion_in(Scope::Whole, criteria).await
    }

    #[instrument(skip(self, criteria), fields(scope = scope.label(), criteria = criteria.label()))]
    pub async fn plan_deletion_in(
        &self,
        scope: Scope,
        criteria: &DeletionCriteria,
    ) -> Result<DeletionPlan> {
        let scope = self.resolve_scope(scope);
        let mut duplicate_groups = Vec::new();

        let (evaluated, to_remove): (Vec<RowId>, Vec<RowId>) = match criteria {
            DeletionCriteria::Invalid { .. }
            | DeletionCriteria::Valid
            | DeletionCriteria::ByRuleName(_) => {
                let ctx = self.context();
                let pass = self.evaluate_scope(scope, &ctx).await?;
                self.commit(&pass).await?;
                let evaluated = pass.evaluated().map(|r| r.row_id).collect();
                let selected = pass
                    .evaluated()
                    .filter(|r| criteria.selects_alerts(r))
                    .map(|r| r.row_id)
                    .collect();
                (evaluated, selected)
            }
            DeletionCriteria::Custom(predicate) => {
                let rows = self.collect_rows(scope).await?;
                let selected = rows
                    .iter()
                    .filter(|r| predicate(r))
                    .map(|r| r.id)
                    .collect();
                (rows.iter().map(|r| r.id).collect(), selected)
            }
            DeletionCriteria::Duplicates { columns, options } => {
                options
                    .validate()
                    .map_err(|m| SieveError::rule_config("duplicates", m))?;
                let rows = self.collect_rows(scope).await?;
                duplicate_groups = DuplicateDetector::detect(&rows, columns, options);
                let selected = duplicate_groups
                    .iter()
                    .flat_map(|g| g.removed.iter().copied())
                    .collect();
                (rows.iter().map(|r| r.id).collect(), selected)
            }
        };

        let removing: HashSet<RowId> = to_remove.iter().copied().collect();
        let retained = evaluated
            .iter()
            .copied()
            .filter(|id| !removing.contains(id))
            .collect();
        info!(
            evaluated = evaluated.len(),
            to_remove = to_remove.len(),
            groups = duplicate_groups.len(),
            "Deletion plan ready"
        );
        Ok(DeletionPlan {
            scope,
            evaluated: evaluated.len(),
            to_remove,
            retained,
            duplicate_groups,
        })
    }

    /// Remove the planned rows through the source.
    ///
    /// Rows the source refuses are listed in the report; the rest are removed.
    #[instrument(skip(self, plan), fields(to_remove = plan.to_remove.len()))]
    pub async fn apply_deletion(&self, plan: &DeletionPlan) -> Result<DeletionReport> {
        let results = if plan.to_remove.is_empty() {
            Vec::new()
        } else {
            self.source.remove_rows(&plan.to_remove).await
        };

        let deleted = results.iter().filter(|r| r.removed).count();
        let failed: Vec<RowFailure> = results
            .into_iter()
            .filter(|r| !r.removed)
            .map(|r| RowFailure {
                row_id: r.row_id,
                reason: r.error.unwrap_or_else(|| "removal rejected".to_string()),
            })
            .collect();
        for failure in &failed {
            warn!(row = %failure.row_id, reason = %failure.reason, "Row could not be removed");
        }

        if deleted > 0 {
            self.registry.invalidate_states();
        }
        let remaining = match self.source.total_rows(Scope::Whole).await {
            Some(total) => total,
            None => plan.evaluated.saturating_sub(deleted),
        };

        info!(deleted, failed = failed.len(), remaining, "Deletion applied");
        Ok(DeletionReport {
            evaluated: plan.evaluated,
            deleted,
            failed,
            remaining,
            duplicate_summary: plan.duplicate_summary(),
        })
    }

    async fn collect_rows(&self, scope: Scope) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        for batch in self.source.stream_rows(scope, self.config.batch_size).await? {
            rows.extend(batch?);
        }
        Ok(rows)
    }

    /// Write a pass back to the source and cache its result.
    ///
    /// A pass the source's data moved under is neither written nor cached.
    async fn commit(&self, pass: &Pass) -> Result<()> {
        if self.source.data_version() != pass.data_version {
            debug!(scope = pass.scope.label(), "Rows changed during evaluation; not caching result");
            return Ok(());
        }
        self.source
            .write_validation_alerts(pass.scope, &pass.fingerprint, pass.alerts.clone())
            .await?;
        self.registry.store_state(
            pass.scope,
            pass.all_valid(),
            &pass.fingerprint,
            pass.data_version,
        );
        *self.last_duration.lock().unwrap_or_else(PoisonError::into_inner) = Some(pass.duration);
        Ok(())
    }

    /// Stream `scope`, run column-scoped rules per row, then dataset-scoped
    /// rules over every collected row.
    async fn evaluate_scope(&self, scope: Scope, ctx: &ValidationContext) -> Result<Pass> {
        let started = Instant::now();
        let fingerprint = self.registry.fingerprint();
        let data_version = self.source.data_version();
        let column_rules = self.registry.column_scoped_rules();
        let dataset_rules = self.registry.all_dataset_scoped_rules();
        let total = self.source.total_rows(scope).await;

        info!(
            scope = scope.label(),
            rows = ?total,
            column_rules = column_rules.len(),
            dataset_rules = dataset_rules.len(),
            "Starting validation"
        );

        let mut outcomes: IndexMap<RowId, Vec<ValidationOutcome>> = IndexMap::new();
        let mut retained_rows: Vec<Row> = Vec::new();
        let mut processed = 0;
        let mut empty: HashSet<RowId> = HashSet::new();

        let batches = self.source.stream_rows(scope, self.config.batch_size).await?;
        for batch in batches {
            if ctx.is_cancelled() {
                info!(processed, "Validation cancelled");
                return Err(SieveError::Cancelled);
            }
            let batch = batch?;
            processed += batch.len();

            // Every row gets an entry, in order; empty rows keep theirs empty.
            for row in &batch {
                outcomes.insert(row.id, Vec::new());
            }
            let (rows, blank): (Vec<Row>, Vec<Row>) = batch.into_iter().partition(|r| !r.is_empty());
            empty.extend(blank.iter().map(|r| r.id));

            let evaluations = join_all(
                rows.iter()
                    .map(|row| self.evaluator.evaluate_row(row, &column_rules, ctx)),
            )
            .await;
            for evaluation in evaluations {
                outcomes.insert(evaluation.row_id, evaluation.outcomes);
            }

            debug!(processed, rows = rows.len(), "Batch evaluated");
            self.progress.report(Progress {
                operation: "validate".to_string(),
                processed,
                total,
                elapsed: started.elapsed(),
            });

            if !dataset_rules.is_empty() {
                retained_rows.extend(rows);
            }
        }

        if ctx.is_cancelled() {
            return Err(SieveError::Cancelled);
        }

        let mut duplicate_groups = Vec::new();
        for rule in &dataset_rules {
            match &rule.kind {
                RuleKind::Duplicate { columns, options } => {
                    let groups = DuplicateDetector::detect(&retained_rows, columns, options);
                    let flagged = DuplicateDetector::outcomes_for(
                        &groups,
                        columns,
                        rule.severity,
                        &rule.name,
                        rule.message.as_deref(),
                    );
                    for (row_id, outcome) in flagged {
                        let outcome = filter_severity(outcome, ctx.minimum_severity);
                        outcomes.entry(row_id).or_default().push(outcome);
                    }
                    duplicate_groups.extend(groups);
                }
                _ => {
                    let results = join_all(
                        retained_rows
                            .iter()
                            .map(|row| self.evaluator.evaluate(rule, &NULL, row, ctx)),
                    )
                    .await;
                    for (row, outcome) in retained_rows.iter().zip(results) {
                        let outcome = filter_severity(outcome, ctx.minimum_severity);
                        outcomes.entry(row.id).or_default().push(outcome);
                    }
                }
            }
        }

        let alerts: Vec<RowAlerts> = outcomes
            .iter()
            .map(|(row_id, outcomes)| RowAlerts {
                row_id: *row_id,
                alerts: alerts_for_row(*row_id, outcomes),
            })
            .collect();

        let duration = started.elapsed();
        let invalid = alerts.iter().filter(|r| !r.is_valid()).count();
        info!(
            scope = scope.label(),
            rows = alerts.len() - empty.len(),
            empty_rows = empty.len(),
            invalid_rows = invalid,
            duplicate_groups = duplicate_groups.len(),
            duration_ms = duration.as_millis() as u64,
            result = if invalid == 0 { "valid" } else { "invalid" },
            "Validation completed"
        );

        Ok(Pass {
            scope,
            fingerprint,
            data_version,
            alerts,
            empty,
            duplicate_groups,
            duration,
        })
    }
}

impl std::fmt::Debug for Sieve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sieve")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}
