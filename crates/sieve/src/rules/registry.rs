//! Rule registry with a column dependency index and cached validation state.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Result, SieveError};
use crate::source::Scope;

use super::rule::{RuleType, ValidationRule};

/// What to do when a rule is added under a name that is already registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacePolicy {
    /// The new rule replaces the old one in place.
    #[default]
    Replace,
    /// Fail with [`SieveError::DuplicateRuleName`].
    Reject,
}

/// Cached result of a full check of one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationState {
    pub all_valid: bool,
    pub computed_at: DateTime<Utc>,
    /// Registry fingerprint the result was computed under.
    pub fingerprint: String,
    /// Row source data version the result was computed against.
    pub data_version: u64,
}

#[derive(Default)]
struct Inner {
    /// Registration order is preserved; replacing keeps the original slot.
    rules: IndexMap<String, Arc<ValidationRule>>,
    /// Column -> names of rules depending on it.
    index: HashMap<String, Vec<String>>,
    generation: u64,
    states: HashMap<Scope, ValidationState>,
}

impl Inner {
    fn reindex(&mut self) {
        self.index.clear();
        for (name, rule) in &self.rules {
            for column in rule.effective_dependencies() {
                self.index
                    .entry(column.clone())
                    .or_default()
                    .push(name.clone());
            }
        }
    }

    /// Every mutation goes through here so the generation and the cache move together.
    fn mutated(&mut self) {
        self.generation += 1;
        self.states.clear();
        self.reindex();
    }

    fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.generation.to_le_bytes());
        for rule in self.rules.values() {
            hasher.update(rule.signature().as_bytes());
            hasher.update([0]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Enabled rules matching `filter`, by priority then registration order.
    fn ordered<F>(&self, filter: F) -> Vec<Arc<ValidationRule>>
    where
        F: Fn(&ValidationRule) -> bool,
    {
        let mut rules: Vec<Arc<ValidationRule>> = self
            .rules
            .values()
            .filter(|r| r.enabled && filter(r))
            .cloned()
            .collect();
        // Stable sort keeps registration order among equal priorities.
        rules.sort_by_key(|r| r.priority);
        rules
    }
}

/// Registry of named rules for one session.
///
/// Reads share the lock; every mutation takes the single writer lock, bumps
/// the generation and drops all cached [`ValidationState`]s in the same step.
pub struct RuleRegistry {
    inner: RwLock<Inner>,
    replace_policy: ReplacePolicy,
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new(ReplacePolicy::default())
    }
}

impl RuleRegistry {
    pub fn new(replace_policy: ReplacePolicy) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            replace_policy,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn replace_policy(&self) -> ReplacePolicy {
        self.replace_policy
    }

    /// Register a rule.
    pub fn add_rule(&self, rule: ValidationRule) -> Result<()> {
        rule.validate()?;
        let mut inner = self.write();
        if self.replace_policy == ReplacePolicy::Reject && inner.rules.contains_key(&rule.name) {
            return Err(SieveError::DuplicateRuleName(rule.name));
        }
        debug!(rule = %rule.name, kind = rule.rule_type().label(), "Registering rule");
        inner.rules.insert(rule.name.clone(), Arc::new(rule));
        inner.mutated();
        Ok(())
    }

    /// Register several rules. All are validated before any is inserted.
    pub fn add_rules<I>(&self, rules: I) -> Result<usize>
    where
        I: IntoIterator<Item = ValidationRule>,
    {
        let rules: Vec<ValidationRule> = rules.into_iter().collect();
        for rule in &rules {
            rule.validate()?;
        }

        let mut inner = self.write();
        if self.replace_policy == ReplacePolicy::Reject {
            let mut seen: Vec<&str> = Vec::with_capacity(rules.len());
            for rule in &rules {
                if inner.rules.contains_key(&rule.name) || seen.contains(&rule.name.as_str()) {
                    return Err(SieveError::DuplicateRuleName(rule.name.clone()));
                }
                seen.push(&rule.name);
            }
        }

        let count = rules.len();
        for rule in rules {
            inner.rules.insert(rule.name.clone(), Arc::new(rule));
        }
        if count > 0 {
            inner.mutated();
        }
        debug!(count, total = inner.rules.len(), "Registered rules");
        Ok(count)
    }

    /// Remove a rule by name. Returns false when no such rule exists.
    pub fn remove_rule(&self, name: &str) -> bool {
        let mut inner = self.write();
        let removed = inner.rules.shift_remove(name).is_some();
        if removed {
            inner.mutated();
            debug!(rule = name, "Removed rule");
        }
        removed
    }

    /// Remove every rule depending on `column`.
    pub fn remove_rules_by_column(&self, column: &str) -> usize {
        self.remove_where(|r| r.effective_dependencies().iter().any(|c| c == column))
    }

    /// Remove every rule of the given kind.
    pub fn remove_rules_by_kind(&self, kind: RuleType) -> usize {
        self.remove_where(|r| r.rule_type() == kind)
    }

    fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&ValidationRule) -> bool,
    {
        let mut inner = self.write();
        let before = inner.rules.len();
        inner.rules.retain(|_, rule| !predicate(rule));
        let removed = before - inner.rules.len();
        if removed > 0 {
            inner.mutated();
        }
        removed
    }

    pub fn clear_all(&self) {
        let mut inner = self.write();
        inner.rules.clear();
        inner.mutated();
    }

    pub fn get(&self, name: &str) -> Option<Arc<ValidationRule>> {
        self.read().rules.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().rules.is_empty()
    }

    /// Every registered rule, enabled or not, in registration order.
    pub fn rules(&self) -> Vec<Arc<ValidationRule>> {
        self.read().rules.values().cloned().collect()
    }

    pub fn enabled_rule_count(&self) -> usize {
        self.read().rules.values().filter(|r| r.enabled).count()
    }

    /// Enabled rules whose dependencies include `column`, in evaluation order.
    pub fn rules_for_column(&self, column: &str) -> Vec<Arc<ValidationRule>> {
        let inner = self.read();
        let Some(names) = inner.index.get(column) else {
            return Vec::new();
        };
        inner.ordered(|r| names.contains(&r.name))
    }

    /// Enabled column-scoped rules, in evaluation order.
    pub fn column_scoped_rules(&self) -> Vec<Arc<ValidationRule>> {
        self.read().ordered(|r| !r.is_dataset_scoped())
    }

    /// Enabled group and duplicate rules, in evaluation order.
    pub fn all_dataset_scoped_rules(&self) -> Vec<Arc<ValidationRule>> {
        self.read().ordered(ValidationRule::is_dataset_scoped)
    }

    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// SHA-256 over every rule's signature and the generation counter.
    pub fn fingerprint(&self) -> String {
        self.read().fingerprint()
    }

    /// Cached state for `scope`, if it was computed under the current rules
    /// and against `data_version` of the rows.
    pub fn cached_state(&self, scope: Scope, data_version: u64) -> Option<ValidationState> {
        let inner = self.read();
        let current = inner.fingerprint();
        inner
            .states
            .get(&scope)
            .filter(|s| s.fingerprint == current && s.data_version == data_version)
            .cloned()
    }

    /// Store a result computed under `fingerprint` against `data_version`.
    ///
    /// Dropped when the rules changed while it was being computed.
    pub fn store_state(
        &self,
        scope: Scope,
        all_valid: bool,
        fingerprint: &str,
        data_version: u64,
    ) -> bool {
        let mut inner = self.write();
        if inner.fingerprint() != fingerprint {
            debug!(?scope, "Rules changed during evaluation; not caching result");
            return false;
        }
        inner.states.insert(
            scope,
            ValidationState {
                all_valid,
                computed_at: Utc::now(),
                fingerprint: fingerprint.to_string(),
                data_version,
            },
        );
        true
    }

    /// Mark every scope stale without touching the rules.
    pub fn invalidate_states(&self) {
        let mut inner = self.write();
        inner.generation += 1;
        inner.states.clear();
    }
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.read();
        f.debug_struct("RuleRegistry")
            .field("rules", &inner.rules.len())
            .field("generation", &inner.generation)
            .field("replace_policy", &self.replace_policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::rules::{CompareOp, RowPredicate};
    use crate::validation::Severity;

    #[test]
    fn test_index_and_priority_order() {
        let registry = RuleRegistry::default();
        registry
            .add_rules([
                ValidationRule::required("b_required", "b").with_priority(5),
                ValidationRule::compare_columns("b_after_a", "b", CompareOp::Ge, "a"),
                ValidationRule::required("a_required", "a"),
                ValidationRule::required("b_late", "b").with_priority(5),
            ])
            .unwrap();

        let names: Vec<String> = registry
            .rules_for_column("b")
            .iter()
            .map(|r| r.name.clone())
            .collect();
        assert_eq!(names, vec!["b_after_a", "b_required", "b_late"]);

        let names: Vec<String> = registry
            .rules_for_column("a")
            .iter()
            .map(|r| r.name.clone())
            .collect();
        assert_eq!(names, vec!["b_after_a", "a_required"]);
        assert!(registry.rules_for_column("zzz").is_empty());
    }

    #[test]
    fn test_disabled_rules_excluded() {
        let registry = RuleRegistry::default();
        registry
            .add_rule(ValidationRule::required("off", "a").disabled())
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.enabled_rule_count(), 0);
        assert!(registry.rules_for_column("a").is_empty());
    }

    #[test]
    fn test_replace_and_reject() {
        let registry = RuleRegistry::default();
        registry.add_rule(ValidationRule::required("r", "a")).unwrap();
        registry
            .add_rule(ValidationRule::required("r", "a").with_severity(Severity::Warning))
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("r").unwrap().severity, Severity::Warning);

        let strict = RuleRegistry::new(ReplacePolicy::Reject);
        strict.add_rule(ValidationRule::required("r", "a")).unwrap();
        let err = strict.add_rule(ValidationRule::required("r", "b")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateRuleName);
    }

    #[test]
    fn test_bulk_add_is_all_or_nothing() {
        let registry = RuleRegistry::default();
        let result = registry.add_rules([
            ValidationRule::required("ok", "a"),
            ValidationRule::custom("bad", Vec::<String>::new(), |_, _, _| Ok(true)),
        ]);
        assert!(result.is_err());
        assert!(registry.is_empty());

        let strict = RuleRegistry::new(ReplacePolicy::Reject);
        let result = strict.add_rules([
            ValidationRule::required("same", "a"),
            ValidationRule::required("same", "b"),
        ]);
        assert!(result.is_err());
        assert!(strict.is_empty());
    }

    #[test]
    fn test_remove_operations() {
        let registry = RuleRegistry::default();
        registry
            .add_rules([
                ValidationRule::required("a_required", "a"),
                ValidationRule::required("b_required", "b"),
                ValidationRule::group("ab", ["a", "b"], RowPredicate::function(|_| true)),
            ])
            .unwrap();

        assert_eq!(registry.remove_rules_by_column("a"), 2);
        assert_eq!(registry.len(), 1);
        assert!(!registry.remove_rule("a_required"));
        assert_eq!(registry.remove_rules_by_kind(RuleType::Required), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dataset_scoped_partition() {
        let registry = RuleRegistry::default();
        registry
            .add_rules([
                ValidationRule::required("a_required", "a"),
                ValidationRule::at_least_one_of("contact", ["phone", "email"]),
            ])
            .unwrap();

        assert_eq!(registry.column_scoped_rules().len(), 1);
        assert_eq!(registry.all_dataset_scoped_rules().len(), 1);
        assert_eq!(registry.rules_for_column("email").len(), 1);
    }

    #[test]
    fn test_fingerprint_changes_on_readd() {
        let registry = RuleRegistry::default();
        registry.add_rule(ValidationRule::required("r", "a")).unwrap();
        let first = registry.fingerprint();
        assert_eq!(first, registry.fingerprint());

        registry.add_rule(ValidationRule::required("r", "a")).unwrap();
        assert_ne!(first, registry.fingerprint());
    }

    #[test]
    fn test_state_cache_invalidation() {
        let registry = RuleRegistry::default();
        registry.add_rule(ValidationRule::required("r", "a")).unwrap();

        let fingerprint = registry.fingerprint();
        assert!(registry.store_state(Scope::Whole, true, &fingerprint, 0));
        assert!(registry.cached_state(Scope::Whole, 0).unwrap().all_valid);
        assert!(registry.cached_state(Scope::Filtered, 0).is_none());

        registry.add_rule(ValidationRule::required("s", "b")).unwrap();
        assert!(registry.cached_state(Scope::Whole, 0).is_none());

        // A result computed under stale rules is not stored.
        assert!(!registry.store_state(Scope::Whole, true, &fingerprint, 0));

        let fingerprint = registry.fingerprint();
        registry.store_state(Scope::Whole, false, &fingerprint, 0);
        registry.invalidate_states();
        assert!(registry.cached_state(Scope::Whole, 0).is_none());
    }

    #[test]
    fn test_state_tied_to_data_version() {
        let registry = RuleRegistry::default();
        registry.add_rule(ValidationRule::required("r", "a")).unwrap();

        let fingerprint = registry.fingerprint();
        registry.store_state(Scope::Whole, true, &fingerprint, 3);
        assert!(registry.cached_state(Scope::Whole, 3).is_some());
        assert!(registry.cached_state(Scope::Whole, 4).is_none());
    }
}
