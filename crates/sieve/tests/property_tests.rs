//! Property-based tests for outcome aggregation and duplicate detection.
//!
//! # Running Property Tests
//!
//! ```bash
//! # Run all property tests
//! cargo test -p sieve --test property_tests
//!
//! # Run with more cases (slower but more thorough)
//! PROPTEST_CASES=10000 cargo test -p sieve --test property_tests
//! ```

use std::collections::HashSet;

use proptest::prelude::*;

use sieve::validation::combine;
use sieve::{
    CellValue, DuplicateDetector, DuplicateOptions, Row, RowId, Severity, ValidationContext,
    ValidationOutcome, ValidationRule,
};

// =============================================================================
// Test Strategies
// =============================================================================

fn severity() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Information),
        Just(Severity::Warning),
        Just(Severity::Error),
        Just(Severity::Critical),
    ]
}

/// Outcomes drawn from a small message pool so duplicates are common.
fn outcome() -> impl Strategy<Value = ValidationOutcome> {
    prop_oneof![
        1 => Just(ValidationOutcome::valid()),
        3 => (severity(), 0..4usize, 0..3usize).prop_map(|(severity, msg, col)| {
            ValidationOutcome::invalid(severity, format!("message {msg}"))
                .with_columns([format!("col_{col}")])
                .with_rule(format!("rule_{msg}"))
        }),
    ]
}

fn outcomes() -> impl Strategy<Value = Vec<ValidationOutcome>> {
    prop::collection::vec(outcome(), 0..12)
}

fn blank_value() -> impl Strategy<Value = CellValue> {
    prop_oneof![
        Just(CellValue::Null),
        Just(CellValue::List(Vec::new())),
        "[ \\t]{0,8}".prop_map(CellValue::Text),
    ]
}

/// Email-ish rows with frequent collisions under case folding.
fn email_rows() -> impl Strategy<Value = Vec<Row>> {
    prop::collection::vec("[aAbB]@[xX]", 0..20).prop_map(|emails| {
        emails
            .into_iter()
            .enumerate()
            .map(|(i, e)| Row::new(RowId(i as u64 + 1)).with("email", e))
            .collect()
    })
}

fn as_set(items: &[String]) -> HashSet<&String> {
    items.iter().collect()
}

// =============================================================================
// Aggregation properties
// =============================================================================

proptest! {
    #[test]
    fn combine_severity_is_order_independent(mut items in outcomes()) {
        let forward = combine(&items);
        items.reverse();
        let backward = combine(&items);

        prop_assert_eq!(forward.is_valid, backward.is_valid);
        prop_assert_eq!(forward.severity, backward.severity);
        prop_assert_eq!(as_set(&forward.messages), as_set(&backward.messages));
    }

    #[test]
    fn combine_is_associative(a in outcomes(), b in outcomes()) {
        let mut all = a.clone();
        all.extend(b.iter().cloned());
        let flat = combine(&all);
        let nested = combine([&combine(&a), &combine(&b)]);

        prop_assert_eq!(flat.is_valid, nested.is_valid);
        if !flat.is_valid {
            prop_assert_eq!(flat.severity, nested.severity);
        }
        prop_assert_eq!(flat.messages, nested.messages);
    }

    #[test]
    fn combine_takes_max_severity(items in outcomes()) {
        let combined = combine(&items);
        let max = items.iter().filter(|o| !o.is_valid).map(|o| o.severity).max();

        match max {
            Some(severity) => {
                prop_assert!(!combined.is_valid);
                prop_assert_eq!(combined.severity, severity);
            }
            None => prop_assert!(combined.is_valid),
        }
    }

    #[test]
    fn combine_is_idempotent_on_repeats(items in outcomes()) {
        let once = combine(&items);
        let mut doubled = items.clone();
        doubled.extend(items.iter().cloned());
        let twice = combine(&doubled);

        prop_assert_eq!(&once.messages, &twice.messages);
        let unique = as_set(&once.messages);
        prop_assert_eq!(unique.len(), once.messages.len());
    }
}

// =============================================================================
// Rule properties
// =============================================================================

proptest! {
    #[test]
    fn required_fails_on_every_blank(value in blank_value(), severity in severity()) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let rule = ValidationRule::required("field_required", "field").with_severity(severity);
        let row = Row::new(RowId(1)).with("other", "x").with("field", value.clone());
        let evaluator = sieve::validation::RuleEvaluator::default();

        let outcome = rt.block_on(evaluator.evaluate(&rule, &value, &row, &ValidationContext::default()));
        prop_assert!(!outcome.is_valid);
        prop_assert_eq!(outcome.severity, severity);
    }
}

// =============================================================================
// Duplicate detection properties
// =============================================================================

proptest! {
    #[test]
    fn duplicate_groups_are_disjoint(rows in email_rows()) {
        let options = DuplicateOptions::keep_first_delete_rest().ignore_case();
        let groups = DuplicateDetector::detect(&rows, &["email".to_string()], &options);

        let mut seen = HashSet::new();
        for group in &groups {
            prop_assert!(group.len() > 1);
            for id in &group.row_ids {
                prop_assert!(seen.insert(*id), "row {} in two groups", id);
            }
        }
        // Case folding leaves at most 2 distinct keys.
        prop_assert!(groups.len() <= 2);
    }

    #[test]
    fn keep_first_retains_earliest_member(rows in email_rows()) {
        let options = DuplicateOptions::keep_first_delete_rest().ignore_case();
        let groups = DuplicateDetector::detect(&rows, &["email".to_string()], &options);

        for group in &groups {
            prop_assert_eq!(group.retained, group.row_ids.iter().min().copied());
            prop_assert_eq!(group.removed.len(), group.len() - 1);
            prop_assert!(!group.removed.contains(&group.row_ids[0]));
        }
    }
}
