//! Integration tests for duplicate detection against file-backed sources.

use std::io::Write;
use std::sync::Arc;

use tempfile::NamedTempFile;

use sieve::duplicate::Normalization;
use sieve::{
    ComparisonStrategy, DeletionCriteria, DelimitedFileSource, DuplicateDetector,
    DuplicateOptions, HandlingMode, RetentionStrategy, RowSource, RuleFile, Scope, Sieve,
};

/// Helper to create a temporary file with given content.
fn create_test_file(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".csv")
        .tempfile()
        .expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write to temp file");
    file
}

fn contacts() -> NamedTempFile {
    create_test_file(
        "id,email,score,city\n\
         1,ada@x.org,10.0,Paris\n\
         2,ADA@X.ORG ,10.2,\n\
         3,bob@x.org,7,Lyon\n\
         4,cy@x.org,3,Nice\n\
         5,bob@x.org,9,Lyon\n",
    )
}

fn load(file: &NamedTempFile) -> Arc<DelimitedFileSource> {
    Arc::new(DelimitedFileSource::load(file.path()).expect("Failed to load"))
}

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_exact_trimmed_case_insensitive() {
    let file = contacts();
    let source = load(&file);
    let rows = source.rows().rows();

    let options = DuplicateOptions::keep_first_delete_rest().ignore_case();
    let groups = DuplicateDetector::detect(&rows, &columns(&["email"]), &options);

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].row_ids.len(), 2);
    assert_eq!(groups[0].retained.map(|id| id.0), Some(1));
    assert_eq!(groups[1].removed.iter().map(|id| id.0).collect::<Vec<_>>(), vec![5]);
}

#[test]
fn test_numeric_tolerance() {
    let file = contacts();
    let rows = load(&file).rows().rows();

    let options = DuplicateOptions::new(ComparisonStrategy::NumericTolerance { epsilon: 0.5 });
    let groups = DuplicateDetector::detect(&rows, &columns(&["score"]), &options);

    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].row_ids.iter().map(|id| id.0).collect::<Vec<_>>(), vec![1, 2]);
}

#[tokio::test]
async fn test_keep_most_complete_and_write_back() {
    let file = contacts();
    let source = load(&file);
    let sieve = Sieve::new(source.clone());

    let options = DuplicateOptions::new(ComparisonStrategy::Exact)
        .with_normalization(Normalization::loose())
        .with_retention(RetentionStrategy::KeepMostComplete);
    let plan = sieve
        .plan_deletion(&DeletionCriteria::duplicates(["email"], options))
        .await
        .unwrap();
    assert_eq!(plan.to_remove.len(), 2);

    let report = sieve.apply_deletion(&plan).await.unwrap();
    assert_eq!(report.deleted, 2);
    assert_eq!(report.remaining, 3);
    assert_eq!(source.total_rows(Scope::Whole).await, Some(3));

    let out = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    assert_eq!(source.write_to(out.path()).unwrap(), 3);
    let written = std::fs::read_to_string(out.path()).unwrap();
    assert!(written.starts_with("id,email,score,city\n1,ada@x.org"));
    assert!(!written.contains("ADA@X.ORG"));
}

#[tokio::test]
async fn test_mark_only_removes_nothing() {
    let file = contacts();
    let source = load(&file);
    let sieve = Sieve::new(source.clone());

    let options = DuplicateOptions::keep_first_delete_rest()
        .ignore_case()
        .with_handling(HandlingMode::MarkOnly);
    let plan = sieve
        .plan_deletion(&DeletionCriteria::duplicates(["email"], options))
        .await
        .unwrap();

    assert!(plan.is_empty());
    assert_eq!(plan.duplicate_summary().unwrap().groups, 2);
    let report = sieve.apply_deletion(&plan).await.unwrap();
    assert_eq!(report.deleted, 0);
    assert_eq!(report.remaining, 5);
}

#[tokio::test]
async fn test_delete_all_members() {
    let file = contacts();
    let source = load(&file);
    let sieve = Sieve::new(source.clone());

    let options = DuplicateOptions::keep_first_delete_rest().with_handling(HandlingMode::DeleteAll);
    let plan = sieve
        .plan_deletion(&DeletionCriteria::duplicates(["email", "city"], options))
        .await
        .unwrap();

    assert_eq!(plan.to_remove.iter().map(|id| id.0).collect::<Vec<_>>(), vec![3, 5]);
    sieve.apply_deletion(&plan).await.unwrap();
    assert_eq!(source.rows().len(), 3);
}

#[tokio::test]
async fn test_rule_file_duplicate_rule() {
    let file = contacts();
    let source = load(&file);
    let sieve = Sieve::new(source);

    let rules = RuleFile::from_json_str(
        r#"{
            "rules": [
                { "name": "email_required", "kind": "required", "column": "email" },
                {
                    "name": "unique_email",
                    "kind": "duplicate",
                    "severity": "warning",
                    "columns": ["email"],
                    "options": { "normalization": { "ignore_case": true } }
                }
            ]
        }"#,
    )
    .unwrap()
    .into_rules(sieve.config())
    .unwrap();
    assert_eq!(sieve.add_rules(rules).unwrap(), 2);

    let report = sieve
        .validate_dataset(Scope::Whole, &sieve.context())
        .await
        .unwrap();
    assert_eq!(report.duplicate_groups.len(), 2);
    assert_eq!(report.counts.warning, 2);
    assert_eq!(
        report.invalid().map(|r| r.row_id.0).collect::<Vec<_>>(),
        vec![2, 5]
    );
}

#[test]
fn test_invalid_epsilon_rejected() {
    let options = DuplicateOptions::new(ComparisonStrategy::NumericTolerance { epsilon: -1.0 });
    assert!(options.validate().is_err());
}
