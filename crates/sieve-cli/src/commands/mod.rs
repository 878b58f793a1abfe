//! CLI command implementations.

pub mod check;
pub mod dedupe;
pub mod duplicates;

use std::path::Path;
use std::sync::Arc;

use colored::Colorize;
use sieve::duplicate::Normalization;
use sieve::{DelimitedFileSource, DuplicateGroup, DuplicateOptions};

use crate::cli::DuplicateArgs;

type CommandResult = Result<i32, Box<dyn std::error::Error>>;

/// Load a delimited file, failing with a readable message when it is missing.
fn load_source(file: &Path) -> Result<Arc<DelimitedFileSource>, Box<dyn std::error::Error>> {
    if !file.exists() {
        return Err(format!("File not found: {}", file.display()).into());
    }
    Ok(Arc::new(DelimitedFileSource::load(file)?))
}

fn duplicate_options(args: &DuplicateArgs) -> Result<DuplicateOptions, Box<dyn std::error::Error>> {
    let options = DuplicateOptions::new(args.strategy.into_strategy(args.epsilon))
        .with_normalization(Normalization::default().with_ignore_case(args.ignore_case))
        .with_retention(args.keep.clone().into());
    options.validate()?;
    Ok(options)
}

/// Reject comparison columns the file does not have.
fn check_columns(source: &DelimitedFileSource, columns: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let missing: Vec<&str> = columns
        .iter()
        .filter(|c| !source.headers().contains(c))
        .map(String::as_str)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "Unknown column(s): {}. Available: {}",
            missing.join(", "),
            source.headers().join(", ")
        )
        .into())
    }
}

fn print_groups(groups: &[DuplicateGroup], limit: usize) {
    for (i, group) in groups.iter().take(limit).enumerate() {
        let key: Vec<String> = group.key.iter().map(|v| v.to_string()).collect();
        let ids: Vec<String> = group.row_ids.iter().map(|id| id.to_string()).collect();
        let kept = group
            .retained
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".to_string());
        println!(
            "  {} [{}] rows {} (keep {})",
            format!("#{}", i + 1).dimmed(),
            key.join(", ").white().bold(),
            ids.join(", "),
            kept.green()
        );
    }
    if groups.len() > limit {
        println!("  ... and {} more group(s)", groups.len() - limit);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use sieve::config::{ComparisonChoice, KeepChoice};
    use sieve::{ComparisonStrategy, RetentionStrategy};

    use super::*;

    fn args(strategy: ComparisonChoice, epsilon: f64) -> DuplicateArgs {
        DuplicateArgs {
            columns: vec!["email".to_string()],
            strategy,
            epsilon,
            ignore_case: true,
            keep: KeepChoice::MostComplete,
        }
    }

    #[test]
    fn test_duplicate_options_from_args() {
        let options = duplicate_options(&args(ComparisonChoice::Exact, 0.0)).unwrap();
        assert!(matches!(options.strategy, ComparisonStrategy::Exact));
        assert!(options.normalization.ignore_case);
        assert!(matches!(options.retention, RetentionStrategy::KeepMostComplete));

        assert!(duplicate_options(&args(ComparisonChoice::Numeric, -1.0)).is_err());
    }

    #[test]
    fn test_unknown_columns_rejected() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(b"id,email\n1,a@x\n").unwrap();
        let source = load_source(file.path()).unwrap();

        assert!(check_columns(&source, &["email".to_string()]).is_ok());
        let err = check_columns(&source, &["phone".to_string()]).unwrap_err();
        assert!(err.to_string().contains("phone"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_source(Path::new("/nonexistent/data.csv")).unwrap_err();
        assert!(err.to_string().starts_with("File not found"));
    }
}
