//! Check command - validate a data file against a rule file.

use std::path::PathBuf;

use std::sync::Arc;

use colored::Colorize;
use sieve::{DelimitedFileSource, RuleFile, Scope, Severity, Sieve, ValidationReport};

use super::{load_source, CommandResult};

/// Alerts printed before the listing is truncated.
const MAX_LISTED: usize = 20;

pub async fn run(file: PathBuf, rules: PathBuf, json_output: bool, verbose: bool) -> CommandResult {
    let source = load_source(&file)?;
    let rule_file = RuleFile::from_json_file(&rules)?;
    let (registered, report) = evaluate(source.clone(), rule_file).await?;
    let all_valid = report.all_valid;

    if json_output {
        let output = serde_json::json!({
            "file": file.display().to_string(),
            "hash": source.metadata().hash,
            "rules": registered,
            "all_valid": all_valid,
            "report": report,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(if all_valid { 0 } else { 2 });
    }

    println!(
        "{} {}",
        "Checked".cyan().bold(),
        file.display().to_string().white()
    );
    println!(
        "  {} rows ({} empty), {} rules, {} ms",
        report.rows_evaluated + report.empty_rows,
        report.empty_rows,
        registered,
        report.duration.as_millis()
    );
    if verbose {
        println!("  Fingerprint: {}", report.fingerprint.dimmed());
        println!("  Recommended mode: {:?}", report.mode);
    }
    println!();

    println!("{}", "Alerts:".yellow().bold());
    println!("  Critical: {}", report.counts.critical.to_string().red().bold());
    println!("  Errors:   {}", report.counts.error.to_string().red());
    println!("  Warnings: {}", report.counts.warning.to_string().yellow());
    println!("  Info:     {}", report.counts.information.to_string().blue());
    println!();

    let alerts: Vec<_> = report.invalid().flat_map(|r| r.alerts.iter()).collect();
    for alert in alerts.iter().take(MAX_LISTED) {
        let label = match alert.severity {
            Severity::Critical => "CRITICAL".red().bold(),
            Severity::Error => "ERROR".red(),
            Severity::Warning => "WARN".yellow(),
            Severity::Information => "INFO".blue(),
        };
        let column = alert.column.as_deref().unwrap_or("(row)");
        println!(
            "  {:>8} row {} {}: {}",
            label,
            alert.row_id,
            column.white(),
            alert.messages.join("; ")
        );
    }
    if alerts.len() > MAX_LISTED {
        println!("  ... and {} more alert(s)", alerts.len() - MAX_LISTED);
    }
    if !alerts.is_empty() {
        println!();
    }

    if all_valid {
        println!("{}", "All non-empty rows are valid.".green().bold());
        Ok(0)
    } else {
        println!(
            "{} of {} non-empty rows have alerts.",
            report.invalid_rows.to_string().red().bold(),
            report.rows_evaluated
        );
        Ok(2)
    }
}

/// Register the file's rules and run one full pass over the data.
async fn evaluate(
    source: Arc<DelimitedFileSource>,
    rule_file: RuleFile,
) -> Result<(usize, ValidationReport), Box<dyn std::error::Error>> {
    let config = rule_file.config.clone().unwrap_or_default();
    config.validate()?;
    let rules = rule_file.into_rules(&config)?;

    let sieve = Sieve::with_config(source, config);
    let registered = sieve.add_rules(rules)?;
    let report = sieve.validate_dataset(Scope::Whole, &sieve.context()).await?;
    Ok((registered, report))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn test_check_streams_file_once() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(b"name,email\nAda,ada@x.org\nBob,NA\n,\n").unwrap();
        let source = load_source(file.path()).unwrap();
        let rule_file = RuleFile::from_json_str(
            r#"{"rules": [{"name": "email_required", "kind": "required", "column": "email"}]}"#,
        )
        .unwrap();

        let (registered, report) = evaluate(source.clone(), rule_file).await.unwrap();

        assert_eq!(registered, 1);
        assert!(!report.all_valid);
        assert_eq!(report.invalid_rows, 1);
        assert_eq!(report.empty_rows, 1);
        assert_eq!(source.rows().stream_calls(), 1);
    }
}
