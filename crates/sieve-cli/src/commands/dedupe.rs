//! Dedupe command - remove duplicate rows and write the cleaned file.

use std::path::PathBuf;

use colored::Colorize;
use sieve::{DeletionCriteria, Sieve};
use tracing::info;

use crate::cli::DuplicateArgs;

use super::{check_columns, duplicate_options, load_source, print_groups, CommandResult};

pub async fn run(
    file: PathBuf,
    args: DuplicateArgs,
    output: PathBuf,
    dry_run: bool,
    verbose: bool,
) -> CommandResult {
    if output == file {
        return Err("Refusing to overwrite the input file; choose another --output".into());
    }

    let source = load_source(&file)?;
    check_columns(&source, &args.columns)?;
    let options = duplicate_options(&args)?;

    let sieve = Sieve::new(source.clone());
    let plan = sieve
        .plan_deletion(&DeletionCriteria::duplicates(args.columns.clone(), options))
        .await?;

    println!(
        "{} {} row(s) in {} duplicate group(s)",
        "Removing".cyan().bold(),
        plan.to_remove.len().to_string().red().bold(),
        plan.duplicate_groups.len()
    );
    if verbose {
        print_groups(&plan.duplicate_groups, plan.duplicate_groups.len());
    }

    if dry_run {
        println!("{}", "Dry run: nothing written.".yellow());
        return Ok(0);
    }

    let report = sieve.apply_deletion(&plan).await?;
    for failure in &report.failed {
        println!(
            "  {} row {}: {}",
            "FAILED".red(),
            failure.row_id,
            failure.reason
        );
    }

    let written = source.write_to(&output)?;
    info!(output = %output.display(), rows = written, "Wrote cleaned file");
    println!(
        "Wrote {} rows to {} ({} removed)",
        written.to_string().green().bold(),
        output.display().to_string().white(),
        report.deleted
    );

    if report.is_complete() { Ok(0) } else { Ok(1) }
}
