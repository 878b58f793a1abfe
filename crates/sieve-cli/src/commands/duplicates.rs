//! Duplicates command - report duplicate rows.

use std::path::PathBuf;

use colored::Colorize;
use sieve::duplicate::DuplicateSummary;
use sieve::{DuplicateDetector, HandlingMode};

use crate::cli::DuplicateArgs;

use super::{check_columns, duplicate_options, load_source, print_groups, CommandResult};

const MAX_LISTED: usize = 25;

pub async fn run(file: PathBuf, args: DuplicateArgs, json_output: bool, verbose: bool) -> CommandResult {
    let source = load_source(&file)?;
    check_columns(&source, &args.columns)?;
    let options = duplicate_options(&args)?.with_handling(HandlingMode::MarkOnly);

    let rows = source.rows().rows();
    let groups = DuplicateDetector::detect(&rows, &args.columns, &options);
    let summary = DuplicateSummary::from_groups(&groups);

    if json_output {
        let output = serde_json::json!({
            "file": file.display().to_string(),
            "columns": args.columns,
            "strategy": options.strategy.label(),
            "summary": summary,
            "groups": groups,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(0);
    }

    println!(
        "{} {} on [{}] ({})",
        "Duplicates in".cyan().bold(),
        file.display().to_string().white(),
        args.columns.join(", "),
        options.strategy.label()
    );
    println!();

    if groups.is_empty() {
        println!("{}", "No duplicate rows found.".green().bold());
        return Ok(0);
    }

    let limit = if verbose { groups.len() } else { MAX_LISTED };
    print_groups(&groups, limit);
    println!();
    println!(
        "{} group(s), {} rows involved, {} would be removed.",
        summary.groups.to_string().yellow().bold(),
        summary.duplicate_rows,
        (summary.duplicate_rows - summary.groups).to_string().red()
    );
    println!(
        "Run {} to remove them.",
        format!(
            "sieve dedupe {} --columns {} --output <FILE>",
            file.display(),
            args.columns.join(",")
        )
        .cyan()
        .bold()
    );

    Ok(0)
}
