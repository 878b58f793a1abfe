//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use sieve::config::{ComparisonChoice, KeepChoice};

/// Sieve: rule-driven validation for tabular datasets
#[derive(Parser)]
#[command(name = "sieve")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a data file against a rule file
    Check {
        /// Path to the data file (CSV/TSV)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// JSON rule file
        #[arg(short, long, value_name = "RULES")]
        rules: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report duplicate rows without changing anything
    Duplicates {
        /// Path to the data file (CSV/TSV)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[command(flatten)]
        options: DuplicateArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove duplicate rows and write the cleaned file
    Dedupe {
        /// Path to the data file (CSV/TSV)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[command(flatten)]
        options: DuplicateArgs,

        /// Output path for the cleaned file
        #[arg(short, long)]
        output: PathBuf,

        /// Show the plan without writing anything
        #[arg(long)]
        dry_run: bool,
    },
}

/// Duplicate detection flags shared by `duplicates` and `dedupe`.
#[derive(Args, Clone, Debug)]
pub struct DuplicateArgs {
    /// Comparison columns, comma separated
    #[arg(short, long, value_delimiter = ',', required = true)]
    pub columns: Vec<String>,

    /// Comparison strategy (exact, fuzzy, hash, numeric)
    #[arg(short, long, default_value = "exact")]
    pub strategy: ComparisonChoice,

    /// Tolerance for the numeric strategy
    #[arg(long, default_value = "0.0")]
    pub epsilon: f64,

    /// Compare text case-insensitively
    #[arg(short = 'i', long)]
    pub ignore_case: bool,

    /// Row to keep (first, last, most-complete, highest:<col>, lowest:<col>)
    #[arg(short, long, default_value = "first")]
    pub keep: KeepChoice,
}
