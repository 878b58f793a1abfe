//! Sieve CLI - rule-driven validation for tabular datasets.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the tracing subscriber. `SIEVE_LOG` wins over `RUST_LOG`.
fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "sieve=debug" } else { "sieve=warn" };
    let env_filter = EnvFilter::try_from_env("SIEVE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async {
        match cli.command {
            Commands::Check { file, rules, json } => {
                commands::check::run(file, rules, json, cli.verbose).await
            }

            Commands::Duplicates {
                file,
                options,
                json,
            } => commands::duplicates::run(file, options, json, cli.verbose).await,

            Commands::Dedupe {
                file,
                options,
                output,
                dry_run,
            } => commands::dedupe::run(file, options, output, dry_run, cli.verbose).await,
        }
    });

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
