//! setup-bazel - Bazel build caches for CI runners
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use setup_bazel::cli::{commands, Cli, Commands};
use setup_bazel::config::ConfigManager;
use setup_bazel::error::SetupResult;
use setup_bazel::state;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> SetupResult<()> {
    let cli = Cli::parse();

    // Initialize logging: 0 = info, 1 = debug, 2+ = trace; RUST_LOG wins
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match cli.verbose {
        0 => EnvFilter::new("setup_bazel=info"),
        1 => EnvFilter::new("setup_bazel=debug"),
        _ => EnvFilter::new("setup_bazel=trace"),
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    // Debugging commands don't need config loading
    let command = match cli.command {
        Commands::Hash(args) => return commands::hash(args).await,
        Commands::Gc(args) => return commands::gc(args).await,
        other => other,
    };

    let config_manager = match cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new(),
    };

    match command {
        Commands::Pre => {
            let result = match config_manager.load_resolved().await {
                Ok(config) => commands::pre(config).await,
                Err(e) => Err(e),
            };
            let result = commands::absorb_non_fatal(result);
            if result.is_err() {
                record_failure();
            }
            result
        }
        Commands::Post => {
            let result = match config_manager.load_resolved().await {
                Ok(config) => commands::post(config).await,
                Err(e) => Err(e),
            };
            commands::absorb_non_fatal(result)
        }
        Commands::Hash(_) | Commands::Gc(_) => unreachable!("handled above"),
    }
}

/// Mark the run failed so the post-phase discards instead of committing
fn record_failure() {
    match state::detect() {
        Ok(store) => {
            if let Err(e) = state::mark_run_failed(store.as_ref()) {
                debug!("Could not record run failure: {}", e);
            }
        }
        Err(e) => debug!("No state store to record run failure: {}", e),
    }
}
