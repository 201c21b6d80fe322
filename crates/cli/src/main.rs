//! dialog-differ CLI - Main Entry Point
//!
//! Runs visual regression suites and manages their stored results.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use dialog_differ_common::config::parse_override;
use dialog_differ_common::DifferConfig;

mod commands;
mod output;

use commands::{run, suites};

/// Flags of this CLI that may be written as `--flag=value`
const OWN_FLAGS: &[&str] = &["config", "format", "keep"];

/// dialog-differ - visual regression testing for versioned UI dialogs
///
/// Any `--key=value` argument not listed below overrides the configuration
/// key of the same name, e.g. `--diffTolerance=0`.
#[derive(Parser)]
#[command(name = "dialog-differ")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "DIALOG_DIFFER_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and run a suite
    Run(run::RunArgs),

    /// Inspect and manage stored suite results
    #[command(subcommand)]
    Suites(suites::SuitesCommands),

    /// Print the effective configuration
    Config,
}

/// Separate configuration overrides from the arguments clap parses
fn split_overrides(args: impl IntoIterator<Item = String>) -> (Vec<String>, Vec<String>) {
    let mut cli_args = Vec::new();
    let mut overrides = Vec::new();

    for arg in args {
        match parse_override(&arg) {
            Some((key, _)) if !OWN_FLAGS.contains(&key) => overrides.push(arg),
            _ => cli_args.push(arg),
        }
    }

    (cli_args, overrides)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let (args, overrides) = split_overrides(std::env::args());
    let cli = Cli::parse_from(args);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(dialog_differ_common::default_config_path);
    let mut config = DifferConfig::load(&config_path)?;
    config.apply_overrides(&overrides)?;

    // Initialize logging; RUST_LOG wins over logLevel
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(
        "dialog-differ {}, configuration from {}",
        dialog_differ_common::VERSION,
        config_path.display()
    );

    match cli.command {
        Commands::Run(args) => return run::execute(args, &config, cli.format).await,
        Commands::Suites(cmd) => suites::execute(cmd, &config, cli.format).await?,
        Commands::Config => commands::config::execute(&config, &config_path, cli.format)?,
    }

    Ok(ExitCode::SUCCESS)
}
