//! log-merge CLI tool
//!
//! Merges two timestamp-ordered JSON line logs into a new file.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use log_merge::{files::DEFAULT_BUFFER_SIZE, merge_files, MergeOptions};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "log-merge", version)]
#[command(about = "Log merge tool")]
struct Cli {
    /// First log file to merge; wins ties
    #[arg(value_name = "INPUT")]
    left: PathBuf,

    /// Second log file to merge
    #[arg(value_name = "INPUT")]
    right: PathBuf,

    /// Path to the output log
    #[arg(short, long, value_name = "OUTPUT")]
    output: PathBuf,

    /// Record field holding the timestamp
    #[arg(long, env = "LOG_MERGE_KEY", default_value = "timestamp")]
    key: String,

    /// I/O buffer size in bytes
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let options = MergeOptions::builder()
        .with_key_field(cli.key)
        .with_buffer_size(cli.buffer_size)
        .build();

    let stats = merge_files([&cli.left, &cli.right], &cli.output, &options)
        .with_context(|| format!("failed to merge logs into {}", cli.output.display()))?;

    info!(
        left = stats.left,
        right = stats.right,
        output = %cli.output.display(),
        "done"
    );
    Ok(())
}
