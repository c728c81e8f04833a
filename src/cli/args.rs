//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// setup-bazel - Bazel build caches for CI runners
///
/// Restores or mounts bazel caches before a build and saves, collects or
/// commits them afterwards.
#[derive(Parser, Debug)]
#[command(name = "setup-bazel")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SETUP_BAZEL_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write bazelrc, then restore or mount caches
    Pre,

    /// Unmount sticky disks, collect garbage and save caches
    Post,

    /// Print the content hash of the files matched by glob patterns
    Hash(HashArgs),

    /// Collect garbage in a cache directory
    Gc(GcArgs),
}

/// Output format for the hash command
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Plain,
    Json,
}

/// Arguments for the hash command
#[derive(Parser, Debug)]
pub struct HashArgs {
    /// Glob patterns; prefix with ! to exclude
    #[arg(required = true)]
    pub patterns: Vec<String>,

    /// Directory patterns are resolved against (default: current directory)
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Follow symbolic links while matching
    #[arg(long)]
    pub follow_symlinks: bool,

    /// List the matched files as well
    #[arg(long)]
    pub files: bool,

    /// Output format
    #[arg(short, long, default_value = "plain")]
    pub format: OutputFormat,
}

/// Arguments for the gc command
#[derive(Parser, Debug)]
pub struct GcArgs {
    /// Cache directory to collect
    pub dir: PathBuf,

    /// Size budget in GiB
    #[arg(long)]
    pub max_size: f64,

    /// Only record the baseline identity hash
    #[arg(long)]
    pub init: bool,
}
