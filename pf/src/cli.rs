//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Protoforge - rate-limit aware batch runner for inference requests
#[derive(Parser)]
#[command(
    name = "pf",
    about = "Run batches of inference requests under rate-limit budgets",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every request in a JSONL file through the scheduler
    Run {
        /// File with one request per line ("-" for stdin)
        #[arg(value_name = "REQUESTS")]
        input: PathBuf,

        /// Concurrent workers (overrides scheduler.max-concurrent)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Bypass the response cache
        #[arg(long)]
        no_cache: bool,

        /// Write responses here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show configured model pricing
    Report,

    /// Inspect or clear the response cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

/// Response cache subcommands
#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Entry count, size and age range
    Stats,

    /// Remove every cached response
    Clear,
}
