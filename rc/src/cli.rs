//! CLI argument parsing for rc

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rc")]
#[command(author, version, about = "Inspect and manage the inference response cache", long_about = None)]
pub struct Cli {
    /// Path to the cache database (default: <data dir>/protoforge/responses.db)
    #[arg(short, long)]
    pub path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show entry count and size
    Stats,

    /// List cached keys, newest first
    List {
        /// Maximum entries to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Print the stored value for a key
    Get {
        /// Cache key (hex digest)
        #[arg(required = true)]
        key: String,
    },

    /// Remove one entry
    Remove {
        /// Cache key (hex digest)
        #[arg(required = true)]
        key: String,
    },

    /// Remove every entry
    Clear,
}
