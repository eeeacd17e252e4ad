use chrono::{TimeZone, Utc};
use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use responsecache::ResponseStore;
use responsecache::cli::{Cli, Command};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn format_ts(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let path = cli.path.unwrap_or_else(responsecache::default_db_path);
    let store =
        ResponseStore::open(&path).with_context(|| format!("Failed to open cache at {}", path.display()))?;

    info!("rc using {}", store.path().display());

    match cli.command {
        Command::Stats => {
            let stats = store.stats()?;
            println!("Cache: {}", store.path().display().to_string().cyan());
            println!("  Entries: {}", stats.entry_count);
            println!("  Total bytes: {}", stats.total_bytes);
            if let Some(oldest) = stats.oldest_inserted_at {
                println!("  Oldest: {}", format_ts(oldest));
            }
            if let Some(newest) = stats.newest_inserted_at {
                println!("  Newest: {}", format_ts(newest));
            }
        }
        Command::List { limit } => {
            let entries = store.list(limit)?;
            if entries.is_empty() {
                println!("No cached responses");
            } else {
                for e in entries {
                    println!(
                        "{} {} {}",
                        e.key.yellow(),
                        format_ts(e.inserted_at).dimmed(),
                        format!("{}B", e.bytes)
                    );
                }
            }
        }
        Command::Get { key } => match store.get(&key)? {
            Some(value) => println!("{}", value),
            None => {
                eprintln!("{} No entry for {}", "✗".red(), key);
                std::process::exit(1);
            }
        },
        Command::Remove { key } => {
            if store.remove(&key)? {
                println!("{} Removed {}", "✓".green(), key);
            } else {
                println!("No entry for {}", key);
            }
        }
        Command::Clear => {
            let removed = store.clear()?;
            println!("{} Cleared {} entries", "✓".green(), removed);
        }
    }

    Ok(())
}
