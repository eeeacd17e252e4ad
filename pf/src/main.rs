//! Protoforge - budget-aware batch runner
//!
//! CLI entry point for running request batches and inspecting the cache.

use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info};

use protoforge::batch::{ResponseLine, read_tasks};
use protoforge::cli::{CacheCommand, Cli, Command};
use protoforge::config::Config;
use protoforge::dispatch::{Dispatcher, ProgressEvent};
use protoforge::llm::create_client;
use protoforge::scheduler::Scheduler;
use protoforge::{ResponseCache, SqliteCache};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("protoforge")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let log_file = fs::File::create(log_dir.join("protoforge.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!("Protoforge loaded config: model={}", config.llm.model);

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run {
            input,
            concurrency,
            no_cache,
            output,
        } => {
            debug!(?input, ?concurrency, no_cache, ?output, "main: matched Run command");
            cmd_run(&config, &input, concurrency, no_cache, output.as_deref()).await
        }
        Command::Report => {
            debug!("main: matched Report command");
            cmd_report(&config)
        }
        Command::Cache { command } => {
            debug!(?command, "main: matched Cache command");
            cmd_cache(&config, command).await
        }
    }
}

/// Run a JSONL batch through the scheduler
async fn cmd_run(
    config: &Config,
    input: &Path,
    concurrency: Option<usize>,
    no_cache: bool,
    output: Option<&Path>,
) -> Result<()> {
    debug!(?input, ?concurrency, no_cache, "cmd_run: called");
    config.validate()?;

    let reader: Box<dyn BufRead> = if input == Path::new("-") {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = fs::File::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
        Box::new(BufReader::new(file))
    };
    let tasks = read_tasks(reader, &config.llm.model).context("Failed to read requests")?;
    if tasks.is_empty() {
        eprintln!("No requests in {}", input.display());
        return Ok(());
    }

    let client = create_client(&config.llm).context("Failed to create LLM client")?;
    let cache: Option<Arc<dyn ResponseCache>> = if no_cache || !config.cache.enabled {
        debug!("cmd_run: cache disabled");
        None
    } else {
        let cache = SqliteCache::open(&config.cache.path)
            .with_context(|| format!("Failed to open cache at {}", config.cache.path.display()))?;
        Some(Arc::new(cache))
    };
    let scheduler = Scheduler::new(&config.scheduler, client, cache, config.pricing.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher::new(concurrency.unwrap_or(config.scheduler.max_concurrent)).with_events(tx);
    let total = tasks.len();
    let progress = dispatcher.progress();
    let reporter = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let ProgressEvent::Finished { index, ok } = event {
                let snapshot = progress.snapshot();
                let mark = if ok { "✓".green() } else { "✗".red() };
                eprintln!(
                    "{} [{}/{}] request {} (in flight: {})",
                    mark,
                    snapshot.completed,
                    total,
                    index,
                    snapshot.in_flight.len()
                );
            }
        }
    });

    info!(total, concurrency = dispatcher.concurrency(), "Starting batch");
    let outcomes = scheduler.execute_all(tasks, &dispatcher).await;
    drop(dispatcher);
    reporter.await.context("Progress reporter failed")?;

    let mut sink: Box<dyn Write> = match output {
        Some(path) => Box::new(fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?),
        None => Box::new(io::stdout().lock()),
    };
    let mut failed = 0;
    for outcome in outcomes {
        let line = ResponseLine::from(outcome);
        if !line.ok {
            failed += 1;
        }
        serde_json::to_writer(&mut sink, &line)?;
        writeln!(sink)?;
    }
    sink.flush()?;

    eprintln!();
    eprint!("{}", scheduler.accountant().format_report());
    if failed > 0 {
        eprintln!("{} {} of {} requests failed", "✗".red(), failed, total);
    } else {
        eprintln!("{} All {} requests succeeded", "✓".green(), total);
    }
    Ok(())
}

/// Print the effective pricing table
fn cmd_report(config: &Config) -> Result<()> {
    debug!("cmd_report: called");
    println!("{}", "Pricing (USD per million tokens)".bold());
    println!(
        "  {:<28} {:>8} {:>8} {:>12} {:>11}",
        "model", "input", "output", "cache-write", "cache-read"
    );
    for (model, p) in config.pricing.iter() {
        println!(
            "  {} {:>8.2} {:>8.2} {:>12.2} {:>11.2}",
            format!("{:<28}", model).cyan(),
            p.input,
            p.output,
            p.cache_write,
            p.cache_read
        );
    }
    Ok(())
}

/// Inspect or clear the configured response cache
async fn cmd_cache(config: &Config, command: CacheCommand) -> Result<()> {
    debug!(?command, "cmd_cache: called");
    let path = &config.cache.path;
    let cache = SqliteCache::open(path).with_context(|| format!("Failed to open cache at {}", path.display()))?;

    match command {
        CacheCommand::Stats => {
            let stats = cache.stats().await?;
            println!("Cache: {}", path.display().to_string().cyan());
            println!("  Entries: {}", stats.entry_count);
            println!("  Total bytes: {}", stats.total_bytes);
        }
        CacheCommand::Clear => {
            let removed = cache.clear().await?;
            println!("{} Cleared {} entries", "✓".green(), removed);
        }
    }
    Ok(())
}
