//! Groove-Ripple main entry point
//!
//! This is the command-line interface for the Groove-Ripple account crawler.

use anyhow::Context;
use clap::Parser;
use groove_ripple::config::{load_config_with_hash, Config};
use groove_ripple::crawler::{listen_for_ctrl_c, run_crawl, shutdown_channel};
use groove_ripple::ingest::MergePolicy;
use groove_ripple::output::{load_statistics, print_statistics, RunSummary};
use groove_ripple::repair::{repair_titles, DEFAULT_REPAIR_LIMIT};
use groove_ripple::storage::{SqliteStorage, Storage};
use groove_ripple::transport::RemoteSource;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit code for a run halted on expired credentials
const EXIT_FATAL_HALT: u8 = 2;

/// Groove-Ripple: a resumable crawler for record collector accounts
///
/// Groove-Ripple walks collector accounts breadth-first from a set of seeds,
/// stores their collection, wantlist and contribution records against
/// canonical catalog entries, and resumes exactly where an interrupted run
/// stopped.
#[derive(Parser, Debug)]
#[command(name = "groove-ripple")]
#[command(version)]
#[command(about = "A resumable crawler for record collector accounts", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume an interrupted crawl (default behavior)
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Discard the checkpoint and pending frontier before starting
    /// (with --force, also clear the visited-accounts log)
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Reprocess accounts already visited or already holding data
    #[arg(long)]
    force: bool,

    /// Override the processed-account budget
    #[arg(long, value_name = "N")]
    max_accounts: Option<u32>,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Look up catalog entries stored as "Unknown Title" again and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    repair_titles: bool,

    /// Maximum entries examined by --repair-titles
    #[arg(long, value_name = "N", default_value_t = DEFAULT_REPAIR_LIMIT, requires = "repair_titles")]
    repair_limit: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.force {
        config.crawler.force_reprocess = true;
    }
    if let Some(max_accounts) = cli.max_accounts {
        anyhow::ensure!(max_accounts >= 1, "--max-accounts must be at least 1");
        config.crawler.max_accounts = max_accounts;
    }

    if cli.dry_run {
        handle_dry_run(&config)?;
        return Ok(ExitCode::SUCCESS);
    }
    if cli.stats {
        handle_stats(&config)?;
        return Ok(ExitCode::SUCCESS);
    }
    if cli.repair_titles {
        return handle_repair_titles(&config, cli.repair_limit).await;
    }

    handle_crawl(config, &config_hash, cli.fresh).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("groove_ripple=info,warn"),
            1 => EnvFilter::new("groove_ripple=debug,info"),
            2 => EnvFilter::new("groove_ripple=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Groove-Ripple Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Max accounts: {}", config.crawler.max_accounts);
    println!("  Max depth: {}", config.crawler.max_depth);
    println!(
        "  Min prior interactions: {}",
        config.crawler.min_prior_interactions
    );
    println!("  Force reprocess: {}", config.crawler.force_reprocess);
    let kinds: Vec<String> = config.crawler.kinds.iter().map(|k| k.to_string()).collect();
    println!("  Kinds: {}", kinds.join(", "));

    println!("\nTransport:");
    println!(
        "  Base pause: {}ms (jitter ±{}ms)",
        config.transport.base_pause_ms, config.transport.jitter_ms
    );
    println!(
        "  Retries: {} (rate limit: {})",
        config.transport.max_retries, config.transport.max_rate_limit_retries
    );
    println!("  API: {}", config.api.base_url);
    if config.feed.is_used() {
        println!("  Feed: {}", config.feed.base_url);
    }

    println!("\nUser Agent: {}", config.user_agent.header_value());

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Visited log: {}", config.output.visited_log_path);

    println!("\nSeeds ({}):", config.crawler.seeds.len());
    for seed in &config.crawler.seeds {
        println!("  - {}", seed);
    }
    if !config.crawler.seed_pool.is_empty() {
        println!("Seed pool: {} accounts", config.crawler.seed_pool.len());
    }

    let database = Path::new(&config.output.database_path);
    if database.exists() {
        let storage = SqliteStorage::new(database)?;
        if let Some(run) = storage.get_latest_run()? {
            println!(
                "\nLatest run {} is {}{}",
                run.id,
                run.status.to_db_string(),
                if run.status.is_resumable() { " and would be resumed" } else { "" }
            );
        }
        println!("Pending frontier: {} accounts", storage.load_frontier()?.len());
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --repair-titles mode: backfills placeholder titles
async fn handle_repair_titles(config: &Config, limit: usize) -> anyhow::Result<ExitCode> {
    let mut storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
    let mut source = RemoteSource::new(config)?;
    let policy = MergePolicy::from(config.catalog.precedence);

    let report = match repair_titles(&mut storage, &mut source, policy, limit).await {
        Ok(report) => report,
        Err(e) if e.is_fatal() => {
            tracing::error!("Session expired: credentials must be refreshed ({})", e);
            return Ok(ExitCode::from(EXIT_FATAL_HALT));
        }
        Err(e) => return Err(e).context("Title repair failed"),
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::SUCCESS)
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: &str, fresh: bool) -> anyhow::Result<ExitCode> {
    if fresh {
        tracing::info!("Starting fresh crawl (discarding checkpoint and frontier)");
    } else {
        tracing::info!("Starting crawl (will resume if an unfinished run exists)");
    }
    tracing::info!(
        "Seeds: {}, seed pool: {}, budget: {}",
        config.crawler.seeds.len(),
        config.crawler.seed_pool.len(),
        config.crawler.max_accounts
    );

    let (trigger, shutdown) = shutdown_channel();
    let listener = listen_for_ctrl_c(trigger);

    let report = run_crawl(config, config_hash, fresh, shutdown).await;
    listener.abort();
    let report = report.context("Crawl failed")?;

    if report.halt_reason.is_fatal() {
        let summary = RunSummary::from(&report);
        println!("{}", summary.to_json()?);
        return Ok(ExitCode::from(EXIT_FATAL_HALT));
    }

    tracing::info!(
        "Crawl finished ({:?}): {} accounts processed, {} pending",
        report.halt_reason,
        report.counters.accounts_processed,
        report.pending
    );
    Ok(ExitCode::SUCCESS)
}
