//! Weft main entry point
//!
//! This is the command-line interface for the Weft crawl engine.

use anyhow::Context as _;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use weft_crawl::config::{load_config_with_hash, Config};
use weft_crawl::crawler::BrowserFetcher;
use weft_crawl::{Engine, EngineOptions, LogSink, TaskStore};

/// Weft: a priority-aware crawl engine
///
/// Weft seeds the configured tasks, fetches their pages with a pool of concurrent
/// workers and logs every item the task rules extract. Press Ctrl-C to stop.
#[derive(Parser, Debug)]
#[command(name = "weft")]
#[command(version)]
#[command(about = "A priority-aware crawl engine", long_about = None)]
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

    /// Validate config and show the seed requests without crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    let store = TaskStore::from_config(&config).context("Failed to build tasks")?;

    if cli.dry_run {
        handle_dry_run(&config, &store)
    } else {
        handle_crawl(config, store).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("weft_crawl=info,warn"),
            1 => EnvFilter::new("weft_crawl=debug,info"),
            2 => EnvFilter::new("weft_crawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the engine settings and every seed request
fn handle_dry_run(config: &Config, store: &TaskStore) -> anyhow::Result<()> {
    println!("=== Weft Dry Run ===\n");

    println!("Engine:");
    println!("  Workers: {}", config.engine.workers);
    println!("  Minimum body size: {} bytes", config.engine.min_body_bytes);
    println!("  Dispatch: {:?}", config.engine.dispatch);
    println!("  Proxies: {}", config.fetcher.proxies.len());

    println!("\nTasks ({}):", store.len());
    for name in store.names() {
        let task = store.get(name)?;
        println!(
            "  - {} (max depth {}, reload {})",
            name,
            task.max_depth(),
            task.reload()
        );
    }

    println!("\nSeeds ({}):", config.engine.seeds.len());
    let mut total = 0;
    for name in &config.engine.seeds {
        let task = store.get(name)?;
        let roots = task
            .root_requests()
            .with_context(|| format!("Root of task '{}' failed", name))?;
        for request in &roots {
            println!("  * [{}] {} {} -> {}", name, request.method, request.url, request.rule_name);
        }
        total += roots.len();
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would start crawling with {} seed requests", total);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, store: TaskStore) -> anyhow::Result<()> {
    let fetcher = BrowserFetcher::new(&config.fetcher).context("Failed to build HTTP client")?;
    let options = EngineOptions::from(&config.engine);

    tracing::info!(
        "Tasks: {}, seeds: {:?}",
        store.len(),
        options.seeds
    );

    let engine = Engine::new(options, store, Arc::new(fetcher), Arc::new(LogSink));
    match engine.run().await {
        Ok(stats) => {
            tracing::info!("Crawl stopped: {}", stats);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
