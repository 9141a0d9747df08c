//! Cold-Harvest main entry point
//!
//! This is the command-line interface for the Cold-Harvest file inventory
//! harvester.

use anyhow::Context;
use clap::Parser;
use cold_harvest::config::{load_config_with_hash, Config};
use cold_harvest::harvest::{RestHarvesterFactory, TenantHarvester};
use cold_harvest::storage::{open_shared, open_storage, Storage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Cold-Harvest: a throttling-aware file inventory harvester
///
/// Cold-Harvest crawls the configured sites of a content store, records
/// every file, and enriches documents with usage and version metadata
/// while respecting the throttling of both remote APIs.
#[derive(Parser, Debug)]
#[command(name = "cold-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A throttling-aware file inventory harvester", long_about = None)]
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

    /// Validate config and show what would be harvested without harvesting
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_harvest(config, config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("cold_harvest=info,warn"),
            1 => EnvFilter::new("cold_harvest=debug,info"),
            2 => EnvFilter::new("cold_harvest=trace,debug"),
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

/// Handles the --dry-run mode: shows what would be harvested
fn handle_dry_run(config: &Config) {
    println!("=== Cold-Harvest Dry Run ===\n");

    println!("Harvest:");
    println!("  Discovery batch size: {}", config.harvest.discovery_batch_size);
    println!("  Enrichment chunk size: {}", config.harvest.enrichment_chunk_size);
    println!("  Max concurrent chunks: {}", config.harvest.max_concurrent_chunks);
    println!("  Page size: {}", config.content_store.page_size);

    println!("\nHTTP:");
    println!("  Max retries: {}", config.http.max_retries);
    println!("  Backoff step: {}ms", config.http.backoff_step_ms);
    println!("  Honor Retry-After: {}", !config.http.ignore_retry_after);
    println!("  User agent: {}", config.http.user_agent);

    println!("\nEnrichment:");
    println!("  Base URL: {}", config.enrichment.base_url);
    println!("  Batch endpoint: {}", config.enrichment.use_batch_endpoint);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\nSites ({}):", config.sites.len());
    for site in &config.sites {
        if site.lists.is_empty() {
            println!("  - {} (all lists)", site.url);
            continue;
        }
        println!("  - {}", site.url);
        for list in &site.lists {
            if list.folders.is_empty() {
                println!("    * {}", list.title);
            } else {
                println!("    * {} ({})", list.title, list.folders.join(", "));
            }
        }
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    use cold_harvest::output::{load_statistics, print_statistics};

    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(Path::new(&config.output.database_path))
        .context("failed to open database")?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main harvest: registers configured sites, then harvests every target site
async fn handle_harvest(config: Config, config_hash: String) -> anyhow::Result<()> {
    let storage = open_shared(Path::new(&config.output.database_path))
        .context("failed to open database")?;

    {
        let mut guard = storage
            .lock()
            .map_err(|_| anyhow::anyhow!("storage lock poisoned"))?;
        for site in &config.sites {
            let filter = if site.lists.is_empty() {
                None
            } else {
                Some(site.filter().to_json()?)
            };
            guard.upsert_target_site(&site.url, filter.as_deref())?;
        }
        tracing::info!("Registered {} configured sites", config.sites.len());
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight work");
            on_signal.cancel();
        }
    });

    let factory = RestHarvesterFactory::new(Arc::new(config), config_hash);
    let tenant = TenantHarvester::new(factory, storage);
    let report = tenant.run(cancel).await?;

    cold_harvest::output::print_tenant_report(&report);
    if !report.failures.is_empty() {
        anyhow::bail!("{} sites failed", report.failures.len());
    }
    Ok(())
}
