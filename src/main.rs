//! Crawl-Worker main entry point
//!
//! This is the command-line interface for a single crawl worker process.

use anyhow::Context;
use clap::Parser;
use crawl_worker::config::{resolve_config, Config};
use crawl_worker::dedup::DedupStore;
use crawl_worker::pipeline::{release_admissions, Pipeline, PipelineConfig};
use crawl_worker::queue::consume;
use crawl_worker::storage::MirrorWriter;
use crawl_worker::{Blacklist, Crawler, RedisDedupStore, RedisQueue};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Crawl-Worker: a distributed single-domain crawl worker
///
/// Consumes URLs from a shared queue, fetches them from the configured root
/// host, mirrors the responses and publishes newly found same-host links.
/// Configuration comes from an optional TOML file followed by environment
/// variables.
#[derive(Parser, Debug)]
#[command(name = "crawl-worker")]
#[command(version)]
#[command(about = "A distributed single-domain crawl worker", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Print the resolved configuration and exit without connecting
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    if let Some(path) = &cli.config {
        tracing::info!("Loading configuration from: {}", path.display());
    }
    let config = resolve_config(cli.config.as_deref()).context("Failed to load configuration")?;

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    run_worker(config).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// `RUST_LOG`, when set, takes precedence over the flags.
fn setup_logging(verbose: u8, quiet: bool) {
    let default_filter = if quiet {
        "error"
    } else {
        match verbose {
            0 => "crawl_worker=info,warn",
            1 => "crawl_worker=debug,info",
            2 => "crawl_worker=trace,debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the configuration the worker would use
fn handle_dry_run(config: &Config) {
    println!("=== Crawl-Worker Dry Run ===\n");

    println!("Broker:");
    println!("  Address: {}", config.broker.address);
    println!("  Exchange: {}", config.broker.exchange);
    println!("  Queue: {}", config.broker.queue);
    println!("  Worker id: {}", config.broker.worker_id);
    println!("  Poll interval: {}ms", config.broker.poll_interval_ms);
    println!("  Visibility timeout: {}s", config.broker.visibility_timeout_secs);

    println!("\nDedup store:");
    println!("  Address: {}", config.dedup.address);
    println!("  Key prefix: {}", config.dedup.key_prefix);
    println!("  TTL: {}s", config.dedup.ttl_secs);
    println!("  Admission lease: {}s", config.dedup.lease_secs);

    println!("\nCrawler:");
    println!("  Root URL: {}", config.crawler.root_url);
    println!("  User agent: {}", config.crawler.user_agent);
    println!("  Request timeout: {}s", config.crawler.request_timeout_secs);
    match &config.crawler.mirror_root {
        Some(root) => println!("  Mirror root: {}", root.display()),
        None => println!("  Mirror root: (not persisting)"),
    }

    println!("\nBlacklisted paths ({}):", config.crawler.blacklist_paths.len());
    for path in &config.crawler.blacklist_paths {
        println!("  - {}", path);
    }

    println!("\nPipeline:");
    println!("  Workers per stage: {}", config.pipeline.workers_per_stage);
    println!("  Queue capacity: {}", config.pipeline.queue_capacity);

    println!("\n✓ Configuration is valid");
}

/// Connects to the dedup store and broker, then runs the pipeline until
/// interrupted
///
/// Any connection failure here is fatal; the worker never runs half
/// connected.
async fn run_worker(config: Config) -> anyhow::Result<()> {
    let crawler = Crawler::from_config(&config.crawler).context("Invalid root URL")?;

    let dedup = RedisDedupStore::connect(&config.dedup.address, &config.dedup.key_prefix)
        .await
        .context("Failed to connect to dedup store")?;
    tracing::info!(address = %config.dedup.address, "Connected to dedup store");

    let queue = RedisQueue::connect(&config.broker)
        .await
        .context("Failed to connect to broker")?;
    tracing::info!(address = %config.broker.address, queue = %config.broker.queue, "Connected to broker");

    let dedup: Arc<dyn DedupStore> = Arc::new(dedup);
    let queue = Arc::new(queue);

    queue.heartbeat().await.context("Failed to register worker")?;
    let recovered = queue
        .recover_in_flight()
        .await
        .context("Failed to recover in-flight deliveries")?;
    release_admissions(&*dedup, &recovered).await;

    let maintenance = spawn_maintenance(Arc::clone(&queue), Arc::clone(&dedup));

    let gateway = queue;
    let mirror = config.crawler.mirror_root.clone().map(MirrorWriter::new);
    let blacklist = Blacklist::new(config.crawler.blacklist_paths.iter().cloned());

    tracing::info!(
        root = %crawler.root_url(),
        blacklist = blacklist.prefixes().len(),
        mirror = mirror.is_some(),
        "Starting worker"
    );

    let pipeline = Pipeline::new(
        PipelineConfig::from(&config),
        gateway.clone(),
        dedup,
        crawler,
    )
    .with_blacklist(blacklist)
    .with_mirror(mirror);

    let (deliveries, mut consumer) = consume(gateway, config.pipeline.queue_capacity);
    let handle = pipeline.spawn(deliveries);
    let stats = handle.stats();

    let reporter = (config.pipeline.progress_interval_secs > 0).then(|| {
        let stats = Arc::clone(&stats);
        let period = Duration::from_secs(config.pipeline.progress_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                stats.log_progress();
            }
        })
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down, draining in-flight items");
            consumer.abort();
        }
        _ = &mut consumer => {
            tracing::warn!("Delivery stream ended");
        }
    }

    handle.join().await;
    maintenance.abort();
    if let Some(reporter) = reporter {
        reporter.abort();
    }
    stats.log_progress();

    Ok(())
}

/// Keeps this worker's heartbeat fresh and returns the in-flight deliveries
/// of workers that stopped heartbeating
fn spawn_maintenance(queue: Arc<RedisQueue>, dedup: Arc<dyn DedupStore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(queue.maintenance_interval());
        loop {
            ticker.tick().await;

            if let Err(e) = queue.heartbeat().await {
                tracing::warn!("Failed to refresh heartbeat: {}", e);
            }

            match queue.reap_stale().await {
                Ok(recovered) if !recovered.is_empty() => {
                    let released = release_admissions(&*dedup, &recovered).await;
                    tracing::info!(recovered = recovered.len(), released, "Reaped stale deliveries");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to reap stale workers: {}", e),
            }
        }
    })
}
