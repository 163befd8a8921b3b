//! Podium leaderboard update daemon.
//!
//! This is the main entry point for the update engine. It consumes
//! submitted-score events from the event log, maintains the materialized
//! leaderboards and player aggregates in the store, publishes rank-change
//! events, and purges downstream CDN caches.
//!
//! # Usage
//!
//! ```bash
//! # Run with default settings (local broker and store)
//! podium-updater
//!
//! # Everything is configured through the environment
//! PODIUM_BROKERS=kafka-1:9092,kafka-2:9092 \
//! PODIUM_REDIS_HOST=cache.internal \
//! podium-updater --metrics-port 9090
//! ```
//!
//! # Graceful Shutdown
//!
//! The daemon handles SIGINT (Ctrl+C) and SIGTERM for graceful shutdown:
//! 1. Cancels the consume loop after the in-flight batch drains
//! 2. Commits that batch's offsets and leaves the consumer group
//! 3. Flushes in-flight rank-change publishes
//! 4. Exits cleanly (non-zero on fatal errors, so the supervisor restarts)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use podium_core::metrics::{init_metrics, start_metrics_server};
use podium_updater::{
    Config, KafkaNotifier, LeaderboardEngine, LeaderboardStore, MemoryStore, RedisStore, RunStats,
};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Podium leaderboard update daemon.
#[derive(Parser, Debug)]
#[command(name = "podium-updater")]
#[command(about = "Leaderboard update engine daemon")]
#[command(version)]
struct Args {
    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "9090")]
    metrics_port: u16,

    /// Run against an in-process store instead of Redis (local development)
    #[arg(long)]
    memory_store: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("podium_updater=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    tracing::info!("Podium leaderboard updater starting...");

    // Initialize metrics
    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle).await?;
    }

    let config = Config::from_env()?;

    // Store gateway
    let store: Arc<dyn LeaderboardStore> = if args.memory_store {
        tracing::warn!("using in-memory store: state will not survive a restart");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            RedisStore::connect(&config.redis_url)
                .await
                .context("Failed to connect to the leaderboard store")?,
        )
    };

    // Notifier (rank-change producer + optional CDN purger)
    let notifier = Arc::new(
        KafkaNotifier::new(
            &config.brokers,
            &config.client_id,
            config.output_topic.clone(),
            config.purge.clone(),
        )
        .context("Failed to create notifier")?,
    );

    let engine = LeaderboardEngine::new(config, store, notifier.clone());

    // Set up graceful shutdown
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
            _ = sigint.recv() => tracing::info!("Received SIGINT"),
        }
        signal_cancel.cancel();
    });

    // Run the engine
    let result = engine.run(cancel).await;

    // Shutdown sequence
    tracing::info!("Shutting down...");
    notifier.flush(Duration::from_secs(5));

    let stats = engine.stats();
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Batches consumed:     {}", RunStats::get(&stats.batches));
    tracing::info!("Events consumed:      {}", RunStats::get(&stats.consumed));
    tracing::info!("Events applied:       {}", RunStats::get(&stats.applied));
    tracing::info!("Events malformed:     {}", RunStats::get(&stats.malformed));
    tracing::info!("Apply failures:       {}", RunStats::get(&stats.apply_failures));
    tracing::info!("Rank changes emitted: {}", RunStats::get(&stats.notifications));
    tracing::info!("Cache purges:         {}", RunStats::get(&stats.purges));

    if let Err(e) = result {
        tracing::error!("Engine terminated with fatal error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
