//! Prometheus metrics helpers for the Podium leaderboard service.
//!
//! Centralized recorder initialization and metric registration used across
//! Podium components.
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component name (`consumer_`, `store_`, `notify_`, `replay_`)
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: use sparingly to avoid cardinality explosion

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// Must be called once at startup before any metrics are recorded. Returns
/// a handle for [`start_metrics_server`].
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already
/// installed, instead of panicking. Useful for tests.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves the `/metrics` endpoint on the given port. Spawns a background
/// task and returns immediately.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server failed: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for the metrics emitted by the update engine.
///
/// Called automatically by [`init_metrics`].
fn register_common_metrics() {
    // =========================================================================
    // Consumer / Dispatcher Metrics
    // =========================================================================

    describe_counter!(
        "consumer_batches_total",
        "Batches delivered by the event log consumer"
    );
    describe_counter!(
        "consumer_events_total",
        "Messages consumed from the score-submitted topic"
    );
    describe_counter!(
        "events_malformed_total",
        "Messages rejected during parse/validation (label: field)"
    );
    describe_counter!(
        "events_applied_total",
        "Score events applied to the materialized leaderboards"
    );
    describe_counter!(
        "events_apply_failures_total",
        "Score events skipped because their store application failed"
    );
    describe_histogram!(
        "batch_apply_duration_seconds",
        "Wall time spent applying one consumed batch"
    );

    // =========================================================================
    // Replay Metrics
    // =========================================================================

    describe_gauge!(
        "replay_active",
        "Whether the engine is replaying the event log (1=yes, 0=no)"
    );
    describe_counter!(
        "replay_empty_batches_total",
        "Consecutive-empty-batch observations while replaying"
    );

    // =========================================================================
    // Store Gateway Metrics
    // =========================================================================

    describe_counter!(
        "store_retries_total",
        "Store operations retried after a transient failure"
    );
    describe_counter!(
        "store_unavailable_total",
        "Store operations abandoned after exhausting the retry budget"
    );

    // =========================================================================
    // Notifier Metrics
    // =========================================================================

    describe_counter!(
        "rank_changes_published_total",
        "Rank-change events published to the leaderboard-updated topic"
    );
    describe_counter!(
        "rank_change_publish_failures_total",
        "Rank-change publishes that failed (best-effort, not retried)"
    );
    describe_counter!("cache_purges_total", "CDN purge requests issued");
    describe_counter!(
        "cache_purge_failures_total",
        "CDN purge requests that failed or timed out"
    );

    // =========================================================================
    // Engine Lifecycle
    // =========================================================================

    describe_gauge!(
        "engine_running",
        "Whether the update engine is running (1=yes, 0=no)"
    );
}
