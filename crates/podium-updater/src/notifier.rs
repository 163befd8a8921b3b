//! Notifier: fans rank changes out to downstream systems.
//!
//! Two sinks, both best-effort:
//! - rank-change events appended to the `leaderboard-updated` topic;
//! - CDN purges for the cached top-100 read views.
//!
//! Neither may fail the event that triggered it: publish and purge
//! failures are logged and counted, and the enclosing batch carries on.

use std::time::Duration;

use async_trait::async_trait;
use podium_core::{RankChange, TOP_RANKS_CACHED};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tracing::{debug, warn};

use crate::config::{PurgeConfig, PurgeProvider};
use crate::error::{Error, Result};

/// HTTP timeout for purge requests.
const PURGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivery timeout for rank-change publishes.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Downstream sink for rank movements. Object-safe so the dispatcher can
/// be exercised with a recording sink in tests.
#[async_trait]
pub trait ChangeSink: Send + Sync {
    /// Publish one rank change. Best-effort: never returns an error.
    async fn publish_rank_change(&self, change: &RankChange);

    /// Purge the given URL paths from the CDN. Returns whether the purge
    /// was accepted; `true` when purging is not configured.
    async fn purge_cache(&self, paths: &[String]) -> bool;
}

/// Whether a rank movement touches the cached top-N views.
pub fn crosses_cached_ranks(old_rank: Option<u64>, new_rank: u64) -> bool {
    old_rank.is_some_and(|r| r <= TOP_RANKS_CACHED) || new_rank <= TOP_RANKS_CACHED
}

/// The three canonical read paths serving a game mode's top-100 view.
pub fn top100_paths(game_mode: u32) -> Vec<String> {
    vec![
        format!("/api/leaderboard/{game_mode}/top100"),
        format!("/api/leaderboard/{game_mode}?limit=100&offset=0"),
        format!("/api/leaderboard/{game_mode}?type=global&limit=100&offset=0"),
    ]
}

/// Production sink: Kafka producer plus optional CDN purge client.
pub struct KafkaNotifier {
    producer: FutureProducer,
    topic: String,
    purger: Option<CachePurger>,
}

impl KafkaNotifier {
    pub fn new(
        brokers: &str,
        client_id: &str,
        topic: String,
        purge: Option<PurgeConfig>,
    ) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("client.id", client_id)
            .set("message.timeout.ms", "5000")
            .create()?;

        let purger = purge.map(CachePurger::new).transpose()?;

        Ok(Self {
            producer,
            topic,
            purger,
        })
    }

    /// Flush in-flight publishes during shutdown.
    pub fn flush(&self, timeout: Duration) {
        use rdkafka::producer::Producer;
        if let Err(e) = self.producer.flush(timeout) {
            warn!(error = %e, "producer flush failed during shutdown");
        }
    }
}

#[async_trait]
impl ChangeSink for KafkaNotifier {
    async fn publish_rank_change(&self, change: &RankChange) {
        let payload = match serde_json::to_vec(change) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "could not serialize rank change");
                metrics::counter!("rank_change_publish_failures_total").increment(1);
                return;
            }
        };

        // The output topic has no key enforcement.
        let record = FutureRecord::<(), _>::to(&self.topic).payload(&payload);

        match self.producer.send(record, PUBLISH_TIMEOUT).await {
            Ok(_) => {
                metrics::counter!("rank_changes_published_total").increment(1);
            }
            Err((e, _)) => {
                warn!(
                    error = %e,
                    player_id = %change.player_id,
                    game_mode = change.game_mode,
                    "rank change publish failed"
                );
                metrics::counter!("rank_change_publish_failures_total").increment(1);
            }
        }
    }

    async fn purge_cache(&self, paths: &[String]) -> bool {
        match &self.purger {
            Some(purger) => purger.purge(paths).await,
            None => true,
        }
    }
}

/// CDN purge HTTP client.
pub struct CachePurger {
    client: reqwest::Client,
    config: PurgeConfig,
}

impl CachePurger {
    pub fn new(config: PurgeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PURGE_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("purge http client: {e}")))?;
        Ok(Self { client, config })
    }

    /// POST a purge request. Timeouts and non-2xx responses are warnings,
    /// never errors.
    pub async fn purge(&self, paths: &[String]) -> bool {
        let body = purge_body(self.config.provider, paths);

        let request = match self.config.provider {
            PurgeProvider::Cloudflare => self
                .client
                .post(&self.config.url)
                .bearer_auth(&self.config.api_key),
            PurgeProvider::Fastly => self
                .client
                .post(&self.config.url)
                .header("Fastly-Key", &self.config.api_key),
        };

        match request.json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                metrics::counter!("cache_purges_total").increment(1);
                debug!(paths = paths.len(), "cache purge accepted");
                true
            }
            Ok(response) => {
                metrics::counter!("cache_purge_failures_total").increment(1);
                warn!(status = %response.status(), "cache purge rejected");
                false
            }
            Err(e) => {
                metrics::counter!("cache_purge_failures_total").increment(1);
                warn!(error = %e, "cache purge request failed");
                false
            }
        }
    }
}

/// Provider-specific purge body shape.
fn purge_body(provider: PurgeProvider, paths: &[String]) -> serde_json::Value {
    match provider {
        PurgeProvider::Cloudflare => serde_json::json!({ "files": paths }),
        PurgeProvider::Fastly => serde_json::json!({ "paths": paths }),
    }
}
