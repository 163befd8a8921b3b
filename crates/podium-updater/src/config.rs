//! Engine configuration loaded from environment variables.

use std::time::Duration;

use crate::error::{Error, Result};

/// CDN purge provider families, distinguished by auth header and body shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeProvider {
    /// Bearer-token auth, `{"files":[...]}` body.
    Cloudflare,
    /// `Fastly-Key` header auth, `{"paths":[...]}` body.
    Fastly,
}

impl PurgeProvider {
    fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cloudflare" => Ok(Self::Cloudflare),
            "fastly" => Ok(Self::Fastly),
            other => Err(Error::Config(format!(
                "unknown purge provider '{other}' (expected cloudflare or fastly)"
            ))),
        }
    }
}

/// CDN purge endpoint configuration. Absent entirely when no purge URL is
/// configured; the notifier then skips purging.
#[derive(Debug, Clone)]
pub struct PurgeConfig {
    pub url: String,
    pub api_key: String,
    pub provider: PurgeProvider,
}

/// Update engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Kafka bootstrap servers, comma-separated.
    pub brokers: String,

    /// Kafka client id.
    pub client_id: String,

    /// Consumer group id.
    pub group_id: String,

    /// Topic carrying submitted-score events.
    pub input_topic: String,

    /// Topic rank-change events are published to.
    pub output_topic: String,

    /// Redis connection URL, assembled from host/port/password parts.
    pub redis_url: String,

    /// CDN purge endpoint, when configured.
    pub purge: Option<PurgeConfig>,

    /// Consecutive empty batches after which replay is declared complete.
    pub empty_batch_threshold: u32,

    /// Wall-time without a delivered batch after which replay is declared
    /// complete.
    pub idle_timeout: Duration,

    /// Maximum messages assembled into one consumed batch.
    pub max_batch_size: usize,

    /// How long the consumer keeps draining the stream into the current
    /// batch after the first message arrives.
    pub batch_linger: Duration,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional env vars:
    /// - `PODIUM_BROKERS`: Kafka bootstrap servers (default: "localhost:9092")
    /// - `PODIUM_CLIENT_ID`: Kafka client id (default: "podium-updater")
    /// - `PODIUM_GROUP_ID`: consumer group (default: "leaderboard-updater")
    /// - `PODIUM_INPUT_TOPIC` / `PODIUM_OUTPUT_TOPIC`
    /// - `PODIUM_REDIS_HOST` / `PODIUM_REDIS_PORT` / `PODIUM_REDIS_PASSWORD`
    /// - `PODIUM_PURGE_URL` / `PODIUM_PURGE_KEY` / `PODIUM_PURGE_PROVIDER`
    /// - `PODIUM_EMPTY_BATCH_THRESHOLD`: replay exit threshold (default: 3)
    /// - `PODIUM_IDLE_TIMEOUT_MS`: replay idle timeout (default: 5000)
    pub fn from_env() -> Result<Self> {
        let brokers = env_or("PODIUM_BROKERS", "localhost:9092");
        let client_id = env_or("PODIUM_CLIENT_ID", "podium-updater");
        let group_id = env_or("PODIUM_GROUP_ID", "leaderboard-updater");
        let input_topic = env_or("PODIUM_INPUT_TOPIC", "score-submitted");
        let output_topic = env_or("PODIUM_OUTPUT_TOPIC", "leaderboard-updated");

        let redis_host = env_or("PODIUM_REDIS_HOST", "127.0.0.1");
        let redis_port = env_or("PODIUM_REDIS_PORT", "6379");
        let redis_url = match std::env::var("PODIUM_REDIS_PASSWORD") {
            Ok(password) if !password.is_empty() => {
                format!("redis://:{password}@{redis_host}:{redis_port}")
            }
            _ => format!("redis://{redis_host}:{redis_port}"),
        };

        let purge = match std::env::var("PODIUM_PURGE_URL") {
            Ok(url) if !url.is_empty() => Some(PurgeConfig {
                url,
                api_key: env_or("PODIUM_PURGE_KEY", ""),
                provider: PurgeProvider::parse(&env_or("PODIUM_PURGE_PROVIDER", "cloudflare"))?,
            }),
            _ => None,
        };

        let empty_batch_threshold = env_or("PODIUM_EMPTY_BATCH_THRESHOLD", "3")
            .parse::<u32>()
            .map_err(|e| Error::Config(format!("PODIUM_EMPTY_BATCH_THRESHOLD: {e}")))?;

        let idle_timeout_ms = env_or("PODIUM_IDLE_TIMEOUT_MS", "5000")
            .parse::<u64>()
            .map_err(|e| Error::Config(format!("PODIUM_IDLE_TIMEOUT_MS: {e}")))?;

        let config = Self {
            brokers,
            client_id,
            group_id,
            input_topic,
            output_topic,
            redis_url,
            purge,
            empty_batch_threshold,
            idle_timeout: Duration::from_millis(idle_timeout_ms),
            max_batch_size: 500,
            batch_linger: Duration::from_millis(100),
        };

        tracing::info!(
            brokers = %config.brokers,
            group_id = %config.group_id,
            input_topic = %config.input_topic,
            output_topic = %config.output_topic,
            redis_host = %redis_host,
            purge_provider = ?config.purge.as_ref().map(|p| p.provider),
            empty_batch_threshold = config.empty_batch_threshold,
            idle_timeout_ms = idle_timeout_ms,
            "updater configuration loaded"
        );

        Ok(config)
    }
}
