//! Engine lifecycle: `Starting -> (Replaying) -> Tailing -> Stopping`.
//!
//! [`LeaderboardEngine`] owns every long-lived resource (store gateway,
//! log client, notifier sink, replay tracker) and drives the state
//! machine:
//!
//! - **Starting**: inspect the materialized view. Empty view → reset the
//!   consumer group's offsets, subscribe from the beginning, arm the idle
//!   watcher, enter *Replaying*. Otherwise subscribe at the committed
//!   offsets and enter *Tailing* directly.
//! - **Replaying → Tailing**: flipped by the replay tracker (empty-batch
//!   threshold or idle timeout, whichever fires first); no re-subscription
//!   is needed; the consumer is already positioned at the tail.
//! - **Stopping**: on cancellation the consume loop drains its current
//!   batch, commits, and returns; the consumer then leaves the group.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::dispatcher::{Dispatcher, RunStats};
use crate::error::Result;
use crate::log::{LogClient, LogConfig};
use crate::notifier::ChangeSink;
use crate::recovery::{needs_replay, spawn_idle_watcher, ReplayTracker};
use crate::store::LeaderboardStore;

/// The update engine. Owns all long-lived resources; `run` consumes
/// batches until cancelled or until a fatal error.
pub struct LeaderboardEngine {
    config: Config,
    store: Arc<dyn LeaderboardStore>,
    sink: Arc<dyn ChangeSink>,
    tracker: Arc<ReplayTracker>,
    stats: Arc<RunStats>,
}

impl LeaderboardEngine {
    pub fn new(
        config: Config,
        store: Arc<dyn LeaderboardStore>,
        sink: Arc<dyn ChangeSink>,
    ) -> Self {
        let tracker = Arc::new(ReplayTracker::new(
            config.empty_batch_threshold,
            config.idle_timeout,
        ));

        Self {
            config,
            store,
            sink,
            tracker,
            stats: Arc::new(RunStats::default()),
        }
    }

    /// Lifetime counters, for the shutdown summary.
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Whether the engine is currently replaying the log.
    pub fn is_replaying(&self) -> bool {
        self.tracker.is_replaying()
    }

    /// Run the engine until `cancel` fires or a fatal error occurs.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        metrics::gauge!("engine_running").set(1.0);

        let replay = needs_replay(&*self.store).await;

        let mut log = LogClient::new(LogConfig {
            brokers: self.config.brokers.clone(),
            client_id: self.config.client_id.clone(),
            group_id: self.config.group_id.clone(),
            topic: self.config.input_topic.clone(),
            max_batch_size: self.config.max_batch_size,
            batch_linger: self.config.batch_linger,
        });

        let mut watcher = None;
        if replay {
            info!("materialized view is empty, replaying the event log from the earliest offset");
            self.tracker.start_replay();

            if !log.reset_group_to_earliest().await {
                // ResetFailed: earliest auto.offset.reset still covers
                // partitions without committed offsets.
                warn!("group offset reset failed, proceeding to subscribe from beginning");
            }
            log.subscribe(true)?;
            watcher = Some(spawn_idle_watcher(
                Arc::clone(&self.tracker),
                cancel.child_token(),
            ));
        } else {
            info!("materialized view present, tailing new events");
            log.subscribe(false)?;
        }

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.store),
            Arc::clone(&self.sink),
            Arc::clone(&self.tracker),
            Arc::clone(&self.stats),
        );

        let result = log.consume_batches(&cancel, &dispatcher).await;

        info!("stopping: disconnecting log client");
        log.disconnect();
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        metrics::gauge!("engine_running").set(0.0);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use podium_core::RankChange;
    use std::time::Duration;

    struct NullSink;

    #[async_trait]
    impl ChangeSink for NullSink {
        async fn publish_rank_change(&self, _change: &RankChange) {}
        async fn purge_cache(&self, _paths: &[String]) -> bool {
            true
        }
    }

    fn config() -> Config {
        Config {
            brokers: "localhost:9092".to_string(),
            client_id: "test".to_string(),
            group_id: "leaderboard-updater".to_string(),
            input_topic: "score-submitted".to_string(),
            output_topic: "leaderboard-updated".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            purge: None,
            empty_batch_threshold: 3,
            idle_timeout: Duration::from_millis(5000),
            max_batch_size: 500,
            batch_linger: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_engine_starts_in_tailing_posture() {
        let engine = LeaderboardEngine::new(
            config(),
            Arc::new(MemoryStore::new()),
            Arc::new(NullSink),
        );
        assert!(!engine.is_replaying());
        assert_eq!(RunStats::get(&engine.stats().batches), 0);
    }
}
