//! Shared test-bed: an engine wired to the in-memory store and a
//! recording notifier sink, driven batch by batch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use podium_core::RankChange;
use podium_updater::{
    BatchHandler, ChangeSink, ConsumedBatch, ConsumedMessage, Dispatcher, MemoryStore,
    ReplayTracker, Result, RunStats,
};

/// Sink that records everything it is asked to fan out.
#[derive(Default)]
pub struct RecordingSink {
    changes: Mutex<Vec<RankChange>>,
    purges: Mutex<Vec<Vec<String>>>,
}

impl RecordingSink {
    pub fn changes(&self) -> Vec<RankChange> {
        self.changes.lock().clone()
    }

    pub fn purges(&self) -> Vec<Vec<String>> {
        self.purges.lock().clone()
    }
}

#[async_trait]
impl ChangeSink for RecordingSink {
    async fn publish_rank_change(&self, change: &RankChange) {
        self.changes.lock().push(change.clone());
    }

    async fn purge_cache(&self, paths: &[String]) -> bool {
        self.purges.lock().push(paths.to_vec());
        true
    }
}

/// Dispatcher plus its collaborators, ready to consume hand-built batches.
pub struct TestBed {
    pub store: Arc<MemoryStore>,
    pub sink: Arc<RecordingSink>,
    pub tracker: Arc<ReplayTracker>,
    pub stats: Arc<RunStats>,
    pub dispatcher: Dispatcher,
    next_offset: Mutex<i64>,
}

impl TestBed {
    fn new(replaying: bool) -> Self {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let tracker = Arc::new(ReplayTracker::new(3, Duration::from_secs(5)));
        if replaying {
            tracker.start_replay();
        }
        let stats = Arc::new(RunStats::default());

        let dispatcher = Dispatcher::new(
            Arc::clone(&store) as Arc<dyn podium_updater::LeaderboardStore>,
            Arc::clone(&sink) as Arc<dyn ChangeSink>,
            Arc::clone(&tracker),
            Arc::clone(&stats),
        );

        Self {
            store,
            sink,
            tracker,
            stats,
            dispatcher,
            next_offset: Mutex::new(0),
        }
    }

    /// Engine already caught up: notifications flow.
    pub fn tailing() -> Self {
        Self::new(false)
    }

    /// Engine replaying the log: notifications suppressed.
    pub fn replaying() -> Self {
        Self::new(true)
    }

    /// Build a batch from raw JSON payloads, with increasing offsets.
    pub fn batch(&self, payloads: &[serde_json::Value]) -> ConsumedBatch {
        let mut offset = self.next_offset.lock();
        let messages = payloads
            .iter()
            .map(|payload| {
                *offset += 1;
                ConsumedMessage {
                    partition: 0,
                    offset: *offset,
                    key: payload["playerId"].as_str().map(|k| k.as_bytes().to_vec()),
                    payload: serde_json::to_vec(payload).expect("payload serializes"),
                }
            })
            .collect();
        ConsumedBatch { messages }
    }

    /// Consume one batch of events through the dispatcher.
    pub async fn run_batch(&self, payloads: &[serde_json::Value]) -> Result<()> {
        let batch = self.batch(payloads);
        self.dispatcher.handle_batch(batch).await
    }

    /// Consume one empty batch (an idle poll window).
    pub async fn run_empty_batch(&self) -> Result<()> {
        self.dispatcher.handle_batch(ConsumedBatch::default()).await
    }
}

/// A well-formed submitted-score payload.
pub fn score(player: &str, username: &str, mode: u32, score: i64) -> serde_json::Value {
    serde_json::json!({
        "playerId": player,
        "username": username,
        "gameMode": mode,
        "score": score,
        "gameDurationSeconds": 300,
        "timestamp": "2024-06-01T12:00:00Z",
    })
}
