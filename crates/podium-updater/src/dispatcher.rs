//! Batch dispatcher: turns one consumed batch into store writes and,
//! in tailing mode, rank-change notifications.
//!
//! # Per-batch algorithm
//!
//! 1. Decode and validate every message; malformed ones are logged and
//!    skipped.
//! 2. Update the replay bookkeeping (empty-batch counter, idle clock).
//! 3. Snapshot the initial global rank of every distinct
//!    `(player, game mode)` key in the batch.
//! 4. Group events by key. Keys with two or more events ("hot groups")
//!    are applied strictly in arrival order, one pipelined round trip per
//!    event, with a fresh rank read after each application; distinct hot
//!    keys run concurrently. Keys with exactly one event ("singletons")
//!    are queued into a single pipelined round trip.
//! 5. In tailing mode, every application whose rank differs from the rank
//!    immediately before it emits a rank-change event, and movements that
//!    touch the cached top-100 views trigger a CDN purge.
//!
//! All fan-out is joined before the handler returns, so offsets are only
//! committed once the batch's side effects are durable.
//!
//! During replay the per-key current rank is still tracked after each hot
//! application, while the first event of a group diffs against the
//! pre-batch snapshot, which may predate writes from earlier replay
//! batches. Notifications are suppressed in replay, so the stale diff is
//! inert; it is kept rather than corrected to match the behavior readers
//! of the output topic were built against.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use podium_core::{decode_score_event, keys, RankChange, ScoreEvent};
use tracing::{info, warn};

use crate::applier;
use crate::error::Result;
use crate::log::{BatchHandler, ConsumedBatch};
use crate::notifier::{crosses_cached_ranks, top100_paths, ChangeSink};
use crate::recovery::ReplayTracker;
use crate::store::{LeaderboardStore, RankedScore};

/// Events for the same key must be applied in order; the key is the unit
/// of sequencing and of rank tracking.
type GroupKey = (String, u32);

/// Counters accumulated over the engine's lifetime, reported in the
/// shutdown summary.
#[derive(Debug, Default)]
pub struct RunStats {
    pub batches: AtomicU64,
    pub consumed: AtomicU64,
    pub malformed: AtomicU64,
    pub applied: AtomicU64,
    pub apply_failures: AtomicU64,
    pub notifications: AtomicU64,
    pub purges: AtomicU64,
}

impl RunStats {
    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Orchestrates the application of consumed batches.
pub struct Dispatcher {
    store: Arc<dyn LeaderboardStore>,
    sink: Arc<dyn ChangeSink>,
    tracker: Arc<ReplayTracker>,
    stats: Arc<RunStats>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn LeaderboardStore>,
        sink: Arc<dyn ChangeSink>,
        tracker: Arc<ReplayTracker>,
        stats: Arc<RunStats>,
    ) -> Self {
        Self {
            store,
            sink,
            tracker,
            stats,
        }
    }

    async fn dispatch(&self, batch: ConsumedBatch) -> Result<()> {
        let started = Instant::now();
        RunStats::add(&self.stats.batches, 1);
        RunStats::add(&self.stats.consumed, batch.len() as u64);

        // 1. Parse & validate.
        let mut events = Vec::with_capacity(batch.len());
        for message in &batch.messages {
            match decode_score_event(&message.payload) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(
                        partition = message.partition,
                        offset = message.offset,
                        error = %e,
                        "skipping malformed event"
                    );
                    metrics::counter!(
                        "events_malformed_total",
                        "field" => e.field().unwrap_or("payload")
                    )
                    .increment(1);
                    RunStats::add(&self.stats.malformed, 1);
                }
            }
        }

        // 2. Replay bookkeeping, before the early return so empty batches
        // advance the catch-up counter.
        if let Some(reason) = self.tracker.note_batch(events.len()) {
            info!(?reason, "replay caught up with the live tail, switching to tailing");
        }
        let tailing = !self.tracker.is_replaying();

        // 3. Nothing valid: the offset still gets committed.
        if events.is_empty() {
            return Ok(());
        }

        // 4. Group by key, preserving arrival order within each group and
        // first-seen order across groups.
        let groups = group_by_key(events);

        // Snapshot initial global ranks for every distinct key, before any
        // write from this batch.
        let initial = self.snapshot_ranks(&groups).await?;

        let (hot, singles): (Vec<_>, Vec<_>) =
            groups.into_iter().partition(|(_, events)| events.len() >= 2);

        // 5. Hot groups: sequential per key, concurrent across keys.
        let results = join_all(hot.into_iter().map(|(key, events)| {
            let initial_rank = initial.get(&key).copied().flatten();
            self.process_hot_group(key, events, initial_rank, tailing)
        }))
        .await;
        for result in results {
            result?;
        }

        // 6. Singletons: one pipelined round trip, then rank diffs.
        self.process_singletons(singles, &initial, tailing).await?;

        metrics::histogram!("batch_apply_duration_seconds").record(started.elapsed().as_secs_f64());
        Ok(())
    }

    /// Read the current global rank of every distinct key in the batch.
    async fn snapshot_ranks(
        &self,
        groups: &[(GroupKey, Vec<ScoreEvent>)],
    ) -> Result<HashMap<GroupKey, Option<u64>>> {
        let reads = join_all(groups.iter().map(|((player_id, game_mode), _)| {
            let global = keys::leaderboard_global(*game_mode);
            let store = Arc::clone(&self.store);
            async move { store.zrevrank_with_score(&global, player_id).await }
        }))
        .await;

        let mut initial = HashMap::with_capacity(groups.len());
        for ((key, _), read) in groups.iter().zip(reads) {
            let rank = match read {
                Ok(ranked) => ranked.map(|r| r.rank),
                Err(e) if e.aborts_batch() => return Err(e),
                Err(e) => {
                    warn!(player_id = %key.0, game_mode = key.1, error = %e,
                        "initial rank read failed, treating as unranked");
                    None
                }
            };
            initial.insert(key.clone(), rank);
        }
        Ok(initial)
    }

    /// Apply a hot group's events in arrival order, diffing the rank
    /// around every single application.
    async fn process_hot_group(
        &self,
        key: GroupKey,
        events: Vec<ScoreEvent>,
        initial_rank: Option<u64>,
        tailing: bool,
    ) -> Result<()> {
        let global = keys::leaderboard_global(key.1);
        let mut previous = initial_rank;

        for event in events {
            match applier::apply_event(&*self.store, &event, Utc::now()).await {
                Ok(()) => {}
                Err(e) if e.aborts_batch() => return Err(e),
                Err(e) => {
                    warn!(player_id = %key.0, game_mode = key.1, error = %e,
                        "event application failed, skipping event");
                    metrics::counter!("events_apply_failures_total").increment(1);
                    RunStats::add(&self.stats.apply_failures, 1);
                    continue;
                }
            }
            metrics::counter!("events_applied_total").increment(1);
            RunStats::add(&self.stats.applied, 1);

            let ranked = match self.store.zrevrank_with_score(&global, &key.0).await {
                Ok(Some(ranked)) => ranked,
                Ok(None) => {
                    warn!(player_id = %key.0, game_mode = key.1,
                        "member missing from leaderboard after application");
                    continue;
                }
                Err(e) if e.aborts_batch() => return Err(e),
                Err(e) => {
                    warn!(player_id = %key.0, error = %e, "rank read failed after application");
                    continue;
                }
            };

            if tailing && previous != Some(ranked.rank) {
                self.emit_change(&key, previous, ranked).await;
            }
            previous = Some(ranked.rank);
        }
        Ok(())
    }

    /// Apply all singleton events in one pipelined round trip, then emit
    /// rank diffs against the pre-batch snapshot.
    async fn process_singletons(
        &self,
        singles: Vec<(GroupKey, Vec<ScoreEvent>)>,
        initial: &HashMap<GroupKey, Option<u64>>,
        tailing: bool,
    ) -> Result<()> {
        if singles.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut ops = Vec::new();
        let mut applied: Vec<GroupKey> = Vec::with_capacity(singles.len());
        for (key, events) in singles {
            if let Some(event) = events.into_iter().next() {
                ops.extend(applier::build_apply_ops(&event, now));
                applied.push(key);
            }
        }

        match self.store.run_ops(&ops).await {
            Ok(()) => {
                metrics::counter!("events_applied_total").increment(applied.len() as u64);
                RunStats::add(&self.stats.applied, applied.len() as u64);
            }
            Err(e) if e.aborts_batch() => return Err(e),
            Err(e) => {
                warn!(events = applied.len(), error = %e,
                    "singleton pipeline failed, skipping its events");
                metrics::counter!("events_apply_failures_total").increment(applied.len() as u64);
                RunStats::add(&self.stats.apply_failures, applied.len() as u64);
                return Ok(());
            }
        }

        if !tailing {
            return Ok(());
        }

        let reads = join_all(applied.iter().map(|(player_id, game_mode)| {
            let global = keys::leaderboard_global(*game_mode);
            let store = Arc::clone(&self.store);
            async move { store.zrevrank_with_score(&global, player_id).await }
        }))
        .await;

        for (key, read) in applied.iter().zip(reads) {
            let ranked = match read {
                Ok(Some(ranked)) => ranked,
                Ok(None) => continue,
                Err(e) if e.aborts_batch() => return Err(e),
                Err(e) => {
                    warn!(player_id = %key.0, error = %e, "rank read failed after application");
                    continue;
                }
            };

            let old_rank = initial.get(key).copied().flatten();
            if old_rank != Some(ranked.rank) {
                self.emit_change(key, old_rank, ranked).await;
            }
        }
        Ok(())
    }

    /// Publish one rank change and purge the cached views it touches.
    async fn emit_change(&self, key: &GroupKey, old_rank: Option<u64>, new: RankedScore) {
        let change = RankChange {
            game_mode: key.1,
            player_id: key.0.clone(),
            old_rank,
            new_rank: new.rank,
            score: new.score,
            timestamp: Utc::now(),
        };

        self.sink.publish_rank_change(&change).await;
        RunStats::add(&self.stats.notifications, 1);

        if crosses_cached_ranks(old_rank, new.rank) {
            self.sink.purge_cache(&top100_paths(key.1)).await;
            RunStats::add(&self.stats.purges, 1);
        }
    }
}

#[async_trait]
impl BatchHandler for Dispatcher {
    async fn handle_batch(&self, batch: ConsumedBatch) -> Result<()> {
        self.dispatch(batch).await
    }
}

/// Group events by `(player, game mode)`, keeping arrival order inside
/// each group and first-seen order across groups.
fn group_by_key(events: Vec<ScoreEvent>) -> Vec<(GroupKey, Vec<ScoreEvent>)> {
    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut groups: Vec<(GroupKey, Vec<ScoreEvent>)> = Vec::new();

    for event in events {
        let key = (event.player_id.clone(), event.game_mode);
        match index.get(&key) {
            Some(&slot) => groups[slot].1.push(event),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![event]));
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(player: &str, mode: u32, score: i64) -> ScoreEvent {
        ScoreEvent {
            player_id: player.to_string(),
            username: player.to_string(),
            game_mode: mode,
            score,
            game_duration_seconds: None,
            timestamp: None,
        }
    }

    #[test]
    fn test_group_by_key_preserves_order() {
        let groups = group_by_key(vec![
            event("p1", 1, 10),
            event("p2", 1, 20),
            event("p1", 1, 5),
            event("p1", 2, 7),
        ]);

        assert_eq!(groups.len(), 3);

        assert_eq!(groups[0].0, ("p1".to_string(), 1));
        let scores: Vec<i64> = groups[0].1.iter().map(|e| e.score).collect();
        assert_eq!(scores, vec![10, 5]);

        assert_eq!(groups[1].0, ("p2".to_string(), 1));
        assert_eq!(groups[2].0, ("p1".to_string(), 2));
        assert_eq!(groups[2].1.len(), 1);
    }

    #[test]
    fn test_group_by_key_hot_vs_singleton_split() {
        let groups = group_by_key(vec![
            event("p1", 1, 1),
            event("p1", 1, 2),
            event("p2", 1, 3),
        ]);
        let (hot, singles): (Vec<_>, Vec<_>) =
            groups.into_iter().partition(|(_, events)| events.len() >= 2);

        assert_eq!(hot.len(), 1);
        assert_eq!(hot[0].0 .0, "p1");
        assert_eq!(singles.len(), 1);
        assert_eq!(singles[0].0 .0, "p2");
    }
}
