//! Recovery detection: whether to replay the event log at startup, and
//! when a running replay has caught up with the live tail.
//!
//! # Startup
//!
//! [`needs_replay`] inspects the materialized view: if no global
//! leaderboard of any known game mode has a member *and* no player records
//! exist, the view is empty and the whole log must be replayed. Errors
//! during the check fail safe to replay: an empty store rebuilt twice is
//! correct, an unreplayed empty store is not.
//!
//! # Catch-up
//!
//! During replay the engine cannot ask the broker "am I at the tail?"
//! reliably mid-stream, so it infers catch-up from delivery behavior:
//! either N consecutive batches contained zero valid events, or no batch
//! arrived at all for the idle window. Both detectors run concurrently;
//! whichever fires first wins, and the replaying flag flips exactly once
//! (compare-and-swap), cancelling the other side.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use podium_core::keys;
use tracing::{info, warn};

use crate::error::Result;
use crate::store::LeaderboardStore;

/// Decide whether the engine must replay the log from the earliest offset.
pub async fn needs_replay(store: &dyn LeaderboardStore) -> bool {
    match view_is_empty(store).await {
        Ok(empty) => empty,
        Err(e) => {
            warn!(error = %e, "could not inspect materialized view, assuming replay is required");
            true
        }
    }
}

/// True iff no global leaderboard has members and no player records exist.
async fn view_is_empty(store: &dyn LeaderboardStore) -> Result<bool> {
    // Known game modes are seeded externally; when they are not there yet
    // the decision collapses to the player-record check.
    let mode_ids = store.hash_keys(keys::GAME_MODES).await?;

    for id in mode_ids.iter().filter_map(|id| id.parse::<u32>().ok()) {
        if store.zcard(&keys::leaderboard_global(id)).await? > 0 {
            return Ok(false);
        }
    }

    let player = store
        .scan_for(keys::PLAYER_SCAN_PATTERN, keys::is_player_record_key)
        .await?;

    Ok(player.is_none())
}

/// Which catch-up detector ended the replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchUp {
    /// The empty-batch counter reached its threshold.
    EmptyBatches,
    /// No batch was delivered for the idle window.
    Idle,
}

/// Shared replay bookkeeping.
///
/// The consume loop is the only writer of the counter and the last-batch
/// time; the idle watcher reads them and may flip the replaying flag. The
/// flag itself only ever transitions `true -> false`, guarded by a CAS so
/// the transition is observed exactly once no matter which detector fires.
pub struct ReplayTracker {
    replaying: AtomicBool,
    empty_batches: AtomicU32,
    threshold: u32,
    idle_timeout: Duration,
    last_batch: Mutex<Instant>,
}

impl ReplayTracker {
    pub fn new(threshold: u32, idle_timeout: Duration) -> Self {
        Self {
            replaying: AtomicBool::new(false),
            empty_batches: AtomicU32::new(0),
            threshold,
            idle_timeout,
            last_batch: Mutex::new(Instant::now()),
        }
    }

    /// Enter replay mode. Called once before subscribing from the
    /// beginning; also (re)arms the idle clock.
    pub fn start_replay(&self) {
        self.empty_batches.store(0, Ordering::SeqCst);
        *self.last_batch.lock() = Instant::now();
        self.replaying.store(true, Ordering::SeqCst);
        metrics::gauge!("replay_active").set(1.0);
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying.load(Ordering::SeqCst)
    }

    /// Record a delivered batch and its valid-event count. Returns the
    /// catch-up reason when this batch completed the replay.
    pub fn note_batch(&self, valid_events: usize) -> Option<CatchUp> {
        if !self.is_replaying() {
            return None;
        }

        *self.last_batch.lock() = Instant::now();

        if valid_events > 0 {
            self.empty_batches.store(0, Ordering::SeqCst);
            return None;
        }

        let seen = self.empty_batches.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::counter!("replay_empty_batches_total").increment(1);

        if seen >= self.threshold && self.try_finish() {
            return Some(CatchUp::EmptyBatches);
        }
        None
    }

    /// Idle-watcher probe: ends the replay when no batch has arrived for
    /// the idle window.
    pub fn idle_check(&self) -> Option<CatchUp> {
        if !self.is_replaying() {
            return None;
        }

        let idle_for = self.last_batch.lock().elapsed();
        if idle_for >= self.idle_timeout && self.try_finish() {
            return Some(CatchUp::Idle);
        }
        None
    }

    /// CAS the replaying flag `true -> false`; only one caller wins.
    fn try_finish(&self) -> bool {
        let won = self
            .replaying
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if won {
            metrics::gauge!("replay_active").set(0.0);
        }
        won
    }
}

/// Spawn the idle watcher: a 1 s ticker comparing wall time since the last
/// delivered batch against the idle timeout. Exits once the replay ends or
/// the engine shuts down.
pub fn spawn_idle_watcher(
    tracker: std::sync::Arc<ReplayTracker>,
    cancel: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {}
            }

            if let Some(reason) = tracker.idle_check() {
                info!(?reason, "replay idle window elapsed, switching to tailing");
            }

            if !tracker.is_replaying() {
                break;
            }
        }
    })
}
