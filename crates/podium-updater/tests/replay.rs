//! Replay-mode behavior: notification suppression, state equivalence with
//! tailing consumption, and catch-up detection.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{score, TestBed};
use podium_updater::recovery::spawn_idle_watcher;
use podium_updater::{LeaderboardStore, ReplayTracker};
use tokio_util::sync::CancellationToken;

async fn feed_reference_log(bed: &TestBed) {
    // Scenarios 1-3 in order: single event, two more players, rank swap.
    bed.run_batch(&[score("p1", "alice", 1, 10)]).await.unwrap();
    bed.run_batch(&[score("p2", "bob", 1, 20)]).await.unwrap();
    bed.run_batch(&[score("p3", "carol", 1, 15)]).await.unwrap();
    bed.run_batch(&[score("p1", "alice", 1, 100)]).await.unwrap();
}

#[tokio::test]
async fn replay_rebuilds_state_and_suppresses_notifications() {
    // Reference: the same log consumed live.
    let live = TestBed::tailing();
    feed_reference_log(&live).await;
    assert!(!live.sink.changes().is_empty());

    // Cold start: wiped store, replay from the earliest offset.
    let cold = TestBed::replaying();
    feed_reference_log(&cold).await;

    // Zero leaderboard-updated events while replaying.
    assert!(cold.sink.changes().is_empty());
    assert!(cold.sink.purges().is_empty());
    assert!(cold.tracker.is_replaying());

    // Replayed state matches the live state (created_at is stamped at
    // processing time, so it is not compared).
    for player in ["p1", "p2", "p3"] {
        assert_eq!(
            cold.store.zscore("leaderboard:1:global", player),
            live.store.zscore("leaderboard:1:global", player),
        );
        let cold_player = cold.store.get_player(player).await.unwrap().unwrap();
        let live_player = live.store.get_player(player).await.unwrap().unwrap();
        assert_eq!(cold_player.username, live_player.username);
        assert_eq!(cold_player.total_score, live_player.total_score);
        assert_eq!(cold_player.games_played, live_player.games_played);
    }

    // Three consecutive empty batches end the replay.
    cold.run_empty_batch().await.unwrap();
    cold.run_empty_batch().await.unwrap();
    assert!(cold.tracker.is_replaying());
    cold.run_empty_batch().await.unwrap();
    assert!(!cold.tracker.is_replaying());

    // The engine now tails: fresh events notify again.
    cold.run_batch(&[score("p4", "dave", 1, 500)]).await.unwrap();
    let changes = cold.sink.changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].player_id, "p4");
    assert_eq!(changes[0].new_rank, 1);
}

#[tokio::test]
async fn non_empty_batch_resets_the_empty_counter() {
    let bed = TestBed::replaying();

    bed.run_empty_batch().await.unwrap();
    bed.run_empty_batch().await.unwrap();
    bed.run_batch(&[score("p1", "alice", 1, 10)]).await.unwrap();
    bed.run_empty_batch().await.unwrap();
    bed.run_empty_batch().await.unwrap();
    assert!(bed.tracker.is_replaying());

    bed.run_empty_batch().await.unwrap();
    assert!(!bed.tracker.is_replaying());
}

#[tokio::test]
async fn batch_with_only_malformed_events_counts_as_empty() {
    let bed = TestBed::replaying();

    let garbage = serde_json::json!({"playerId": "p1", "score": "not-a-number"});
    bed.run_batch(&[garbage.clone()]).await.unwrap();
    bed.run_batch(&[garbage.clone()]).await.unwrap();
    bed.run_batch(&[garbage]).await.unwrap();

    // Zero events survived validation three batches in a row.
    assert!(!bed.tracker.is_replaying());
}

#[tokio::test]
async fn hot_groups_stay_silent_during_replay() {
    let bed = TestBed::replaying();

    bed.run_batch(&[
        score("p1", "alice", 1, 6),
        score("p1", "alice", 1, 6),
        score("p1", "alice", 1, 6),
    ])
    .await
    .unwrap();

    assert_eq!(bed.store.zscore("leaderboard:1:global", "p1"), Some(18));
    let player = bed.store.get_player("p1").await.unwrap().unwrap();
    assert_eq!(player.games_played, 3);
    assert!(bed.sink.changes().is_empty());
}

#[tokio::test]
async fn idle_watcher_ends_replay() {
    let tracker = Arc::new(ReplayTracker::new(3, Duration::from_millis(50)));
    tracker.start_replay();

    let cancel = CancellationToken::new();
    let watcher = spawn_idle_watcher(Arc::clone(&tracker), cancel.clone());

    // The watcher ticks once per second; the second tick observes an idle
    // window well past the 50ms timeout and flips the tracker.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!tracker.is_replaying());

    // The watcher exits on its own once the replay has ended.
    watcher.await.unwrap();
}
