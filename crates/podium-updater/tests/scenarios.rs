//! End-to-end dispatcher scenarios against the in-memory store.

mod common;

use common::{score, TestBed};
use podium_updater::LeaderboardStore;
use serde_json::json;

async fn global_rank(bed: &TestBed, player: &str) -> u64 {
    bed.store
        .zrevrank_with_score("leaderboard:1:global", player)
        .await
        .unwrap()
        .expect("player is ranked")
        .rank
}

async fn player_totals(bed: &TestBed, player: &str) -> (i64, u64) {
    let p = bed.store.get_player(player).await.unwrap().unwrap();
    (p.total_score, p.games_played)
}

#[tokio::test]
async fn fresh_system_single_event() {
    let bed = TestBed::tailing();

    bed.run_batch(&[score("p1", "alice", 1, 100)]).await.unwrap();

    let player = bed.store.get_player("p1").await.unwrap().unwrap();
    assert_eq!(player.username, "alice");
    assert_eq!(player.total_score, 100);
    assert_eq!(player.games_played, 1);

    assert_eq!(bed.store.zcard("leaderboard:1:global").await.unwrap(), 1);
    assert_eq!(bed.store.zscore("leaderboard:1:global", "p1"), Some(100));

    let changes = bed.sink.changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].player_id, "p1");
    assert_eq!(changes[0].old_rank, None);
    assert_eq!(changes[0].new_rank, 1);
    assert_eq!(changes[0].score, 100);

    // New rank inside the top 100: the cached views get purged.
    let purges = bed.sink.purges();
    assert_eq!(purges.len(), 1);
    assert!(purges[0].contains(&"/api/leaderboard/1/top100".to_string()));
}

#[tokio::test]
async fn three_players_establish_ranks() {
    let bed = TestBed::tailing();

    bed.run_batch(&[score("p1", "alice", 1, 10)]).await.unwrap();
    bed.run_batch(&[score("p2", "bob", 1, 20)]).await.unwrap();
    bed.run_batch(&[score("p3", "carol", 1, 15)]).await.unwrap();

    assert_eq!(global_rank(&bed, "p2").await, 1);
    assert_eq!(global_rank(&bed, "p3").await, 2);
    assert_eq!(global_rank(&bed, "p1").await, 3);

    let changes = bed.sink.changes();
    assert_eq!(changes.len(), 3);
    assert!(changes.iter().all(|c| c.old_rank.is_none()));
}

#[tokio::test]
async fn rank_swap_emits_old_and_new_rank() {
    let bed = TestBed::tailing();
    bed.run_batch(&[score("p1", "alice", 1, 10)]).await.unwrap();
    bed.run_batch(&[score("p2", "bob", 1, 20)]).await.unwrap();
    bed.run_batch(&[score("p3", "carol", 1, 15)]).await.unwrap();
    let purges_before = bed.sink.purges().len();

    bed.run_batch(&[score("p1", "alice", 1, 100)]).await.unwrap();

    let ranked = bed
        .store
        .zrevrank_with_score("leaderboard:1:global", "p1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ranked.rank, 1);
    assert_eq!(ranked.score, 110);

    let last = bed.sink.changes().pop().unwrap();
    assert_eq!(last.player_id, "p1");
    assert_eq!(last.old_rank, Some(3));
    assert_eq!(last.new_rank, 1);
    assert_eq!(last.score, 110);

    assert!(bed.sink.purges().len() > purges_before);
}

#[tokio::test]
async fn hot_group_applies_sequentially_and_diffs_each_step() {
    let bed = TestBed::tailing();
    // Two established players so the hot player's rank moves mid-group.
    bed.run_batch(&[score("p2", "bob", 1, 20), score("p3", "carol", 1, 15)])
        .await
        .unwrap();
    let baseline = bed.sink.changes().len();

    // Same batch, three events for the same (player, mode) key.
    bed.run_batch(&[
        score("p1", "alice", 1, 6),
        score("p1", "alice", 1, 6),
        score("p1", "alice", 1, 6),
    ])
    .await
    .unwrap();

    // Total delta applied, one application per event.
    assert_eq!(bed.store.zscore("leaderboard:1:global", "p1"), Some(18));
    let player = bed.store.get_player("p1").await.unwrap().unwrap();
    assert_eq!(player.games_played, 3);
    assert_eq!(player.total_score, 18);

    // Rank trajectory: 6 -> rank 3 (new entry), 12 -> rank 3 (no change),
    // 18 -> rank 2. Each notification diffs against the rank immediately
    // before that specific application.
    let changes: Vec<_> = bed.sink.changes().split_off(baseline);
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0].old_rank, None);
    assert_eq!(changes[0].new_rank, 3);
    assert_eq!(changes[0].score, 6);
    assert_eq!(changes[1].old_rank, Some(3));
    assert_eq!(changes[1].new_rank, 2);
    assert_eq!(changes[1].score, 18);
}

#[tokio::test]
async fn malformed_event_is_skipped_without_gap() {
    let bed = TestBed::tailing();

    bed.run_batch(&[
        score("p1", "alice", 1, 10),
        json!({"playerId": "p2", "username": "bob", "gameMode": 1, "score": null}),
        score("p3", "carol", 1, 30),
    ])
    .await
    .unwrap();

    assert_eq!(bed.store.zscore("leaderboard:1:global", "p1"), Some(10));
    assert_eq!(bed.store.zscore("leaderboard:1:global", "p3"), Some(30));
    assert!(bed.store.get_player("p2").await.unwrap().is_none());

    assert_eq!(podium_updater::RunStats::get(&bed.stats.malformed), 1);
    assert_eq!(podium_updater::RunStats::get(&bed.stats.applied), 2);
    assert_eq!(bed.sink.changes().len(), 2);
}

#[tokio::test]
async fn events_for_distinct_keys_commute() {
    let forward = TestBed::tailing();
    forward
        .run_batch(&[
            score("p1", "alice", 1, 10),
            score("p2", "bob", 2, 20),
            score("p1", "alice", 2, 5),
        ])
        .await
        .unwrap();

    let reversed = TestBed::tailing();
    reversed
        .run_batch(&[
            score("p1", "alice", 2, 5),
            score("p2", "bob", 2, 20),
            score("p1", "alice", 1, 10),
        ])
        .await
        .unwrap();

    for bed in [&forward, &reversed] {
        assert_eq!(bed.store.zscore("leaderboard:1:global", "p1"), Some(10));
        assert_eq!(bed.store.zscore("leaderboard:2:global", "p2"), Some(20));
        assert_eq!(bed.store.zscore("leaderboard:2:global", "p1"), Some(5));
    }

    assert_eq!(
        player_totals(&forward, "p1").await,
        player_totals(&reversed, "p1").await
    );
    assert_eq!(
        player_totals(&forward, "p2").await,
        player_totals(&reversed, "p2").await
    );
}

#[tokio::test]
async fn daily_and_weekly_buckets_carry_ttls() {
    let bed = TestBed::tailing();
    bed.run_batch(&[score("p1", "alice", 1, 100)]).await.unwrap();

    let daily = bed
        .store
        .scan_for("leaderboard:1:daily:*", |_| true)
        .await
        .unwrap()
        .expect("daily bucket written");
    assert_eq!(bed.store.recorded_ttl(&daily), Some(7 * 24 * 60 * 60));

    let weekly = bed
        .store
        .scan_for("leaderboard:1:weekly:*", |_| true)
        .await
        .unwrap()
        .expect("weekly bucket written");
    assert_eq!(bed.store.recorded_ttl(&weekly), Some(28 * 24 * 60 * 60));
}

#[tokio::test]
async fn zero_score_skips_weekly_but_counts_game() {
    let bed = TestBed::tailing();
    bed.run_batch(&[score("p1", "alice", 1, 0)]).await.unwrap();

    let weekly = bed
        .store
        .scan_for("leaderboard:1:weekly:*", |_| true)
        .await
        .unwrap();
    assert!(weekly.is_none());

    let player = bed.store.get_player("p1").await.unwrap().unwrap();
    assert_eq!(player.games_played, 1);
    assert_eq!(player.total_score, 0);
}

#[tokio::test]
async fn below_top100_movement_does_not_purge() {
    let bed = TestBed::tailing();

    // Fill ranks 1..=150 with decreasing scores.
    let seed: Vec<_> = (1..=150)
        .map(|i| score(&format!("seed{i:03}"), "seed", 1, 10_000 - i as i64))
        .collect();
    bed.run_batch(&seed).await.unwrap();
    let purges_before = bed.sink.purges().len();

    // A newcomer landing at the very bottom never touches the top 100.
    bed.run_batch(&[score("p-low", "lowball", 1, 1)]).await.unwrap();

    let ranked = bed
        .store
        .zrevrank_with_score("leaderboard:1:global", "p-low")
        .await
        .unwrap()
        .unwrap();
    assert!(ranked.rank > 100);
    assert_eq!(bed.sink.purges().len(), purges_before);
    // The rank change itself is still published.
    assert_eq!(bed.sink.changes().last().unwrap().player_id, "p-low");
}
