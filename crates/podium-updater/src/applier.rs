//! Leaderboard applier: turns one validated score event into store writes.
//!
//! Every accepted event updates, in one pipelined round trip:
//! 1. the player record (created if missing; username always refreshed),
//! 2. the game mode's global leaderboard,
//! 3. the daily bucket for the processing date (TTL refreshed to 7d),
//! 4. the weekly bucket for the processing week (TTL refreshed to 28d),
//! 5. the player's aggregate stats.
//!
//! The weekly step is skipped with a warning for non-positive scores,
//! matching the long-standing behavior of the read side, which treats a
//! zero entry in a weekly bucket as noise.

use chrono::{DateTime, SecondsFormat, Utc};
use podium_core::{keys, window, ScoreEvent};
use tracing::warn;

use crate::error::Result;
use crate::store::{LeaderboardStore, StoreOp};

/// Compose the pipelined ops for one event at the given processing time.
pub fn build_apply_ops(event: &ScoreEvent, now: DateTime<Utc>) -> Vec<StoreOp> {
    let day = window::day_key(now);
    let week = window::week_key(now);
    let daily_key = keys::leaderboard_daily(event.game_mode, &day);
    let weekly_key = keys::leaderboard_weekly(event.game_mode, &week);

    let mut ops = Vec::with_capacity(7);

    ops.push(StoreOp::UpsertPlayer {
        player_id: event.player_id.clone(),
        username: event.username.clone(),
        created_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
    });

    ops.push(StoreOp::ZIncrBy {
        key: keys::leaderboard_global(event.game_mode),
        member: event.player_id.clone(),
        delta: event.score,
    });

    ops.push(StoreOp::ZIncrBy {
        key: daily_key.clone(),
        member: event.player_id.clone(),
        delta: event.score,
    });
    ops.push(StoreOp::Expire {
        key: daily_key,
        ttl_secs: window::DAILY_TTL_SECS,
    });

    if event.score > 0 {
        ops.push(StoreOp::ZIncrBy {
            key: weekly_key.clone(),
            member: event.player_id.clone(),
            delta: event.score,
        });
        ops.push(StoreOp::Expire {
            key: weekly_key,
            ttl_secs: window::WEEKLY_TTL_SECS,
        });
    } else {
        warn!(
            player_id = %event.player_id,
            game_mode = event.game_mode,
            score = event.score,
            "skipping weekly leaderboard update for non-positive score"
        );
    }

    ops.push(StoreOp::IncPlayerStats {
        player_id: event.player_id.clone(),
        score_delta: event.score,
    });

    ops
}

/// Apply one event as a single pipelined round trip.
pub async fn apply_event(
    store: &dyn LeaderboardStore,
    event: &ScoreEvent,
    now: DateTime<Utc>,
) -> Result<()> {
    store.run_ops(&build_apply_ops(event, now)).await
}
