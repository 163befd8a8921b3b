//! Wire types and validation for submitted-score and rank-change events.
//!
//! The intake API performs full schema validation before producing to the
//! log, but the update engine re-checks the two fields it cannot work
//! without: events with a missing `playerId` or a missing/null/non-numeric
//! `score` are rejected as malformed and skipped, everything else is
//! tolerated with defaults so that a log full of slightly-stale payloads can
//! still be replayed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A validated score submission consumed from the `score-submitted` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEvent {
    /// Stable player identifier; also the log partition key.
    pub player_id: String,

    /// Display name at submission time. Overwrites the stored name on every
    /// event so renames take effect.
    pub username: String,

    /// Game mode identifier (1-based).
    pub game_mode: u32,

    /// Points scored in this game.
    pub score: i64,

    /// Duration of the game, when the client reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_duration_seconds: Option<u64>,

    /// Submission timestamp as produced by the intake API. Informational:
    /// leaderboard windows are keyed by processing time, not event time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Decode one raw log message payload into a [`ScoreEvent`].
///
/// Field handling mirrors the intake contract:
/// - `playerId` must be a non-empty string.
/// - `score` must be a number or a numeric string (the intake historically
///   accepted both); null, empty, or anything else is malformed.
/// - `gameMode` defaults to 1 when absent; a present but non-integer value
///   is malformed rather than silently misrouted to mode 1.
/// - `username` defaults to the player id when absent.
pub fn decode_score_event(payload: &[u8]) -> Result<ScoreEvent> {
    let value: Value = serde_json::from_slice(payload)?;

    let player_id = match value.get("playerId") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Null) | None => return Err(Error::MissingField { field: "playerId" }),
        Some(Value::String(_)) => {
            return Err(Error::InvalidField {
                field: "playerId",
                reason: "empty string".to_string(),
            })
        }
        Some(other) => {
            return Err(Error::InvalidField {
                field: "playerId",
                reason: format!("expected string, got {other}"),
            })
        }
    };

    let score = decode_score(value.get("score"))?;

    let game_mode = match value.get("gameMode") {
        None | Some(Value::Null) => 1,
        Some(v) => v
            .as_u64()
            .filter(|m| *m >= 1 && *m <= u32::MAX as u64)
            .ok_or_else(|| Error::InvalidField {
                field: "gameMode",
                reason: format!("expected positive integer, got {v}"),
            })? as u32,
    };

    let username = value
        .get("username")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(&player_id)
        .to_string();

    let game_duration_seconds = value.get("gameDurationSeconds").and_then(Value::as_u64);

    let timestamp = value
        .get("timestamp")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(ScoreEvent {
        player_id,
        username,
        game_mode,
        score,
        game_duration_seconds,
        timestamp,
    })
}

fn decode_score(value: Option<&Value>) -> Result<i64> {
    match value {
        None | Some(Value::Null) => Err(Error::MissingField { field: "score" }),
        Some(Value::Number(n)) => n.as_i64().ok_or_else(|| Error::InvalidField {
            field: "score",
            reason: format!("not an integer: {n}"),
        }),
        // The intake historically serialized scores as strings in some
        // client versions; accept the numeric ones.
        Some(Value::String(s)) if !s.is_empty() => {
            s.parse::<i64>().map_err(|_| Error::InvalidField {
                field: "score",
                reason: format!("non-numeric string: {s:?}"),
            })
        }
        Some(Value::String(_)) => Err(Error::InvalidField {
            field: "score",
            reason: "empty string".to_string(),
        }),
        Some(other) => Err(Error::InvalidField {
            field: "score",
            reason: format!("expected number, got {other}"),
        }),
    }
}

/// A rank movement published to the `leaderboard-updated` topic.
///
/// `old_rank` is `None` (`null` on the wire) when the player had no prior
/// entry in that leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankChange {
    pub game_mode: u32,
    pub player_id: String,
    pub old_rank: Option<u64>,
    pub new_rank: u64,
    /// Cumulative global score after the change, not the per-event delta.
    pub score: i64,
    pub timestamp: DateTime<Utc>,
}

/// Per-player aggregate record stored at `player:{playerId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub username: String,
    pub total_score: i64,
    pub games_played: u64,
    pub created_at: String,
}

/// Game mode metadata, seeded externally and read-only for the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameMode {
    pub id: u32,
    pub name: String,
    pub max_score_per_game: i64,
    pub avg_game_duration_minutes: f64,
}
